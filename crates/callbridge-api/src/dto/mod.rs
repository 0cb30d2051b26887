//! Data Transfer Objects (DTOs) for API requests and responses

pub mod common;
pub mod dial;
pub mod directory;
pub mod notifier;
pub mod webphone;

pub use common::*;
pub use dial::*;
pub use directory::*;
pub use notifier::*;
pub use webphone::*;
