//! API layer for CallBridge
//!
//! HTTP and WebSocket handlers for the push hub, the web-phone signaling channel,
//! click-to-call and the PBX directory.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod acl;
pub mod dto;
pub mod handlers;
pub mod state;

pub use acl::IpAllowList;
pub use dto::ApiResponse;
pub use handlers::{configure_api, configure_bridge, configure_directory, configure_routes};
pub use state::{AppState, PushSettings};
