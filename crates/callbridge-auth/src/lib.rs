//! Authentication for CallBridge
//!
//! This crate provides the web-phone token service (HS256 JWT carrying the
//! extension), the shared-secret check used by operator endpoints, and Actix-web
//! extractors for both.
//!
//! # Features
//!
//! - Token creation and validation with zero clock leeway
//! - Constant-time comparison of shared secrets
//! - Request extractors for web-phone callers and operator API callers
//!
//! # Examples
//!
//! ## Issuing a web-phone token
//!
//! ```no_run
//! use callbridge_auth::TokenService;
//!
//! let tokens = TokenService::new("your-secret-key", 3600);
//! let token = tokens.issue_for_extension("2001")?;
//! let claims = tokens.validate_token(&token)?;
//! assert_eq!(claims.ext, "2001");
//! # Ok::<(), callbridge_core::error::AppError>(())
//! ```

pub mod claims;
pub mod middleware;
pub mod secret;
pub mod token;

pub use claims::Claims;
pub use middleware::{ApiCaller, WebPhoneCaller};
pub use secret::{timing_safe_eq, ApiSecret};
pub use token::TokenService;
