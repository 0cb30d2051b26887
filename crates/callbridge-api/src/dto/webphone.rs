//! Web-phone DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Token mint request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TokenRequest {
    /// Extension the token is bound to
    #[validate(length(min = 1, max = 32, message = "Extension is required"))]
    pub extension: String,
}

/// Freshly minted web-phone token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    pub extension: String,
    /// Lifetime in seconds
    pub expires_in: i64,
    pub expires_at: DateTime<Utc>,
}
