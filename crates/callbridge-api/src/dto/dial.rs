//! Click-to-call DTOs

use callbridge_services::DialAccepted;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Operator dial request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DialRequest {
    /// Extension rung first
    #[validate(length(min = 1, max = 32, message = "Caller extension is required"))]
    pub caller_extension: String,

    /// Number to reach once the caller answers
    #[validate(length(min = 1, max = 64, message = "Destination is required"))]
    pub destination: String,
}

/// Dial request from a web-phone; the caller is the token's extension
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct WebPhoneDialRequest {
    #[validate(length(min = 1, max = 64, message = "Destination is required"))]
    pub destination: String,
}

/// Accepted originate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialResponse {
    pub status: String,
    pub channel: String,
    pub destination: String,
    pub simulated: bool,
    pub accepted_at: DateTime<Utc>,
}

impl From<DialAccepted> for DialResponse {
    fn from(accepted: DialAccepted) -> Self {
        Self {
            status: if accepted.simulated {
                "simulated".to_string()
            } else {
                "accepted".to_string()
            },
            channel: accepted.channel,
            destination: accepted.destination,
            simulated: accepted.simulated,
            accepted_at: accepted.accepted_at,
        }
    }
}
