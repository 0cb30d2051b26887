//! Web-phone token claims
//!
//! Defines the claims carried by a web-phone token: the extension it was issued
//! for and its validity window.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Web-phone token claims
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Extension the token was issued for (always a string on the wire)
    pub ext: String,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    /// Create claims for `extension`; expiration is filled in by the token service
    ///
    /// # Examples
    ///
    /// ```
    /// use callbridge_auth::Claims;
    ///
    /// let claims = Claims::new("2001");
    /// assert_eq!(claims.ext, "2001");
    /// assert_eq!(claims.exp, 0);
    /// ```
    pub fn new(extension: &str) -> Self {
        Self {
            ext: extension.to_string(),
            iat: Utc::now().timestamp(),
            exp: 0,
        }
    }

    /// Create claims expiring `expires_in_secs` from now (negative for the past)
    pub fn with_expiration(extension: &str, expires_in_secs: i64) -> Self {
        let now = Utc::now();
        Self {
            ext: extension.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(expires_in_secs)).timestamp(),
        }
    }

    /// Check if the token is expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp())
    }

    /// Expired only once `now` is past `exp`; the `exp` second itself is valid
    pub fn is_expired_at(&self, now: i64) -> bool {
        now > self.exp
    }

    /// Seconds until expiry, zero once expired
    pub fn remaining_secs(&self) -> i64 {
        (self.exp + 1 - Utc::now().timestamp()).max(0)
    }

    /// Expiry as a timestamp
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }
}
