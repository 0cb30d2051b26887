//! Shared-secret checks for operator endpoints

use std::fmt;

/// Compare two secrets without short-circuiting on the first differing byte
pub fn timing_safe_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut out = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        out |= x ^ y;
    }
    out == 0
}

/// Bearer secret expected from operator callers
#[derive(Clone)]
pub struct ApiSecret(String);

impl ApiSecret {
    pub fn new(secret: &str) -> Self {
        Self(secret.to_string())
    }

    /// An empty configured secret never matches
    pub fn matches(&self, provided: &str) -> bool {
        !self.0.is_empty() && timing_safe_eq(&self.0, provided)
    }
}

impl fmt::Debug for ApiSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiSecret([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timing_safe_eq() {
        assert!(timing_safe_eq("s3cret", "s3cret"));
        assert!(!timing_safe_eq("s3cret", "s3cres"));
        assert!(!timing_safe_eq("s3cret", "s3cret!"));
    }

    #[test]
    fn test_empty_secret_never_matches() {
        assert!(!ApiSecret::new("").matches(""));
        assert!(ApiSecret::new("abc").matches("abc"));
        assert_eq!(format!("{:?}", ApiSecret::new("abc")), "ApiSecret([REDACTED])");
    }
}
