//! Web-phone token creation and validation
//!
//! Tokens are HS256 JWTs carrying `{ext, iat, exp}`. Validation uses zero clock
//! leeway: a token is rejected once the current time is past its `exp` second.

use crate::claims::Claims;
use callbridge_core::error::AppError;
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use tracing::{debug, error, warn};

/// Token service for the web-phone signaling channel
#[derive(Clone)]
pub struct TokenService {
    /// Default token lifetime in seconds
    expiration_secs: i64,

    /// Encoding key (cached)
    encoding_key: EncodingKey,

    /// Decoding key (cached)
    decoding_key: DecodingKey,

    validation: Validation,
}

impl TokenService {
    /// Create a new token service
    ///
    /// # Arguments
    ///
    /// * `secret` - The shared secret used to sign tokens
    /// * `expiration_secs` - Token lifetime in seconds
    ///
    /// # Examples
    ///
    /// ```
    /// use callbridge_auth::TokenService;
    ///
    /// let tokens = TokenService::new("my-secret-key", 3600);
    /// assert_eq!(tokens.expiration_secs(), 3600);
    /// ```
    pub fn new(secret: &str, expiration_secs: i64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            expiration_secs,
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Sign `claims`, filling in the expiration when it is unset
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` if signing fails
    pub fn create_token(&self, claims: &Claims) -> Result<String, AppError> {
        let mut token_claims = claims.clone();

        if token_claims.exp == 0 {
            let exp = Utc::now() + Duration::seconds(self.expiration_secs);
            token_claims.exp = exp.timestamp();
        }

        debug!(
            ext = %token_claims.ext,
            exp = %token_claims.exp,
            "Creating web-phone token"
        );

        encode(&Header::new(Algorithm::HS256), &token_claims, &self.encoding_key).map_err(|e| {
            error!(error = %e, "Failed to create web-phone token");
            AppError::Internal(format!("Token creation failed: {}", e))
        })
    }

    /// Issue a token for `extension` with the default lifetime
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for an empty extension
    pub fn issue_for_extension(&self, extension: &str) -> Result<String, AppError> {
        let extension = extension.trim();
        if extension.is_empty() {
            return Err(AppError::Validation("extension must not be empty".into()));
        }
        self.create_token(&Claims::new(extension))
    }

    /// Validate a token and extract its claims
    ///
    /// # Errors
    ///
    /// Returns:
    /// - `AppError::TokenExpired` if the token has expired
    /// - `AppError::InvalidToken` if the token is malformed, wrongly signed or has
    ///   no extension
    ///
    /// # Examples
    ///
    /// ```
    /// use callbridge_auth::TokenService;
    ///
    /// let tokens = TokenService::new("secret", 3600);
    /// let token = tokens.issue_for_extension("2001")?;
    /// let claims = tokens.validate_token(&token)?;
    /// assert_eq!(claims.ext, "2001");
    /// # Ok::<(), callbridge_core::error::AppError>(())
    /// ```
    pub fn validate_token(&self, token: &str) -> Result<Claims, AppError> {
        if token.split('.').count() != 3 {
            return Err(AppError::InvalidToken("malformed token".into()));
        }

        let token_data =
            decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
                if matches!(e.kind(), ErrorKind::ExpiredSignature) {
                    debug!("Web-phone token expired");
                    return AppError::TokenExpired;
                }

                warn!(error = %e, "Invalid web-phone token");
                AppError::InvalidToken(format!("Token validation failed: {}", e))
            })?;

        let claims = token_data.claims;

        if claims.is_expired() {
            return Err(AppError::TokenExpired);
        }

        if claims.ext.trim().is_empty() {
            return Err(AppError::InvalidToken("token carries no extension".into()));
        }

        debug!(ext = %claims.ext, "Web-phone token validated");

        Ok(claims)
    }

    /// Get the lifetime of tokens issued by this service
    pub fn expiration_secs(&self) -> i64 {
        self.expiration_secs
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("expiration_secs", &self.expiration_secs)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_SECRET: &str = "test-secret-key-for-webphone-12345";

    #[test]
    fn test_issue_and_validate() {
        let tokens = TokenService::new(TEST_SECRET, 3600);
        let token = tokens.issue_for_extension("2001").unwrap();
        assert_eq!(token.split('.').count(), 3);

        let claims = tokens.validate_token(&token).unwrap();
        assert_eq!(claims.ext, "2001");
        assert!(claims.exp - claims.iat >= 3599);
    }

    #[test]
    fn test_expired_token() {
        let tokens = TokenService::new(TEST_SECRET, 3600);
        let token = tokens
            .create_token(&Claims::with_expiration("2001", -10))
            .unwrap();

        let result = tokens.validate_token(&token);
        assert!(matches!(result, Err(AppError::TokenExpired)));
    }

    #[test]
    fn test_wrong_secret() {
        let issuer = TokenService::new(TEST_SECRET, 3600);
        let verifier = TokenService::new("another-secret", 3600);
        let token = issuer.issue_for_extension("2001").unwrap();

        let result = verifier.validate_token(&token);
        assert!(matches!(result, Err(AppError::InvalidToken(_))));
    }

    #[test]
    fn test_tampered_payload() {
        let tokens = TokenService::new(TEST_SECRET, 3600);
        let token = tokens.issue_for_extension("2001").unwrap();
        let forged = tokens.issue_for_extension("2002").unwrap();

        // payload of one token with the signature of another
        let parts: Vec<&str> = token.split('.').collect();
        let forged_parts: Vec<&str> = forged.split('.').collect();
        let spliced = format!("{}.{}.{}", parts[0], forged_parts[1], parts[2]);

        assert!(matches!(
            tokens.validate_token(&spliced),
            Err(AppError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_malformed_tokens() {
        let tokens = TokenService::new(TEST_SECRET, 3600);
        for bad in ["", "abc", "a.b", "a.b.c.d", "invalid.token.here"] {
            assert!(
                matches!(tokens.validate_token(bad), Err(AppError::InvalidToken(_))),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_empty_extension_rejected() {
        let tokens = TokenService::new(TEST_SECRET, 3600);
        assert!(matches!(
            tokens.issue_for_extension("  "),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let tokens = TokenService::new(TEST_SECRET, 3600);
        let debug = format!("{:?}", tokens);
        assert!(!debug.contains(TEST_SECRET));
        assert!(debug.contains("REDACTED"));
    }
}
