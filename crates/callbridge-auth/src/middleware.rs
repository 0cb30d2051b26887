//! Actix-web request extractors
//!
//! Provides extractors for web-phone callers (token in `?token=` or a Bearer
//! header) and for operator API callers (shared secret as Bearer).

use crate::claims::Claims;
use crate::secret::ApiSecret;
use crate::token::TokenService;
use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use callbridge_core::error::AppError;
use futures::future::{ready, Ready};
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Bearer credential from the Authorization header
pub fn extract_bearer(req: &HttpRequest) -> Option<String> {
    let header = req.headers().get("Authorization")?.to_str().ok()?;
    header
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Token from the `token` query parameter
pub fn extract_query_token(req: &HttpRequest) -> Option<String> {
    web::Query::<TokenQuery>::from_query(req.query_string())
        .ok()?
        .into_inner()
        .token
        .filter(|t| !t.is_empty())
}

/// Caller holding a valid web-phone token
///
/// Browsers cannot set headers on a WebSocket handshake, so the query parameter is
/// checked first.
///
/// # Examples
///
/// ```no_run
/// use actix_web::HttpResponse;
/// use callbridge_auth::WebPhoneCaller;
///
/// async fn whoami(caller: WebPhoneCaller) -> HttpResponse {
///     HttpResponse::Ok().body(caller.claims.ext.clone())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct WebPhoneCaller {
    pub claims: Claims,
    pub token: String,
}

impl WebPhoneCaller {
    pub fn extension(&self) -> &str {
        &self.claims.ext
    }
}

impl FromRequest for WebPhoneCaller {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let tokens = match req.app_data::<web::Data<TokenService>>() {
            Some(service) => service.clone(),
            None => {
                warn!("TokenService not found in app data");
                return ready(Err(AppError::Internal(
                    "Token service not configured".to_string(),
                )
                .into()));
            }
        };

        let token = match extract_query_token(req).or_else(|| extract_bearer(req)) {
            Some(t) => t,
            None => {
                debug!("No web-phone token in request");
                return ready(Err(AppError::InvalidToken("no token provided".into()).into()));
            }
        };

        match tokens.validate_token(&token) {
            Ok(claims) => ready(Ok(WebPhoneCaller { claims, token })),
            Err(e) => {
                debug!(error = %e, "Web-phone token rejected");
                ready(Err(e.into()))
            }
        }
    }
}

/// Operator caller presenting the configured API secret
#[derive(Debug, Clone, Copy)]
pub struct ApiCaller;

impl FromRequest for ApiCaller {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let secret = match req.app_data::<web::Data<ApiSecret>>() {
            Some(secret) => secret.clone(),
            None => {
                warn!("ApiSecret not found in app data");
                return ready(Err(AppError::Internal(
                    "API secret not configured".to_string(),
                )
                .into()));
            }
        };

        match extract_bearer(req) {
            Some(provided) if secret.matches(&provided) => ready(Ok(ApiCaller)),
            Some(_) => {
                warn!(path = %req.path(), "API secret mismatch");
                ready(Err(AppError::Unauthorized("invalid API credentials".into()).into()))
            }
            None => ready(Err(
                AppError::Unauthorized("no API credentials provided".into()).into(),
            )),
        }
    }
}
