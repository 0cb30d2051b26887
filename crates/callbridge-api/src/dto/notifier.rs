//! Push-channel DTOs

use serde::Deserialize;

/// `POST /api/trigger` query string
///
/// Every field is optional so that a missing one is reported by the handler
/// (401 for the token, 400 for the phone) rather than by the extractor.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TriggerQuery {
    pub token: Option<String>,
    pub phone: Option<String>,
    /// Target extension; absent, empty or `all` broadcasts
    pub exten: Option<String>,
}

/// `GET /crmws` query string
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushQuery {
    /// Extension the subscriber listens for
    pub exten: Option<String>,
}

/// `GET /api/cidname` query string
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CidNameQuery {
    #[serde(default)]
    pub phone: String,
}
