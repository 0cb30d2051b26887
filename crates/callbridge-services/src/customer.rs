//! Customer lookup collaborators
//!
//! The CRM owns customer data; the bridge only asks it who owns a phone number.
//! `HttpCustomerLookup` queries `<lookup_url>?phone=<n>` and expects a JSON
//! customer record (or `null` / 404 when unknown).

use crate::constants::CID_VALIDATION_ERROR;
use async_trait::async_trait;
use callbridge_core::config::CrmConfig;
use callbridge_core::models::CustomerRecord;
use callbridge_core::traits::CustomerLookup;
use callbridge_core::{AppError, AppResult};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Lookup used when no CRM is configured; never finds anyone
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCustomerLookup;

#[async_trait]
impl CustomerLookup for NoCustomerLookup {
    async fn resolve_customer_by_phone(&self, _phone: &str) -> AppResult<Option<CustomerRecord>> {
        Ok(None)
    }
}

/// CRM lookup over HTTP
#[derive(Debug, Clone)]
pub struct HttpCustomerLookup {
    client: reqwest::Client,
    url: String,
}

impl HttpCustomerLookup {
    /// # Errors
    ///
    /// Returns `AppError::Config` if the HTTP client cannot be built.
    pub fn new(url: &str, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("CRM client: {}", e)))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    /// Build from configuration; `None` when no lookup URL is set
    pub fn from_config(config: &CrmConfig) -> AppResult<Option<Self>> {
        match config.lookup_url.as_deref().filter(|u| !u.trim().is_empty()) {
            Some(url) => Ok(Some(Self::new(
                url.trim(),
                Duration::from_secs(config.lookup_timeout_secs.max(1)),
            )?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl CustomerLookup for HttpCustomerLookup {
    #[instrument(skip(self))]
    async fn resolve_customer_by_phone(&self, phone: &str) -> AppResult<Option<CustomerRecord>> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("phone", phone)])
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("CRM lookup failed: {}", e)))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(AppError::Upstream(format!(
                "CRM lookup returned {}",
                response.status()
            )));
        }

        let record = response
            .json::<Option<CustomerRecord>>()
            .await
            .map_err(|e| AppError::Upstream(format!("CRM lookup body: {}", e)))?;
        debug!(found = record.is_some(), "CRM lookup");
        Ok(record)
    }
}

/// Digits, `*`, `#` and `-` only
pub fn is_valid_phone(phone: &str) -> bool {
    !phone.is_empty()
        && phone
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '*' | '#' | '-'))
}

/// Caller-ID name for `phone`
///
/// `organization:last_namefirst_name` for a known customer, the number itself
/// when unknown or when the lookup fails, and a fixed error text for malformed
/// numbers.
pub async fn cid_name(lookup: &dyn CustomerLookup, phone: &str) -> String {
    let phone = phone.trim();
    if !phone.is_empty() && !is_valid_phone(phone) {
        return CID_VALIDATION_ERROR.to_string();
    }

    match lookup.resolve_customer_by_phone(phone).await {
        Ok(Some(customer)) => customer.caller_id_name(),
        Ok(None) => phone.to_string(),
        Err(e) => {
            warn!(error = %e, phone = %phone, "Customer lookup failed");
            phone.to_string()
        }
    }
}
