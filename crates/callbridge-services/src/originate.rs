//! Outbound originate gateway
//!
//! Click-to-call: ring the caller's own phone through the inside context and, once
//! it answers, dial the destination through the outside context. The request is
//! accepted as soon as the PBX takes the command; call progress is reported through
//! the push and signaling channels, not here.

use callbridge_core::config::OriginateConfig;
use callbridge_core::traits::PbxCommands;
use callbridge_core::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// An originate request the PBX accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DialAccepted {
    /// Channel rung first, e.g. `Local/2001@c2c-inside`
    pub channel: String,
    /// Number dialed, prefix included
    pub destination: String,
    /// CLI command issued
    pub command: String,
    /// The PBX was not contacted
    pub simulated: bool,
    pub accepted_at: DateTime<Utc>,
}

/// Remove hyphens from a destination made of digits, `*`, `#` and `-`
///
/// # Errors
///
/// Returns `AppError::Validation` for any other character or an empty result.
pub fn clean_destination(raw: &str) -> AppResult<String> {
    let raw = raw.trim();
    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit() || matches!(c, '*' | '#' | '-')) {
        return Err(AppError::Validation(format!("invalid destination: {}", raw)));
    }
    let cleaned: String = raw.chars().filter(|c| *c != '-').collect();
    if cleaned.is_empty() {
        return Err(AppError::Validation("destination has no digits".into()));
    }
    Ok(cleaned)
}

/// Originate gateway over the PBX command channel
pub struct OriginateGateway {
    pbx: Arc<dyn PbxCommands>,
    config: OriginateConfig,
}

impl OriginateGateway {
    pub fn new(pbx: Arc<dyn PbxCommands>, config: OriginateConfig) -> Self {
        Self { pbx, config }
    }

    pub fn is_simulated(&self) -> bool {
        !self.config.enabled
    }

    /// Destination with the outbound prefix applied to external numbers
    ///
    /// Numbers up to `internal_max_len` characters are internal and dialed as is.
    pub fn apply_prefix(&self, cleaned: &str) -> String {
        if cleaned.len() > self.config.internal_max_len {
            format!("{}{}", self.config.outbound_prefix, cleaned)
        } else {
            cleaned.to_string()
        }
    }

    /// Build the originate command for a caller and a raw destination
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for a non-numeric caller extension or a
    /// destination with characters other than digits, `*`, `#` and `-`.
    pub fn build(&self, caller_extension: &str, destination_raw: &str) -> AppResult<DialAccepted> {
        let caller = caller_extension.trim();
        if caller.is_empty() || !caller.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AppError::Validation(format!(
                "invalid caller extension: {}",
                caller
            )));
        }

        let destination = self.apply_prefix(&clean_destination(destination_raw)?);
        let channel = format!("Local/{}@{}", caller, self.config.inside_context);
        let command = format!(
            "channel originate {} extension {}@{}",
            channel, destination, self.config.outside_context
        );

        Ok(DialAccepted {
            channel,
            destination,
            command,
            simulated: self.is_simulated(),
            accepted_at: Utc::now(),
        })
    }

    /// Originate a call from `caller_extension` to `destination_raw`
    ///
    /// # Errors
    ///
    /// - `AppError::Validation` for malformed input (see [`build`](Self::build))
    /// - PBX errors (`AmiConnect`, `Pbx`, ...) when the command cannot be issued
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use std::sync::Arc;
    /// # use callbridge_core::config::OriginateConfig;
    /// # use callbridge_services::{MemoryPbx, OriginateGateway};
    /// # async fn demo() -> callbridge_core::AppResult<()> {
    /// let gateway = OriginateGateway::new(Arc::new(MemoryPbx::new()), OriginateConfig::default());
    /// let accepted = gateway.dial("2001", "03-1234-5678").await?;
    /// assert_eq!(accepted.destination, "0312345678");
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip(self))]
    pub async fn dial(
        &self,
        caller_extension: &str,
        destination_raw: &str,
    ) -> AppResult<DialAccepted> {
        let accepted = self.build(caller_extension, destination_raw)?;

        if accepted.simulated {
            info!(command = %accepted.command, "Simulated originate");
            return Ok(accepted);
        }

        if let Err(e) = self.pbx.exec_command(&accepted.command).await {
            warn!(error = %e, command = %accepted.command, "Originate failed");
            return Err(e);
        }

        info!(
            channel = %accepted.channel,
            destination = %accepted.destination,
            "Originate accepted"
        );
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryPbx;

    fn gateway(prefix: &str, enabled: bool) -> (Arc<MemoryPbx>, OriginateGateway) {
        let pbx = Arc::new(MemoryPbx::new());
        let config = OriginateConfig {
            enabled,
            outbound_prefix: prefix.to_string(),
            ..Default::default()
        };
        (pbx.clone(), OriginateGateway::new(pbx, config))
    }

    #[test]
    fn test_clean_destination() {
        assert_eq!(clean_destination("03-1234-5678").unwrap(), "0312345678");
        assert_eq!(clean_destination("*67#").unwrap(), "*67#");
        assert!(clean_destination("03 1234").is_err());
        assert!(clean_destination("abc").is_err());
        assert!(clean_destination("---").is_err());
        assert!(clean_destination("").is_err());
    }

    #[tokio::test]
    async fn test_external_number_gets_prefix() {
        let (pbx, gateway) = gateway("0", true);
        let accepted = gateway.dial("2001", "03-1234-5678").await.unwrap();
        assert_eq!(accepted.destination, "00312345678");
        assert_eq!(
            accepted.command,
            "channel originate Local/2001@c2c-inside extension 00312345678@c2c-outside"
        );
        assert_eq!(pbx.history(), vec![accepted.command.clone()]);
    }

    #[tokio::test]
    async fn test_internal_number_has_no_prefix() {
        let (_, gateway) = gateway("0", true);
        let accepted = gateway.dial("2001", "201").await.unwrap();
        assert_eq!(accepted.destination, "201");

        // exactly at the threshold is still internal
        assert_eq!(gateway.apply_prefix("12345"), "12345");
        assert_eq!(gateway.apply_prefix("123456"), "0123456");
    }

    #[tokio::test]
    async fn test_validation_errors_do_not_reach_pbx() {
        let (pbx, gateway) = gateway("0", true);
        assert!(matches!(
            gateway.dial("2001", "03-1234-abcd").await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            gateway.dial("20a1", "201").await,
            Err(AppError::Validation(_))
        ));
        assert!(pbx.history().is_empty());
    }

    #[tokio::test]
    async fn test_pbx_failure_propagates() {
        let (pbx, gateway) = gateway("", true);
        pbx.set_offline(true);
        assert!(matches!(
            gateway.dial("2001", "201").await,
            Err(AppError::AmiConnect(_))
        ));
    }

    #[tokio::test]
    async fn test_simulation_skips_pbx() {
        let (pbx, gateway) = gateway("0", false);
        let accepted = gateway.dial("2001", "0312345678").await.unwrap();
        assert!(accepted.simulated);
        assert!(pbx.history().is_empty());
    }
}
