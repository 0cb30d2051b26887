//! Common traits for PBX access and collaborators
//!
//! Implemented by the live manager client, the in-memory PBX and test doubles.

use crate::error::AppError;
use crate::models::{CustomerRecord, DbEntry};
use async_trait::async_trait;

/// Commands the bridge issues against the PBX
///
/// Database operations follow the PBX's own convention: a missing key reads as an
/// empty string and a failed write reports `false`. None of them return an error for
/// an unreachable PBX; they log and return the sentinel instead.
#[async_trait]
pub trait PbxCommands: Send + Sync {
    /// Read `family/key`; empty when missing or on failure
    async fn get_value(&self, family: &str, key: &str) -> String;

    /// Write `family/key = value`
    async fn put_value(&self, family: &str, key: &str, value: &str) -> bool;

    /// Remove `family/key`
    async fn delete_value(&self, family: &str, key: &str) -> bool;

    /// Remove every key under `family`
    async fn delete_namespace(&self, family: &str) -> bool;

    /// List every key under `family`, keys relative to the family
    async fn show_namespace(&self, family: &str) -> Vec<DbEntry>;

    /// Run a CLI command and return its output text
    ///
    /// # Errors
    ///
    /// Returns an error when the PBX is unreachable or rejects the command.
    async fn exec_command(&self, command: &str) -> Result<String, AppError>;

    /// Run a CLI command; empty output on failure
    async fn exec_raw(&self, command: &str) -> String {
        self.exec_command(command).await.unwrap_or_default()
    }
}

/// Customer lookup by phone number (CRM collaborator)
#[async_trait]
pub trait CustomerLookup: Send + Sync {
    /// Find the customer owning `phone`
    async fn resolve_customer_by_phone(
        &self,
        phone: &str,
    ) -> Result<Option<CustomerRecord>, AppError>;
}
