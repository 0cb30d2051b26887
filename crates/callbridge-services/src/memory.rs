//! In-memory PBX database
//!
//! `MemoryPbx` implements [`PbxCommands`] over a sorted map. The server uses it when
//! the manager connection is disabled (`ami.enabled = false`), and the tests use it
//! as a fake.

use async_trait::async_trait;
use callbridge_core::models::DbEntry;
use callbridge_core::traits::PbxCommands;
use callbridge_core::AppError;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// PBX stand-in keeping `family/key` rows in memory
#[derive(Debug, Default)]
pub struct MemoryPbx {
    rows: Mutex<BTreeMap<String, String>>,
    /// Canned CLI output keyed by exact command text
    outputs: Mutex<HashMap<String, String>>,
    /// Every command passed to `exec_command`
    history: Mutex<Vec<String>>,
    /// When set, every operation fails as if the PBX were down
    offline: Mutex<bool>,
}

fn row_key(family: &str, key: &str) -> String {
    format!("{}/{}", family.trim_matches('/'), key.trim_matches('/'))
}

impl MemoryPbx {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed one row
    pub fn with_row(self, family: &str, key: &str, value: &str) -> Self {
        self.rows
            .lock()
            .insert(row_key(family, key), value.to_string());
        self
    }

    /// Register the output returned for `command`
    pub fn set_output(&self, command: &str, output: &str) {
        self.outputs
            .lock()
            .insert(command.to_string(), output.to_string());
    }

    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock() = offline;
    }

    fn is_offline(&self) -> bool {
        *self.offline.lock()
    }

    /// Value of `family/key`, if present
    pub fn row(&self, family: &str, key: &str) -> Option<String> {
        self.rows.lock().get(&row_key(family, key)).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }

    /// Commands executed so far
    pub fn history(&self) -> Vec<String> {
        self.history.lock().clone()
    }
}

#[async_trait]
impl PbxCommands for MemoryPbx {
    async fn get_value(&self, family: &str, key: &str) -> String {
        if self.is_offline() {
            return String::new();
        }
        self.row(family, key).unwrap_or_default()
    }

    async fn put_value(&self, family: &str, key: &str, value: &str) -> bool {
        if self.is_offline() {
            return false;
        }
        debug!(family = %family, key = %key, value = %value, "put");
        self.rows
            .lock()
            .insert(row_key(family, key), value.to_string());
        true
    }

    async fn delete_value(&self, family: &str, key: &str) -> bool {
        if self.is_offline() {
            return false;
        }
        self.rows.lock().remove(&row_key(family, key)).is_some()
    }

    async fn delete_namespace(&self, family: &str) -> bool {
        if self.is_offline() {
            return false;
        }
        let prefix = format!("{}/", family.trim_matches('/'));
        let mut rows = self.rows.lock();
        let before = rows.len();
        rows.retain(|k, _| !k.starts_with(&prefix));
        rows.len() != before
    }

    async fn show_namespace(&self, family: &str) -> Vec<DbEntry> {
        if self.is_offline() {
            return Vec::new();
        }
        let prefix = format!("{}/", family.trim_matches('/'));
        self.rows
            .lock()
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(&prefix).map(|key| DbEntry {
                    key: key.to_string(),
                    value: v.clone(),
                })
            })
            .collect()
    }

    async fn exec_command(&self, command: &str) -> Result<String, AppError> {
        self.history.lock().push(command.to_string());
        if self.is_offline() {
            return Err(AppError::AmiConnect("in-memory PBX is offline".into()));
        }
        Ok(self.outputs.lock().get(command).cloned().unwrap_or_default())
    }
}
