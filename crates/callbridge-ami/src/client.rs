//! PBX control client
//!
//! `AmiClient` is the injectable object behind [`PbxCommands`]. It holds at most one
//! live [`ManagerConnection`], connects lazily, recycles the connection after
//! repeated failures, and can run a supervised keepalive/reconnect loop.

use crate::connection::{Action, ManagerConnection};
use crate::constants::RECONNECT_JITTER;
use crate::error::AmiError;
use crate::response::{cli_arg, decode_del, decode_deltree, decode_get, decode_put, decode_show};
use crate::response::ResponseBlock;
use async_trait::async_trait;
use callbridge_core::config::AmiConfig;
use callbridge_core::models::DbEntry;
use callbridge_core::traits::PbxCommands;
use callbridge_core::AppError;
use rand::Rng;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Manager client shared by the directory translator and originate gateway
pub struct AmiClient {
    config: AmiConfig,
    connection: Mutex<Option<Arc<ManagerConnection>>>,
    consecutive_failures: AtomicU32,
}

impl AmiClient {
    /// Create a client; no connection is opened until first use
    pub fn new(config: AmiConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    pub fn config(&self) -> &AmiConfig {
        &self.config
    }

    /// Whether a live, authenticated connection is currently held
    pub async fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .await
            .as_ref()
            .map(|c| c.is_open())
            .unwrap_or(false)
    }

    /// Current live connection, connecting if needed
    async fn acquire(&self) -> Result<Arc<ManagerConnection>, AmiError> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            if conn.is_open() {
                return Ok(conn.clone());
            }
        }

        let conn = Arc::new(ManagerConnection::connect(&self.config).await?);
        *slot = Some(conn.clone());
        self.consecutive_failures.store(0, Ordering::Relaxed);
        Ok(conn)
    }

    /// Log out and forget the current connection; the next call reconnects
    pub async fn disconnect(&self) {
        let conn = self.connection.lock().await.take();
        if let Some(conn) = conn {
            conn.logout().await;
        }
    }

    /// Run one action and track the failure count
    pub async fn send(&self, action: &Action) -> Result<ResponseBlock, AmiError> {
        action.validate()?;
        let conn = self.acquire().await?;

        let result = conn.query(action).await;
        if !conn.is_open() {
            if let Err(e) = &result {
                warn!(server = %conn.server_id(), action = %action.name(), error = %e, "Manager action failed");
            }
            // timed out, truncated or dropped: late bytes must not answer the next action
            warn!(server = %conn.server_id(), "Recycling manager connection");
            self.recycle(&conn).await;
            self.consecutive_failures.store(0, Ordering::Relaxed);
            return result;
        }

        match result {
            Ok(block) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                Ok(block)
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    server = %conn.server_id(),
                    action = %action.name(),
                    failures,
                    error = %e,
                    "Manager action failed"
                );
                if failures >= self.config.max_consecutive_failures {
                    warn!(server = %conn.server_id(), "Recycling manager connection");
                    self.recycle(&conn).await;
                    self.consecutive_failures.store(0, Ordering::Relaxed);
                }
                Err(e)
            }
        }
    }

    async fn cli(&self, command: String) -> Result<ResponseBlock, AmiError> {
        self.send(&Action::command(&command)).await
    }

    /// Keepalive probe on the current connection
    pub async fn ping(&self) -> Result<(), AmiError> {
        let conn = self.acquire().await?;
        match conn.ping().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.recycle(&conn).await;
                Err(e)
            }
        }
    }

    /// Drop `conn` if it is still the held connection
    async fn recycle(&self, conn: &Arc<ManagerConnection>) {
        let stale = {
            let mut slot = self.connection.lock().await;
            match slot.as_ref() {
                Some(current) if Arc::ptr_eq(current, conn) => slot.take(),
                _ => None,
            }
        };
        if let Some(stale) = stale {
            stale.logout().await;
        }
    }

    /// Keep the connection alive until `cancel` fires
    ///
    /// Connects, then pings every `keepalive_secs`. On failure it waits a bounded
    /// exponential backoff with jitter before the next attempt.
    #[instrument(skip(self, cancel), fields(server = %self.config.addr()))]
    pub async fn run_supervisor(self: Arc<Self>, cancel: CancellationToken) {
        let initial = Duration::from_millis(self.config.reconnect_initial_ms.max(1));
        let max = Duration::from_millis(self.config.reconnect_max_ms).max(initial);
        let keepalive = Duration::from_secs(self.config.keepalive_secs.max(1));
        let mut delay = initial;

        while !cancel.is_cancelled() {
            match self.acquire().await {
                Ok(_) => {
                    info!("Manager connection ready");
                    delay = initial;
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                self.disconnect().await;
                                return;
                            }
                            _ = sleep(keepalive) => {}
                        }
                        if let Err(e) = self.ping().await {
                            warn!(error = %e, "Manager keepalive failed");
                            break;
                        }
                        debug!("Manager keepalive ok");
                    }
                }
                Err(e) => error!(error = %e, "Manager connection failed"),
            }

            let wait = with_jitter(delay);
            warn!(wait_ms = wait.as_millis() as u64, "Reconnecting to manager");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(wait) => {}
            }
            delay = next_backoff(delay, max);
        }

        self.disconnect().await;
    }

    fn check_args(&self, op: &str, args: &[&str]) -> bool {
        if args.iter().any(|a| a.contains('\r') || a.contains('\n')) {
            warn!(op = %op, "Rejected database argument containing a line break");
            return false;
        }
        true
    }
}

/// Double the delay, capped at `max`
pub fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

/// Spread a delay by up to ±20 %
pub fn with_jitter(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range((1.0 - RECONNECT_JITTER)..=(1.0 + RECONNECT_JITTER));
    delay.mul_f64(factor)
}

#[async_trait]
impl PbxCommands for AmiClient {
    async fn get_value(&self, family: &str, key: &str) -> String {
        if !self.check_args("get", &[family, key]) {
            return String::new();
        }
        match self
            .cli(format!("database get {} {}", cli_arg(family), cli_arg(key)))
            .await
        {
            Ok(block) => decode_get(&block).into_value(),
            Err(_) => String::new(),
        }
    }

    async fn put_value(&self, family: &str, key: &str, value: &str) -> bool {
        if !self.check_args("put", &[family, key, value]) {
            return false;
        }
        match self
            .cli(format!(
                "database put {} {} {}",
                cli_arg(family),
                cli_arg(key),
                cli_arg(value)
            ))
            .await
        {
            Ok(block) => decode_put(&block).is_success(),
            Err(_) => false,
        }
    }

    async fn delete_value(&self, family: &str, key: &str) -> bool {
        if !self.check_args("del", &[family, key]) {
            return false;
        }
        match self
            .cli(format!("database del {} {}", cli_arg(family), cli_arg(key)))
            .await
        {
            Ok(block) => decode_del(&block).is_success(),
            Err(_) => false,
        }
    }

    async fn delete_namespace(&self, family: &str) -> bool {
        if !self.check_args("deltree", &[family]) {
            return false;
        }
        match self.cli(format!("database deltree {}", cli_arg(family))).await {
            Ok(block) => decode_deltree(&block).is_success(),
            Err(_) => false,
        }
    }

    async fn show_namespace(&self, family: &str) -> Vec<DbEntry> {
        if !self.check_args("show", &[family]) {
            return Vec::new();
        }
        match self.cli(format!("database show {}", cli_arg(family))).await {
            Ok(block) => decode_show(&block, family).into_entries(),
            Err(_) => Vec::new(),
        }
    }

    async fn exec_command(&self, command: &str) -> Result<String, AppError> {
        let block = self.cli(command.to_string()).await?;
        if block.is_error() {
            return Err(AppError::Pbx(
                block.message().unwrap_or("command rejected").to_string(),
            ));
        }
        Ok(block.text())
    }
}
