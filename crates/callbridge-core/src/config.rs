//! Application configuration
//!
//! This module provides centralized configuration management using the `config` crate.
//! Configuration can be loaded from environment variables and config files.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub ami: AmiConfig,
    pub auth: AuthConfig,
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub webphone: WebPhoneConfig,
    #[serde(default)]
    pub originate: OriginateConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub crm: CrmConfig,
    #[serde(default)]
    pub subscriber: SubscriberConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Allowed CORS origins, comma separated
    #[serde(default = "default_cors_origins")]
    pub cors_origins: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8989
}

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_cors_origins() -> String {
    "http://localhost,http://127.0.0.1".to_string()
}

/// Asterisk Manager Interface connection settings
#[derive(Debug, Deserialize, Clone)]
pub struct AmiConfig {
    /// When false the bridge runs against an in-memory PBX database
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Manager host
    #[serde(default = "default_ami_host")]
    pub host: String,

    /// Manager port
    #[serde(default = "default_ami_port")]
    pub port: u16,

    /// Manager user (`[user]` section in manager.conf)
    pub username: String,

    /// Manager secret
    pub secret: String,

    /// TCP connect timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Per-line read timeout in milliseconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// Failed queries in a row before the connection is recycled
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,

    /// Interval between keepalive pings
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,

    /// First reconnect delay in milliseconds
    #[serde(default = "default_reconnect_initial")]
    pub reconnect_initial_ms: u64,

    /// Upper bound for the reconnect delay in milliseconds
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_ms: u64,
}

fn default_ami_host() -> String {
    "127.0.0.1".to_string()
}

fn default_ami_port() -> u16 {
    5038
}

fn default_connect_timeout() -> u64 {
    3000
}

fn default_read_timeout() -> u64 {
    1000
}

fn default_max_failures() -> u32 {
    3
}

fn default_keepalive() -> u64 {
    30
}

fn default_reconnect_initial() -> u64 {
    1000
}

fn default_reconnect_max() -> u64 {
    60000
}

impl AmiConfig {
    /// Build a configuration with default timeouts
    pub fn new(host: &str, port: u16, username: &str, secret: &str) -> Self {
        Self {
            enabled: true,
            host: host.to_string(),
            port,
            username: username.to_string(),
            secret: secret.to_string(),
            connect_timeout_ms: default_connect_timeout(),
            read_timeout_ms: default_read_timeout(),
            max_consecutive_failures: default_max_failures(),
            keepalive_secs: default_keepalive(),
            reconnect_initial_ms: default_reconnect_initial(),
            reconnect_max_ms: default_reconnect_max(),
        }
    }

    /// `host:port` string used for connecting and logging
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Token and API credential configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// Shared secret for web-phone tokens (HS256)
    pub jwt_secret: String,

    /// Web-phone token lifetime in seconds
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: i64,

    /// Bearer secret for operator endpoints (token minting, dial, directory, PBX leg)
    pub api_token: String,
}

fn default_token_ttl() -> i64 {
    3600 // 1 hour
}

/// Push hub configuration
#[derive(Debug, Deserialize, Clone)]
pub struct NotifierConfig {
    /// Shared secret expected in `?token=` on the trigger endpoint
    pub trigger_token: String,

    /// Addresses or CIDRs allowed to call the trigger endpoint (empty denies all)
    #[serde(default = "default_trigger_allow")]
    pub trigger_allow: String,

    /// Addresses or CIDRs allowed to open the push WebSocket (empty denies all)
    #[serde(default = "default_subscriber_allow")]
    pub subscriber_allow: String,

    /// Per-subscriber outbound queue size
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Write deadline for a single push message
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,

    /// Keepalive ping interval
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
}

fn default_trigger_allow() -> String {
    "127.0.0.1,::1".to_string()
}

fn default_subscriber_allow() -> String {
    "0.0.0.0/0,::/0".to_string()
}

fn default_queue_capacity() -> usize {
    256
}

fn default_write_timeout() -> u64 {
    10
}

fn default_ping_interval() -> u64 {
    30
}

impl NotifierConfig {
    /// Configuration suitable for tests and embedded use
    pub fn with_token(trigger_token: &str) -> Self {
        Self {
            trigger_token: trigger_token.to_string(),
            trigger_allow: default_trigger_allow(),
            subscriber_allow: default_subscriber_allow(),
            queue_capacity: default_queue_capacity(),
            write_timeout_secs: default_write_timeout(),
            ping_interval_secs: default_ping_interval(),
        }
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

/// Web-phone session configuration
#[derive(Debug, Deserialize, Clone)]
pub struct WebPhoneConfig {
    /// Audio frames buffered per direction before the oldest is dropped
    #[serde(default = "default_audio_queue")]
    pub audio_queue_frames: usize,

    /// Samples per PCM frame (20 ms at 16 kHz)
    #[serde(default = "default_frame_samples")]
    pub frame_samples: usize,

    /// PCM sample rate
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Control-signal queue size per connection
    #[serde(default = "default_signal_queue")]
    pub signal_queue: usize,
}

fn default_audio_queue() -> usize {
    50
}

fn default_frame_samples() -> usize {
    320
}

fn default_sample_rate() -> u32 {
    16000
}

fn default_signal_queue() -> usize {
    64
}

impl Default for WebPhoneConfig {
    fn default() -> Self {
        Self {
            audio_queue_frames: default_audio_queue(),
            frame_samples: default_frame_samples(),
            sample_rate: default_sample_rate(),
            signal_queue: default_signal_queue(),
        }
    }
}

impl WebPhoneConfig {
    /// Size in bytes of one little-endian 16-bit mono frame
    pub fn frame_bytes(&self) -> usize {
        self.frame_samples * 2
    }
}

/// Click-to-call configuration
#[derive(Debug, Deserialize, Clone)]
pub struct OriginateConfig {
    /// When false, dial requests are validated but not sent to the PBX
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Prefix prepended to external numbers (e.g. "0" for an outside line)
    #[serde(default)]
    pub outbound_prefix: String,

    /// Dialplan context that rings the caller's own phone
    #[serde(default = "default_inside_context")]
    pub inside_context: String,

    /// Dialplan context used to reach the destination
    #[serde(default = "default_outside_context")]
    pub outside_context: String,

    /// Destinations up to this many characters are treated as internal extensions
    #[serde(default = "default_internal_max_len")]
    pub internal_max_len: usize,
}

fn default_true() -> bool {
    true
}

fn default_inside_context() -> String {
    "c2c-inside".to_string()
}

fn default_outside_context() -> String {
    "c2c-outside".to_string()
}

fn default_internal_max_len() -> usize {
    5
}

impl Default for OriginateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            outbound_prefix: String::new(),
            inside_context: default_inside_context(),
            outside_context: default_outside_context(),
            internal_max_len: default_internal_max_len(),
        }
    }
}

/// PBX directory layout
#[derive(Debug, Deserialize, Clone)]
pub struct DirectoryConfig {
    /// Channel technology of the fixed endpoint slots
    #[serde(default = "default_endpoint_tech")]
    pub endpoint_tech: String,

    /// Name prefix of the fixed endpoint slots (`phone1`, `phone2`, ...)
    #[serde(default = "default_endpoint_prefix")]
    pub endpoint_prefix: String,

    /// Number of endpoint slots scanned for routing targets
    #[serde(default = "default_endpoint_slots")]
    pub endpoint_slots: u32,

    /// Number of ring-group slots scanned for routing targets
    #[serde(default = "default_group_slots")]
    pub group_slots: u32,
}

fn default_endpoint_tech() -> String {
    "PJSIP".to_string()
}

fn default_endpoint_prefix() -> String {
    "phone".to_string()
}

fn default_endpoint_slots() -> u32 {
    32
}

fn default_group_slots() -> u32 {
    16
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            endpoint_tech: default_endpoint_tech(),
            endpoint_prefix: default_endpoint_prefix(),
            endpoint_slots: default_endpoint_slots(),
            group_slots: default_group_slots(),
        }
    }
}

/// PBX event listener configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct EventsConfig {
    /// Start the AMI event listener alongside the HTTP trigger
    #[serde(default)]
    pub enabled: bool,

    /// Trunk names (comma separated) whose channels count as external
    #[serde(default)]
    pub external_trunks: String,
}

impl EventsConfig {
    pub fn external_trunk_list(&self) -> Vec<String> {
        split_list(&self.external_trunks)
    }
}

/// CRM collaborator configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CrmConfig {
    /// Customer lookup endpoint; lookups are disabled when unset
    #[serde(default)]
    pub lookup_url: Option<String>,

    /// Lookup request timeout
    #[serde(default = "default_lookup_timeout")]
    pub lookup_timeout_secs: u64,

    /// Page opened for a popup
    #[serde(default = "default_popup_base_url")]
    pub popup_base_url: String,

    /// Number of rotating popup tabs
    #[serde(default = "default_max_tabs")]
    pub max_tabs: u32,
}

fn default_lookup_timeout() -> u64 {
    3
}

fn default_popup_base_url() -> String {
    "index.php".to_string()
}

fn default_max_tabs() -> u32 {
    4
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            lookup_url: None,
            lookup_timeout_secs: default_lookup_timeout(),
            popup_base_url: default_popup_base_url(),
            max_tabs: default_max_tabs(),
        }
    }
}

/// Subscriber-side (popup listener) configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SubscriberConfig {
    /// Push hub URL
    #[serde(default = "default_subscriber_url")]
    pub url: String,

    /// Own extension; broadcast-only when unset
    #[serde(default)]
    pub extension: Option<String>,

    /// Wait before reconnecting after an unexpected close
    #[serde(default = "default_subscriber_backoff")]
    pub reconnect_ms: u64,
}

fn default_subscriber_url() -> String {
    "ws://127.0.0.1:8989/crmws".to_string()
}

fn default_subscriber_backoff() -> u64 {
    5000
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            url: default_subscriber_url(),
            extension: None,
            reconnect_ms: default_subscriber_backoff(),
        }
    }
}

/// Split a comma-separated setting, dropping blanks
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl AppConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8989)?
            .set_default("server.workers", num_cpus::get() as i64)?
            .set_default("ami.host", "127.0.0.1")?
            .set_default("ami.port", 5038)?
            .set_default("ami.connect_timeout_ms", 3000)?
            .set_default("ami.read_timeout_ms", 1000)?
            .set_default("auth.token_ttl_secs", 3600)?
            .set_default("notifier.queue_capacity", 256)?
            .set_default("notifier.write_timeout_secs", 10)?
            .set_default("originate.inside_context", "c2c-inside")?
            .set_default("originate.outside_context", "c2c-outside")?
            .set_default("originate.internal_max_len", 5)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with CALLBRIDGE_ prefix
            .add_source(
                Environment::with_prefix("CALLBRIDGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("CALLBRIDGE").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Get the server bind address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Settings read by the desk-side popup listener
///
/// Only the subscriber and CRM sections; the listener holds no server secrets.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ListenerConfig {
    #[serde(default)]
    pub subscriber: SubscriberConfig,
    #[serde(default)]
    pub crm: CrmConfig,
}

impl ListenerConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Config::builder()
            .add_source(File::with_name("config/listener").required(false))
            .add_source(
                Environment::with_prefix("CALLBRIDGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
