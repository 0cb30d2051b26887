//! Asterisk Manager Interface (AMI) integration for CallBridge
//!
//! This crate provides the PBX control client used by the directory translator and
//! the originate gateway, plus an event listener that turns bridged inbound calls
//! into call events.
//!
//! # Features
//!
//! - TCP connection management with login/logoff
//! - Blank-line framed request/response exchange with per-line read timeouts
//! - Typed decoders for the PBX database command replies
//! - Lazy connection with failure counting and a supervised reconnect loop
//! - Channel tracking for bridge-based popup detection
//!
//! # Architecture
//!
//! ```text
//! Asterisk Manager (TCP 5038)
//!         |
//!         v
//!  ManagerConnection (framing, login)
//!         |
//!    +----+---------------------+
//!    v                          v
//!  AmiClient (PbxCommands)    EventListener (Events: on)
//!    |                          |
//!    v                          v
//!  Directory / Originate      ChannelTracker -> CallEvent
//! ```
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use callbridge_ami::AmiClient;
//! use callbridge_core::config::AmiConfig;
//! use callbridge_core::traits::PbxCommands;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = AmiClient::new(AmiConfig::new("127.0.0.1", 5038, "admin", "secret"));
//!     let ext = client.get_value("ABS/ERV", "PJSIP/phone1").await;
//!     println!("phone1 -> {}", ext);
//! }
//! ```

pub mod client;
pub mod connection;
pub mod error;
pub mod event;
pub mod listener;
pub mod response;

pub use client::AmiClient;
pub use connection::{Action, ConnectionState, ManagerConnection};
pub use error::AmiError;
pub use event::AmiEvent;
pub use listener::{ChannelTracker, EventListener};
pub use response::{DbReply, ResponseBlock};

/// AMI protocol constants
pub mod constants {
    /// Default manager port
    pub const DEFAULT_PORT: u16 = 5038;

    /// Prefix of the greeting line sent on connect
    pub const BANNER_PREFIX: &str = "Asterisk Call Manager";

    /// Marker of a successful login
    pub const LOGIN_ACCEPTED: &str = "Message: Authentication accepted";

    /// Marker of a successful `database get`
    pub const VALUE_MARKER: &str = "Value: ";

    /// Marker of a successful `database put`
    pub const PUT_MARKER: &str = "Updated database successfully";

    /// Marker of a successful `database del`
    pub const DEL_MARKER: &str = "Database entry removed.";

    /// Marker of a successful `database deltree`
    pub const DELTREE_MARKER: &str = "database entries removed.";

    /// Trailer line of a `database show` listing
    pub const SHOW_TRAILER: &str = "results found";

    /// Prefix of command output lines
    pub const OUTPUT_PREFIX: &str = "Output: ";

    /// Trailer of a legacy command response
    pub const END_COMMAND: &str = "--END COMMAND--";

    /// Initial reconnection delay in milliseconds
    pub const INITIAL_RECONNECT_DELAY_MS: u64 = 1000;

    /// Maximum reconnection delay in milliseconds
    pub const MAX_RECONNECT_DELAY_MS: u64 = 60000;

    /// Backoff jitter as a fraction of the delay
    pub const RECONNECT_JITTER: f64 = 0.2;

    /// Wait for the logoff reply before closing, in milliseconds
    pub const LOGOFF_WAIT_MS: u64 = 200;
}

/// AMI events used for popup detection
pub mod events {
    /// Channel created
    pub const NEWCHANNEL: &str = "Newchannel";

    /// Channel state changed
    pub const NEWSTATE: &str = "Newstate";

    /// Channel joined a bridge
    pub const BRIDGE_ENTER: &str = "BridgeEnter";

    /// Channel hung up
    pub const HANGUP: &str = "Hangup";

    /// All events the listener acts on
    pub const CALL_EVENTS: &[&str] = &[NEWCHANNEL, NEWSTATE, BRIDGE_ENTER, HANGUP];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(constants::DEFAULT_PORT, 5038);
        assert!(constants::MAX_RECONNECT_DELAY_MS > constants::INITIAL_RECONNECT_DELAY_MS);
    }

    #[test]
    fn test_call_events() {
        assert!(events::CALL_EVENTS.contains(&events::BRIDGE_ENTER));
        assert!(events::CALL_EVENTS.contains(&events::HANGUP));
    }
}
