//! Web-phone control signals and call state

use serde::{Deserialize, Serialize};
use std::fmt;

/// Text control token exchanged on the signaling channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Ringing,
    Answer,
    Hangup,
    Busy,
    Kicked,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Ringing => "RINGING",
            Signal::Answer => "ANSWER",
            Signal::Hangup => "HANGUP",
            Signal::Busy => "BUSY",
            Signal::Kicked => "KICKED",
        }
    }

    /// Parse a control token (surrounding whitespace ignored, case-sensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "RINGING" => Some(Signal::Ringing),
            "ANSWER" => Some(Signal::Answer),
            "HANGUP" => Some(Signal::Hangup),
            "BUSY" => Some(Signal::Busy),
            "KICKED" => Some(Signal::Kicked),
            _ => None,
        }
    }

    /// Signals after which the client must not reconnect on its own
    pub fn is_rejection(&self) -> bool {
        matches!(self, Signal::Busy | Signal::Kicked)
    }

    /// Signals that end a call
    pub fn ends_call(&self) -> bool {
        matches!(self, Signal::Hangup | Signal::Busy | Signal::Kicked)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a web-phone session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    #[default]
    Disconnected,
    Idle,
    Ringing,
    Talking,
}

impl CallState {
    /// A call is ringing or in progress
    pub fn in_call(&self) -> bool {
        matches!(self, CallState::Ringing | CallState::Talking)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallState::Disconnected => write!(f, "disconnected"),
            CallState::Idle => write!(f, "idle"),
            CallState::Ringing => write!(f, "ringing"),
            CallState::Talking => write!(f, "talking"),
        }
    }
}
