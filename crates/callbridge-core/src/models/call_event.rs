//! Incoming-call notification model
//!
//! A `CallEvent` is what the push hub fans out to browser subscribers. On the wire it
//! travels inside a small JSON envelope:
//!
//! ```json
//! {"type":"CALL_IN","data":{"phone":"0312345678","exten":"2001"}}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Target value that addresses every subscriber
pub const BROADCAST_TARGET: &str = "all";

/// Kind of call event carried by the envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CallEventKind {
    /// Inbound call ringing at (or answered by) an internal extension
    #[default]
    #[serde(rename = "CALL_IN")]
    IncomingCall,
}

/// An inbound-call notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEvent {
    pub kind: CallEventKind,

    /// Caller number
    pub phone: String,

    /// Extension the call is for; `None`, empty or `"all"` means everyone
    pub target_extension: Option<String>,

    /// When the bridge learned about the call
    pub received_at: DateTime<Utc>,
}

impl CallEvent {
    /// Create an incoming-call event
    pub fn incoming(phone: impl Into<String>, target_extension: Option<String>) -> Self {
        Self {
            kind: CallEventKind::IncomingCall,
            phone: phone.into(),
            target_extension,
            received_at: Utc::now(),
        }
    }

    /// Whether the event should reach every subscriber
    pub fn is_broadcast(&self) -> bool {
        is_broadcast_target(self.target_extension.as_deref())
    }

    /// Whether a subscriber registered for `extension` should receive this event
    pub fn is_for(&self, extension: Option<&str>) -> bool {
        if self.is_broadcast() {
            return true;
        }
        matches!(
            (self.target_extension.as_deref(), extension),
            (Some(target), Some(own)) if target == own
        )
    }

    /// Wire envelope for this event
    pub fn envelope(&self) -> CallEventEnvelope {
        CallEventEnvelope {
            kind: self.kind,
            data: CallEventData {
                phone: self.phone.clone(),
                exten: self.target_extension.clone(),
            },
        }
    }

    /// Serialize to the JSON text pushed to subscribers
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.envelope())
    }
}

/// `true` for absent, empty or `"all"` targets
pub fn is_broadcast_target(target: Option<&str>) -> bool {
    match target {
        None => true,
        Some(t) => t.is_empty() || t == BROADCAST_TARGET,
    }
}

/// JSON envelope `{"type": ..., "data": {...}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEventEnvelope {
    #[serde(rename = "type")]
    pub kind: CallEventKind,
    pub data: CallEventData,
}

/// Envelope payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEventData {
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exten: Option<String>,
}

impl From<CallEventEnvelope> for CallEvent {
    fn from(envelope: CallEventEnvelope) -> Self {
        CallEvent::incoming(envelope.data.phone, envelope.data.exten)
    }
}
