//! AMI event parsing and representation
//!
//! This module handles parsing manager event blocks and provides convenient access
//! to the headers used for channel tracking.

use crate::response::ResponseBlock;
use std::collections::HashMap;
use std::fmt;

/// AMI Event structure
///
/// Represents a parsed manager block with headers as key-value pairs.
#[derive(Debug, Clone, Default)]
pub struct AmiEvent {
    /// Event headers (key-value pairs)
    headers: HashMap<String, String>,
}

impl AmiEvent {
    /// Create a new empty event
    pub fn new() -> Self {
        Self {
            headers: HashMap::new(),
        }
    }

    /// Parse an event from raw text
    ///
    /// Manager events are formatted as:
    /// ```text
    /// Event: Newchannel
    /// Channel: PJSIP/phone1-00000001
    /// Uniqueid: 1700000000.1
    /// ```
    ///
    /// Parsing stops at the first blank line.
    pub fn parse(raw: &str) -> Self {
        let mut headers = HashMap::new();

        for line in raw.lines() {
            if line.trim().is_empty() {
                break;
            }
            insert_header(&mut headers, line);
        }

        Self { headers }
    }

    /// Build from a reply block read off the wire
    pub fn from_block(block: &ResponseBlock) -> Self {
        let mut headers = HashMap::new();
        for line in block.lines() {
            insert_header(&mut headers, line);
        }
        Self { headers }
    }

    /// Get a header value by name
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|s| s.as_str())
    }

    /// Get a header value, treating empty values as absent
    fn non_empty(&self, name: &str) -> Option<&str> {
        self.get_header(name).filter(|v| !v.is_empty())
    }

    /// Get all headers
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Set a header
    pub fn set_header(&mut self, key: &str, value: &str) {
        self.headers.insert(key.to_string(), value.to_string());
    }

    /// Event name (`Event` header)
    pub fn event_name(&self) -> Option<&str> {
        self.non_empty("Event")
    }

    /// Channel unique id
    pub fn unique_id(&self) -> Option<&str> {
        self.non_empty("Uniqueid")
    }

    /// Id shared by every channel of one call
    pub fn linked_id(&self) -> Option<&str> {
        self.non_empty("Linkedid")
    }

    /// Channel name, e.g. `PJSIP/phone1-00000001`
    pub fn channel(&self) -> Option<&str> {
        self.non_empty("Channel")
    }

    /// Caller-ID number of the channel
    pub fn caller_id_num(&self) -> Option<&str> {
        self.non_empty("CallerIDNum")
    }

    /// Caller-ID name of the channel
    pub fn caller_id_name(&self) -> Option<&str> {
        self.non_empty("CallerIDName")
    }

    /// Channel state description (`Up`, `Ringing`, ...)
    pub fn channel_state_desc(&self) -> Option<&str> {
        self.non_empty("ChannelStateDesc")
    }

    /// Bridge id for bridge events
    pub fn bridge_id(&self) -> Option<&str> {
        self.non_empty("BridgeUniqueid")
    }

    /// `true` for event blocks
    pub fn is_event(&self) -> bool {
        self.event_name().is_some()
    }

    /// `true` for action replies
    pub fn is_response(&self) -> bool {
        self.get_header("Response").is_some()
    }
}

fn insert_header(headers: &mut HashMap<String, String>, line: &str) {
    if let Some((key, value)) = line.split_once(':') {
        headers.insert(key.trim().to_string(), value.trim().to_string());
    }
}

impl fmt::Display for AmiEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AmiEvent {{")?;

        if let Some(event_name) = self.event_name() {
            write!(f, " Event: {}", event_name)?;
        }

        if let Some(channel) = self.channel() {
            write!(f, ", Channel: {}", channel)?;
        }

        if let Some(uid) = self.unique_id() {
            write!(f, ", Uniqueid: {}", uid)?;
        }

        write!(f, ", Headers: {} }}", self.headers.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_event() {
        let event = AmiEvent::parse("");
        assert!(event.headers.is_empty());
        assert!(!event.is_event());
    }

    #[test]
    fn test_parse_newchannel() {
        let raw = "Event: Newchannel\r\nChannel: PJSIP/trunk-a-00000001\r\nUniqueid: 1700000000.1\r\nLinkedid: 1700000000.1\r\nCallerIDNum: 0312345678\r\n\r\n";
        let event = AmiEvent::parse(raw);

        assert_eq!(event.event_name(), Some("Newchannel"));
        assert_eq!(event.channel(), Some("PJSIP/trunk-a-00000001"));
        assert_eq!(event.unique_id(), Some("1700000000.1"));
        assert_eq!(event.linked_id(), Some("1700000000.1"));
        assert_eq!(event.caller_id_num(), Some("0312345678"));
    }

    #[test]
    fn test_value_with_colon() {
        let event = AmiEvent::parse("Event: VarSet\nValue: sip:201@10.0.0.1\n");
        assert_eq!(event.get_header("Value"), Some("sip:201@10.0.0.1"));
    }

    #[test]
    fn test_empty_values_are_absent() {
        let event = AmiEvent::parse("Event: Newchannel\nCallerIDNum:\n");
        assert_eq!(event.caller_id_num(), None);
    }

    #[test]
    fn test_response_block() {
        let block = ResponseBlock::from_text("Response: Success\nPing: Pong\n");
        let event = AmiEvent::from_block(&block);
        assert!(event.is_response());
        assert!(!event.is_event());
    }

    #[test]
    fn test_display() {
        let mut event = AmiEvent::new();
        event.set_header("Event", "Hangup");
        event.set_header("Channel", "PJSIP/phone1-00000002");
        assert!(event.to_string().contains("Event: Hangup"));
    }
}
