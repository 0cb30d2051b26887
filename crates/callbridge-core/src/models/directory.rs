//! PBX directory records
//!
//! Typed views of the key/value layout the PBX keeps in its internal database
//! (endpoints, extensions, ring groups, speed-dial keys, paging groups, trunks).

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use validator::Validate;

/// A phone endpoint and what is bound to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Endpoint {
    /// Endpoint name, e.g. `PJSIP/phone1`
    pub name: String,

    /// Extension bound to the endpoint
    pub extension: Option<String>,

    /// Concurrent call limit
    pub call_limit: Option<String>,

    /// Outbound caller-ID override
    pub outbound_caller_id: Option<String>,

    /// Paging group number
    pub paging_group: Option<String>,
}

impl Endpoint {
    /// An endpoint with no extension bound
    pub fn unbound(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn is_bound(&self) -> bool {
        self.extension.is_some()
    }
}

/// Request to bind (or unbind) an extension to an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default, Validate)]
pub struct EndpointBinding {
    #[validate(length(min = 1, max = 80))]
    pub endpoint: String,

    /// Requested extension; blank removes the binding
    #[serde(default)]
    pub extension: String,

    /// Extension bound before this change, cleaned up on removal
    #[serde(default)]
    pub previous_extension: String,

    #[serde(default)]
    pub call_limit: String,

    #[serde(default)]
    pub outbound_caller_id: String,

    #[serde(default)]
    pub paging_group: String,
}

/// Result of a binding change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindOutcome {
    /// A new binding was written
    Created,
    /// The existing binding's attributes were rewritten
    Updated,
    /// The binding was removed
    Removed,
    /// The extension is already claimed by something else
    Conflict,
}

impl fmt::Display for BindOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindOutcome::Created => write!(f, "created"),
            BindOutcome::Updated => write!(f, "updated"),
            BindOutcome::Removed => write!(f, "removed"),
            BindOutcome::Conflict => write!(f, "conflict"),
        }
    }
}

/// How a ring group distributes calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RingMode {
    /// Ring every member at once
    #[default]
    Simultaneous,
    /// Ring members one after another
    Sequential,
}

impl RingMode {
    /// Parse the stored method value; unknown values fall back to simultaneous
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "hunt" | "seq" | "sequential" | "linear" => RingMode::Sequential,
            _ => RingMode::Simultaneous,
        }
    }

    /// Value written to the PBX database
    pub fn as_db_value(&self) -> &'static str {
        match self {
            RingMode::Simultaneous => "ringall",
            RingMode::Sequential => "hunt",
        }
    }
}

/// Separator between ring-group members in the stored value
pub const MEMBER_SEPARATOR: char = '&';

/// A ring group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RingGroup {
    /// Group slot number
    pub id: u32,

    /// Ordered member list; empty means the group is unused
    #[serde(default)]
    pub members: Vec<String>,

    /// Extension that dials the group
    #[serde(default)]
    pub extension: Option<String>,

    #[serde(default)]
    pub mode: RingMode,

    /// Ring timeout in seconds
    #[serde(default)]
    pub timeout_secs: Option<u32>,

    /// Overflow destination
    #[serde(default)]
    pub overflow: Option<String>,

    /// Busy/no-answer action
    #[serde(default)]
    pub busy_no_answer_action: Option<String>,

    /// Busy/no-answer target
    #[serde(default)]
    pub busy_no_answer_target: Option<String>,
}

impl RingGroup {
    /// Extension value that routes to this group (`G<id>`)
    pub fn routing_value(id: u32) -> String {
        format!("G{}", id)
    }

    /// Members joined for storage
    pub fn members_value(&self) -> String {
        let mut out = String::new();
        for member in self.members.iter().filter(|m| !m.trim().is_empty()) {
            if !out.is_empty() {
                out.push(MEMBER_SEPARATOR);
            }
            out.push_str(member.trim());
        }
        out
    }

    /// Split a stored member value
    pub fn parse_members(value: &str) -> Vec<String> {
        value
            .split(MEMBER_SEPARATOR)
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(String::from)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.members_value().is_empty()
    }
}

/// A programmable speed-dial / line key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SpeedDialKey {
    pub key: u32,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub tech: String,
    #[serde(default)]
    pub trunk: String,
    #[serde(default)]
    pub key_type: String,
    #[serde(default)]
    pub outbound_caller_id: String,
    #[serde(default)]
    pub ring_group: String,
    #[serde(default)]
    pub ring_pattern: String,
    #[serde(default)]
    pub bypass_pin: String,
    #[serde(default)]
    pub mode: String,
}

/// A paging group and its member string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PagingGroup {
    pub id: u32,
    #[serde(default)]
    pub members: String,
}

/// Kind of a routing target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// Extension bound to a fixed endpoint
    Extension,
    /// Free-address (roaming) extension
    Roaming,
    /// Ring group
    Group,
    /// Local ring destination
    Local,
}

/// Something an incoming call can be routed to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTarget {
    pub kind: TargetKind,
    pub value: String,
    pub label: String,
}

impl RoutingTarget {
    pub fn new(kind: TargetKind, value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            label: label.into(),
        }
    }
}

/// Registration state reported for a trunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationState {
    Registered,
    Unregistered,
    Rejected,
    Unknown(String),
}

impl RegistrationState {
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "Registered" => RegistrationState::Registered,
            "Unregistered" => RegistrationState::Unregistered,
            "Rejected" => RegistrationState::Rejected,
            other => RegistrationState::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RegistrationState::Registered => "Registered",
            RegistrationState::Unregistered => "Unregistered",
            RegistrationState::Rejected => "Rejected",
            RegistrationState::Unknown(s) => s,
        }
    }
}

impl Serialize for RegistrationState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// An outbound trunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Trunk {
    pub name: String,
    pub state: RegistrationState,
}

/// One row of a namespace listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbEntry {
    /// Key relative to the listed namespace (may contain `/`)
    pub key: String,
    pub value: String,
}

impl DbEntry {
    /// Parse a `key : value` listing row
    pub fn parse(row: &str) -> Option<Self> {
        let (key, value) = row.split_once(':')?;
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        Some(Self {
            key: key.to_string(),
            value: value.trim().to_string(),
        })
    }

    /// Whether the key is a sub-key (`201/OGCID`) rather than a top-level entry
    pub fn is_nested(&self) -> bool {
        self.key.contains('/')
    }
}

/// Compare two strings the way a person would order numbered labels
/// (`2` < `10`, `G2` < `G10`).
pub fn natural_cmp(a: &str, b: &str) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    let mut ai = a.chars().peekable();
    let mut bi = b.chars().peekable();
    loop {
        match (ai.peek().copied(), bi.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let mut na = String::new();
                while let Some(c) = ai.peek().copied().filter(char::is_ascii_digit) {
                    na.push(c);
                    ai.next();
                }
                let mut nb = String::new();
                while let Some(c) = bi.peek().copied().filter(char::is_ascii_digit) {
                    nb.push(c);
                    bi.next();
                }
                let ta = na.trim_start_matches('0');
                let tb = nb.trim_start_matches('0');
                let ord = ta.len().cmp(&tb.len()).then_with(|| ta.cmp(tb));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(&y);
                }
                ai.next();
                bi.next();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_mode_parse() {
        assert_eq!(RingMode::parse("hunt"), RingMode::Sequential);
        assert_eq!(RingMode::parse("Linear"), RingMode::Sequential);
        assert_eq!(RingMode::parse("ringall"), RingMode::Simultaneous);
        assert_eq!(RingMode::parse(""), RingMode::Simultaneous);
    }

    #[test]
    fn test_members_value() {
        let group = RingGroup {
            id: 1,
            members: vec!["201".into(), " ".into(), "202".into()],
            ..Default::default()
        };
        assert_eq!(group.members_value(), "201&202");
        assert_eq!(RingGroup::parse_members("201&&202"), vec!["201", "202"]);
        assert!(RingGroup::default().is_empty());
    }

    #[test]
    fn test_db_entry_parse() {
        let entry = DbEntry::parse("201                  : PJSIP/phone1").unwrap();
        assert_eq!(entry.key, "201");
        assert_eq!(entry.value, "PJSIP/phone1");
        assert!(!entry.is_nested());

        let nested = DbEntry::parse("201/OGCID : 0312345678").unwrap();
        assert!(nested.is_nested());

        assert!(DbEntry::parse("no separator").is_none());
    }

    #[test]
    fn test_registration_state() {
        assert_eq!(RegistrationState::parse("Registered"), RegistrationState::Registered);
        assert_eq!(
            RegistrationState::parse("Auth Failed"),
            RegistrationState::Unknown("Auth Failed".into())
        );
    }

    #[test]
    fn test_natural_cmp() {
        let mut values = vec!["G10", "201", "G2", "1001", "30"];
        values.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(values, vec!["30", "201", "1001", "G2", "G10"]);
    }
}
