//! Directory DTOs
//!
//! Ring groups, keys and paging groups are addressed by their slot number in the
//! path; the bodies carry the remaining fields.

use callbridge_core::models::{BindOutcome, RingGroup, RingMode, SpeedDialKey};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Ring group body for `PUT /directory/groups/{id}`
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct RingGroupRequest {
    /// Ordered members; empty removes the group
    #[serde(default)]
    #[validate(length(max = 64))]
    pub members: Vec<String>,

    #[serde(default)]
    #[validate(length(min = 1, max = 32))]
    pub extension: Option<String>,

    #[serde(default)]
    pub mode: RingMode,

    #[serde(default)]
    #[validate(range(min = 1, max = 600))]
    pub timeout_secs: Option<u32>,

    #[serde(default)]
    pub overflow: Option<String>,

    #[serde(default)]
    pub busy_no_answer_action: Option<String>,

    #[serde(default)]
    pub busy_no_answer_target: Option<String>,
}

impl RingGroupRequest {
    pub fn into_group(self, id: u32) -> RingGroup {
        RingGroup {
            id,
            members: self.members,
            extension: self.extension,
            mode: self.mode,
            timeout_secs: self.timeout_secs,
            overflow: self.overflow,
            busy_no_answer_action: self.busy_no_answer_action,
            busy_no_answer_target: self.busy_no_answer_target,
        }
    }
}

/// Speed-dial key body for `PUT /directory/keys/{n}`
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct SpeedDialKeyRequest {
    #[serde(default)]
    #[validate(length(max = 64))]
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

impl SpeedDialKeyRequest {
    pub fn into_key(self, key: u32) -> SpeedDialKey {
        SpeedDialKey {
            key,
            label: self.label,
            tech: self.tech,
            trunk: self.trunk,
            key_type: self.key_type,
            outbound_caller_id: self.outbound_caller_id,
            ring_group: self.ring_group,
            ring_pattern: self.ring_pattern,
            bypass_pin: self.bypass_pin,
            mode: self.mode,
        }
    }
}

/// Paging group body; blank members remove the group
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct PagingGroupRequest {
    #[serde(default)]
    #[validate(length(max = 512))]
    pub members: String,
}

/// Result of a directory write
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindResponse {
    /// What was written, e.g. `PJSIP/phone1` or `group 3`
    pub target: String,
    pub outcome: BindOutcome,
}
