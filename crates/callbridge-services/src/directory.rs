//! Directory translator
//!
//! Maps the PBX's flat `family/key` database onto typed directory records:
//! endpoint bindings, ring groups, speed-dial keys, paging groups, routing target
//! lists and trunk registrations. Every read goes to the PBX; nothing is cached.
//!
//! Layout:
//!
//! ```text
//! ABS/ERV/<endpoint>       = <ext>
//! ABS/EXT/<ext>            = <endpoint> | G<grp>
//! ABS/EXT/<ext>/OGCID      = caller-ID override
//! ABS/EXT/<ext>/PGRP       = paging group
//! ABS/LMT/<endpoint>       = call limit
//! ABS/GRP/<grp>            = members joined by '&'
//! ABS/GRP/<grp>/{EXT,MET,TMO,OVR,BNL,BNT}
//! KEYTEL/KEYSYS<n>/{LABEL,TECH,TRUNK,TYP,OGCID,RGRP,RING,RGPT,BPIN,MMD}
//! ```

use crate::constants::{
    FAMILY_ENDPOINT, FAMILY_EXTENSION, FAMILY_GROUP, FAMILY_KEY, FAMILY_LIMIT, FAMILY_PAGING,
    FAMILY_ROAMING, FAMILY_TRUNK_SWITCH, LOCAL_RING_KEY, SHOW_REGISTRATIONS,
};
use callbridge_core::config::DirectoryConfig;
use callbridge_core::models::{
    natural_cmp, BindOutcome, Endpoint, EndpointBinding, PagingGroup, RegistrationState,
    RingGroup, RingMode, RoutingTarget, SpeedDialKey, TargetKind, Trunk,
};
use callbridge_core::traits::PbxCommands;
use callbridge_core::{AppError, AppResult};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use validator::Validate;

const OGCID: &str = "OGCID";
const PGRP: &str = "PGRP";

const GRP_EXT: &str = "EXT";
const GRP_METHOD: &str = "MET";
const GRP_TIMEOUT: &str = "TMO";
const GRP_OVERFLOW: &str = "OVR";
const GRP_BNA_ACTION: &str = "BNL";
const GRP_BNA_TARGET: &str = "BNT";

/// Every field a speed-dial key may carry; `RGRP` is a legacy name only deleted
const KEY_FIELDS: &[&str] = &[
    "LABEL", "TECH", "TRUNK", "TYP", "OGCID", "RGRP", "RING", "RGPT", "BPIN", "MMD",
];

/// Lines of `pjsip show registrations` that carry no registration
const REGISTRATION_NOISE: &[&str] = &[
    "Response:",
    "Privilege:",
    "<Registration",
    "=",
    "Objects found",
];

/// Non-empty and made of ASCII digits only
pub fn is_digits(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

fn non_empty(value: String) -> Option<String> {
    let value = value.trim().to_string();
    (!value.is_empty()).then_some(value)
}

fn key_family(key: u32) -> String {
    format!("{}/KEYSYS{}", FAMILY_KEY, key)
}

fn extension_family(ext: &str) -> String {
    format!("{}/{}", FAMILY_EXTENSION, ext)
}

fn group_family(id: u32) -> String {
    format!("{}/{}", FAMILY_GROUP, id)
}

/// Directory views over the PBX database
pub struct DirectoryService {
    pbx: Arc<dyn PbxCommands>,
    config: DirectoryConfig,
}

impl DirectoryService {
    /// Create a new directory service
    ///
    /// # Arguments
    ///
    /// * `pbx` - PBX command channel (manager client or in-memory database)
    /// * `config` - endpoint naming and slot counts
    pub fn new(pbx: Arc<dyn PbxCommands>, config: DirectoryConfig) -> Self {
        Self { pbx, config }
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Name of endpoint slot `slot`, e.g. `PJSIP/phone3`
    pub fn endpoint_name(&self, slot: u32) -> String {
        format!(
            "{}/{}{}",
            self.config.endpoint_tech, self.config.endpoint_prefix, slot
        )
    }

    // ==================== Endpoints ====================

    /// Read an endpoint and the attributes of its extension
    ///
    /// An endpoint without an extension is returned with every other field empty.
    #[instrument(skip(self))]
    pub async fn resolve_endpoint(&self, name: &str) -> Endpoint {
        let Some(extension) = non_empty(self.pbx.get_value(FAMILY_ENDPOINT, name).await) else {
            return Endpoint::unbound(name);
        };

        let ext_family = extension_family(&extension);
        Endpoint {
            name: name.to_string(),
            call_limit: non_empty(self.pbx.get_value(FAMILY_LIMIT, name).await),
            outbound_caller_id: non_empty(self.pbx.get_value(&ext_family, OGCID).await),
            paging_group: non_empty(self.pbx.get_value(&ext_family, PGRP).await),
            extension: Some(extension),
        }
    }

    /// Bind, update or remove the extension of an endpoint
    ///
    /// # Returns
    ///
    /// - `Removed` when the requested extension is blank
    /// - `Updated` when the extension already belongs to this endpoint
    /// - `Created` when the extension was free
    /// - `Conflict` when the extension belongs to another endpoint or a group
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for an empty endpoint name or a non-numeric
    /// extension.
    #[instrument(skip(self, binding), fields(endpoint = %binding.endpoint, ext = %binding.extension))]
    pub async fn bind_endpoint(&self, binding: &EndpointBinding) -> AppResult<BindOutcome> {
        binding.validate()?;
        let endpoint = binding.endpoint.trim();
        let extension = binding.extension.trim();
        let previous = binding.previous_extension.trim();

        if extension.is_empty() {
            self.pbx.delete_value(FAMILY_ENDPOINT, endpoint).await;
            self.pbx.delete_value(FAMILY_LIMIT, endpoint).await;
            if !previous.is_empty() {
                self.release_extension(previous).await;
            }
            info!("Endpoint binding removed");
            return Ok(BindOutcome::Removed);
        }

        if !is_digits(extension) {
            return Err(AppError::Validation(format!(
                "extension must be numeric: {}",
                extension
            )));
        }

        let owner = self.pbx.get_value(FAMILY_EXTENSION, extension).await;
        if owner == endpoint {
            self.write_endpoint_attributes(endpoint, extension, binding, true)
                .await;
            debug!("Endpoint attributes updated");
            return Ok(BindOutcome::Updated);
        }

        if !owner.is_empty() {
            warn!(owner = %owner, "Extension already bound elsewhere");
            return Ok(BindOutcome::Conflict);
        }

        // moving to a new number releases the old one if it still points here
        if !previous.is_empty() && previous != extension {
            let previous_owner = self.pbx.get_value(FAMILY_EXTENSION, previous).await;
            if previous_owner == endpoint {
                self.release_extension(previous).await;
            }
        }

        self.pbx.put_value(FAMILY_ENDPOINT, endpoint, extension).await;
        self.pbx.put_value(FAMILY_EXTENSION, extension, endpoint).await;
        self.write_endpoint_attributes(endpoint, extension, binding, false)
            .await;
        info!("Endpoint bound");
        Ok(BindOutcome::Created)
    }

    /// Write limit / caller-ID / paging rows; `clear_blank` deletes blank ones
    async fn write_endpoint_attributes(
        &self,
        endpoint: &str,
        extension: &str,
        binding: &EndpointBinding,
        clear_blank: bool,
    ) {
        let ext_family = extension_family(extension);
        self.write_digits(FAMILY_LIMIT, endpoint, &binding.call_limit, clear_blank)
            .await;
        self.write_digits(&ext_family, OGCID, &binding.outbound_caller_id, clear_blank)
            .await;
        self.write_digits(&ext_family, PGRP, &binding.paging_group, clear_blank)
            .await;
    }

    /// Put `value` when digits-only, delete it when blank and `clear_blank` is set
    async fn write_digits(&self, family: &str, key: &str, value: &str, clear_blank: bool) {
        let value = value.trim();
        if value.is_empty() {
            if clear_blank {
                self.pbx.delete_value(family, key).await;
            }
        } else if is_digits(value) {
            self.pbx.put_value(family, key, value).await;
        } else {
            warn!(family = %family, key = %key, value = %value, "Ignoring non-numeric value");
        }
    }

    async fn release_extension(&self, extension: &str) {
        let ext_family = extension_family(extension);
        self.pbx.delete_value(&ext_family, OGCID).await;
        self.pbx.delete_value(&ext_family, PGRP).await;
        self.pbx.delete_value(FAMILY_EXTENSION, extension).await;
    }

    // ==================== Ring groups ====================

    /// Read ring group `id`; an unused group has no members
    #[instrument(skip(self))]
    pub async fn resolve_group(&self, id: u32) -> RingGroup {
        let members = self.pbx.get_value(FAMILY_GROUP, &id.to_string()).await;
        if members.trim().is_empty() {
            return RingGroup {
                id,
                ..Default::default()
            };
        }

        let family = group_family(id);
        RingGroup {
            id,
            members: RingGroup::parse_members(&members),
            extension: non_empty(self.pbx.get_value(&family, GRP_EXT).await),
            mode: RingMode::parse(&self.pbx.get_value(&family, GRP_METHOD).await),
            timeout_secs: self
                .pbx
                .get_value(&family, GRP_TIMEOUT)
                .await
                .trim()
                .parse()
                .ok(),
            overflow: non_empty(self.pbx.get_value(&family, GRP_OVERFLOW).await),
            busy_no_answer_action: non_empty(self.pbx.get_value(&family, GRP_BNA_ACTION).await),
            busy_no_answer_target: non_empty(self.pbx.get_value(&family, GRP_BNA_TARGET).await),
        }
    }

    /// Rewrite ring group `group.id`
    ///
    /// The attribute set is deleted and written again as a whole. A blank member
    /// list removes the group and releases its `G<id>` extension. When the requested
    /// extension is claimed by something else the attributes are still written and
    /// `Conflict` is returned.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for a group id outside the configured slots or
    /// a non-numeric extension.
    #[instrument(skip(self, group), fields(group = group.id))]
    pub async fn bind_group(&self, group: &RingGroup) -> AppResult<BindOutcome> {
        let id = group.id;
        if id == 0 || id > self.config.group_slots {
            return Err(AppError::Validation(format!(
                "group must be between 1 and {}",
                self.config.group_slots
            )));
        }
        let requested_ext = group
            .extension
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty());
        if let Some(ext) = requested_ext {
            if !is_digits(ext) {
                return Err(AppError::Validation(format!(
                    "group extension must be numeric: {}",
                    ext
                )));
            }
        }

        let key = id.to_string();
        let family = group_family(id);
        let routing = RingGroup::routing_value(id);
        let existed = !self.pbx.get_value(FAMILY_GROUP, &key).await.trim().is_empty();

        // release the current group extension
        let current_ext = self.pbx.get_value(&family, GRP_EXT).await;
        if !current_ext.is_empty()
            && self.pbx.get_value(FAMILY_EXTENSION, &current_ext).await == routing
        {
            self.pbx.delete_value(FAMILY_EXTENSION, &current_ext).await;
        }
        self.pbx.delete_value(FAMILY_GROUP, &key).await;
        self.pbx.delete_namespace(&family).await;

        let members = group.members_value();
        if members.is_empty() {
            info!("Ring group removed");
            return Ok(BindOutcome::Removed);
        }

        self.pbx.put_value(FAMILY_GROUP, &key, &members).await;
        if let Some(timeout) = group.timeout_secs {
            self.pbx
                .put_value(&family, GRP_TIMEOUT, &timeout.to_string())
                .await;
        }
        if let Some(target) = group.busy_no_answer_target.as_deref() {
            if is_digits(target.trim()) {
                self.pbx
                    .put_value(&family, GRP_BNA_TARGET, target.trim())
                    .await;
            }
        }
        if let Some(overflow) = group.overflow.as_deref().filter(|v| !v.trim().is_empty()) {
            self.pbx.put_value(&family, GRP_OVERFLOW, overflow.trim()).await;
        }
        self.pbx
            .put_value(&family, GRP_METHOD, group.mode.as_db_value())
            .await;
        if let Some(action) = group
            .busy_no_answer_action
            .as_deref()
            .filter(|v| !v.trim().is_empty())
        {
            self.pbx
                .put_value(&family, GRP_BNA_ACTION, action.trim())
                .await;
        }

        if let Some(ext) = requested_ext {
            let owner = self.pbx.get_value(FAMILY_EXTENSION, ext).await;
            if !owner.is_empty() && owner != routing {
                warn!(ext = %ext, owner = %owner, "Group extension already claimed");
                return Ok(BindOutcome::Conflict);
            }
            self.pbx.put_value(&family, GRP_EXT, ext).await;
            self.pbx.put_value(FAMILY_EXTENSION, ext, &routing).await;
        }

        info!(members = %members, "Ring group written");
        Ok(if existed {
            BindOutcome::Updated
        } else {
            BindOutcome::Created
        })
    }

    // ==================== Speed-dial keys ====================

    /// Read speed-dial key `key`
    pub async fn resolve_key(&self, key: u32) -> SpeedDialKey {
        let family = key_family(key);
        let pbx = &self.pbx;
        SpeedDialKey {
            key,
            label: pbx.get_value(&family, "LABEL").await,
            tech: pbx.get_value(&family, "TECH").await,
            trunk: pbx.get_value(&family, "TRUNK").await,
            key_type: pbx.get_value(&family, "TYP").await,
            outbound_caller_id: pbx.get_value(&family, "OGCID").await,
            ring_group: pbx.get_value(&family, "RING").await,
            ring_pattern: pbx.get_value(&family, "RGPT").await,
            bypass_pin: pbx.get_value(&family, "BPIN").await,
            mode: pbx.get_value(&family, "MMD").await,
        }
    }

    /// Delete every field of the key, then write the non-empty ones
    ///
    /// Caller-ID and bypass PIN are only written when numeric.
    #[instrument(skip(self, key), fields(key = key.key))]
    pub async fn bind_key(&self, key: &SpeedDialKey) -> AppResult<BindOutcome> {
        if key.key == 0 {
            return Err(AppError::Validation("key number must be positive".into()));
        }
        let family = key_family(key.key);
        for field in KEY_FIELDS {
            self.pbx.delete_value(&family, field).await;
        }

        let plain = [
            ("LABEL", &key.label),
            ("TECH", &key.tech),
            ("TRUNK", &key.trunk),
            ("TYP", &key.key_type),
            ("MMD", &key.mode),
            ("RING", &key.ring_group),
            ("RGPT", &key.ring_pattern),
        ];
        let mut written = 0;
        for (field, value) in plain {
            let value = value.trim();
            if !value.is_empty() {
                self.pbx.put_value(&family, field, value).await;
                written += 1;
            }
        }
        for (field, value) in [("OGCID", &key.outbound_caller_id), ("BPIN", &key.bypass_pin)] {
            if is_digits(value.trim()) {
                self.pbx.put_value(&family, field, value.trim()).await;
                written += 1;
            }
        }

        debug!(written, "Speed-dial key written");
        Ok(if written == 0 {
            BindOutcome::Removed
        } else {
            BindOutcome::Updated
        })
    }

    // ==================== Paging groups ====================

    pub async fn paging_group(&self, id: u32) -> PagingGroup {
        PagingGroup {
            id,
            members: self.pbx.get_value(FAMILY_PAGING, &id.to_string()).await,
        }
    }

    /// Replace the member string of paging group `id`; blank removes it
    #[instrument(skip(self))]
    pub async fn set_paging_group(&self, id: u32, members: &str) -> AppResult<BindOutcome> {
        if id == 0 {
            return Err(AppError::Validation("paging group must be positive".into()));
        }
        let key = id.to_string();
        let members = members.trim();
        if members.is_empty() {
            self.pbx.delete_value(FAMILY_PAGING, &key).await;
            return Ok(BindOutcome::Removed);
        }
        let existed = !self.pbx.get_value(FAMILY_PAGING, &key).await.is_empty();
        self.pbx.put_value(FAMILY_PAGING, &key, members).await;
        Ok(if existed {
            BindOutcome::Updated
        } else {
            BindOutcome::Created
        })
    }

    // ==================== Target lists ====================

    /// Everything an incoming call can be routed to
    ///
    /// Endpoint slots in order (unbound slots yield an empty value), then roaming
    /// extensions, then used groups, then the local ring destination.
    #[instrument(skip(self))]
    pub async fn list_targets(&self) -> Vec<RoutingTarget> {
        let mut targets = Vec::new();

        for slot in 1..=self.config.endpoint_slots {
            let ext = self
                .pbx
                .get_value(FAMILY_ENDPOINT, &self.endpoint_name(slot))
                .await;
            targets.push(RoutingTarget::new(TargetKind::Extension, ext.clone(), ext));
        }

        for ext in self.roaming_extensions().await {
            let label = format!("{}(F)", ext);
            targets.push(RoutingTarget::new(TargetKind::Roaming, ext, label));
        }

        for id in self.used_groups().await {
            let value = RingGroup::routing_value(id);
            targets.push(RoutingTarget::new(TargetKind::Group, value.clone(), value));
        }

        if let Some(local) = non_empty(self.pbx.get_value(FAMILY_ENDPOINT, LOCAL_RING_KEY).await) {
            let label = format!("{}(L)", local);
            targets.push(RoutingTarget::new(TargetKind::Local, local, label));
        }

        targets
    }

    /// Merged dial-target list keyed by value and naturally sorted
    ///
    /// Roaming entries override a plain extension with the same number; groups are
    /// only added when their `G<id>` value is not already present.
    #[instrument(skip(self))]
    pub async fn list_dial_targets(&self) -> Vec<RoutingTarget> {
        let mut merged: HashMap<String, RoutingTarget> = HashMap::new();

        for entry in self.pbx.show_namespace(FAMILY_EXTENSION).await {
            if entry.is_nested() {
                continue;
            }
            let label = format!("{} ({})", entry.key, entry.value);
            merged.insert(
                entry.key.clone(),
                RoutingTarget::new(TargetKind::Extension, entry.key, label),
            );
        }

        for ext in self.roaming_extensions().await {
            let label = format!("{} (F)", ext);
            merged.insert(ext.clone(), RoutingTarget::new(TargetKind::Roaming, ext, label));
        }

        for id in self.used_groups().await {
            let value = RingGroup::routing_value(id);
            merged.entry(value.clone()).or_insert_with(|| {
                let label = format!("{} (Group)", value);
                RoutingTarget::new(TargetKind::Group, value, label)
            });
        }

        if let Some(local) = non_empty(self.pbx.get_value(FAMILY_ENDPOINT, LOCAL_RING_KEY).await) {
            let label = format!("{} (Local)", local);
            merged.insert(local.clone(), RoutingTarget::new(TargetKind::Local, local, label));
        }

        let mut targets: Vec<RoutingTarget> = merged.into_values().collect();
        targets.sort_by(|a, b| natural_cmp(&a.value, &b.value));
        targets
    }

    async fn roaming_extensions(&self) -> Vec<String> {
        self.pbx
            .show_namespace(FAMILY_ROAMING)
            .await
            .into_iter()
            .filter(|e| e.key.contains("/EXT") && !e.value.is_empty())
            .map(|e| e.value)
            .collect()
    }

    async fn used_groups(&self) -> Vec<u32> {
        let mut used = Vec::new();
        for id in 1..=self.config.group_slots {
            if !self
                .pbx
                .get_value(FAMILY_GROUP, &id.to_string())
                .await
                .trim()
                .is_empty()
            {
                used.push(id);
            }
        }
        used
    }

    // ==================== Trunks ====================

    /// Outbound registrations, one per trunk name in listing order
    #[instrument(skip(self))]
    pub async fn list_trunks(&self) -> Vec<Trunk> {
        let output = self.pbx.exec_raw(SHOW_REGISTRATIONS).await;
        parse_registrations(&output)
    }

    pub async fn trunk_names(&self) -> Vec<String> {
        self.list_trunks().await.into_iter().map(|t| t.name).collect()
    }

    /// Keys of the trunk-switch table
    pub async fn list_trunk_switchers(&self) -> Vec<String> {
        self.pbx
            .show_namespace(FAMILY_TRUNK_SWITCH)
            .await
            .into_iter()
            .filter(|e| !e.is_nested())
            .map(|e| e.key)
            .collect()
    }
}

/// Parse a `pjsip show registrations` dump
///
/// Registration rows look like
/// `trunk-a/sip:trunk-a@203.0.113.5:5060   trunk-a-auth   Registered   (exp. 3597s)`.
pub fn parse_registrations(output: &str) -> Vec<Trunk> {
    let mut trunks: Vec<Trunk> = Vec::new();

    for raw in output.lines() {
        let line = raw.trim();
        let line = line.strip_prefix("Output:").unwrap_or(line).trim();
        if line.is_empty()
            || REGISTRATION_NOISE.iter().any(|p| line.starts_with(p))
            || line.contains("--END COMMAND--")
        {
            continue;
        }

        let Some((name, rest)) = line.split_once('/') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            continue;
        }
        if trunks.iter().any(|t| t.name == name) {
            continue;
        }

        let tokens: Vec<&str> = rest.split_whitespace().collect();
        let state = tokens
            .iter()
            .map(|t| RegistrationState::parse(t))
            .find(|s| !matches!(s, RegistrationState::Unknown(_)))
            .unwrap_or_else(|| {
                RegistrationState::Unknown(tokens.get(2).copied().unwrap_or_default().to_string())
            });

        trunks.push(Trunk {
            name: name.to_string(),
            state,
        });
    }

    trunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryPbx;

    fn service(pbx: MemoryPbx) -> (Arc<MemoryPbx>, DirectoryService) {
        let pbx = Arc::new(pbx);
        let directory = DirectoryService::new(pbx.clone(), DirectoryConfig::default());
        (pbx, directory)
    }

    fn binding(endpoint: &str, ext: &str) -> EndpointBinding {
        EndpointBinding {
            endpoint: endpoint.into(),
            extension: ext.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_resolve_unbound_endpoint() {
        let (_, directory) = service(MemoryPbx::new().with_row("ABS/LMT", "PJSIP/phone1", "2"));
        let endpoint = directory.resolve_endpoint("PJSIP/phone1").await;
        assert!(!endpoint.is_bound());
        assert_eq!(endpoint.call_limit, None);
    }

    #[tokio::test]
    async fn test_bind_create_update_conflict() {
        let (pbx, directory) = service(MemoryPbx::new());

        let mut request = binding("PJSIP/phone1", "201");
        request.call_limit = "2".into();
        request.outbound_caller_id = "0312345678".into();
        assert_eq!(
            directory.bind_endpoint(&request).await.unwrap(),
            BindOutcome::Created
        );
        assert_eq!(pbx.row("ABS/EXT", "201").as_deref(), Some("PJSIP/phone1"));

        let endpoint = directory.resolve_endpoint("PJSIP/phone1").await;
        assert_eq!(endpoint.extension.as_deref(), Some("201"));
        assert_eq!(endpoint.call_limit.as_deref(), Some("2"));
        assert_eq!(endpoint.outbound_caller_id.as_deref(), Some("0312345678"));

        // same endpoint: blank sub-fields are deleted
        let update = binding("PJSIP/phone1", "201");
        assert_eq!(
            directory.bind_endpoint(&update).await.unwrap(),
            BindOutcome::Updated
        );
        assert_eq!(pbx.row("ABS/EXT/201", "OGCID"), None);
        assert_eq!(pbx.row("ABS/LMT", "PJSIP/phone1"), None);

        let other = binding("PJSIP/phone2", "201");
        assert_eq!(
            directory.bind_endpoint(&other).await.unwrap(),
            BindOutcome::Conflict
        );
        assert_eq!(pbx.row("ABS/ERV", "PJSIP/phone2"), None);
    }

    #[tokio::test]
    async fn test_bind_rejects_non_numeric() {
        let (_, directory) = service(MemoryPbx::new());
        let result = directory.bind_endpoint(&binding("PJSIP/phone1", "20a")).await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        let result = directory.bind_endpoint(&binding("", "201")).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_unbind_cleans_previous_extension() {
        let (pbx, directory) = service(
            MemoryPbx::new()
                .with_row("ABS/ERV", "PJSIP/phone1", "201")
                .with_row("ABS/LMT", "PJSIP/phone1", "2")
                .with_row("ABS/EXT", "201", "PJSIP/phone1")
                .with_row("ABS/EXT", "201/PGRP", "1"),
        );

        let mut request = binding("PJSIP/phone1", "");
        request.previous_extension = "201".into();
        assert_eq!(
            directory.bind_endpoint(&request).await.unwrap(),
            BindOutcome::Removed
        );
        assert!(pbx.is_empty());
    }

    #[tokio::test]
    async fn test_rebind_releases_old_number() {
        let (pbx, directory) = service(
            MemoryPbx::new()
                .with_row("ABS/ERV", "PJSIP/phone1", "201")
                .with_row("ABS/EXT", "201", "PJSIP/phone1"),
        );
        let mut request = binding("PJSIP/phone1", "205");
        request.previous_extension = "201".into();
        assert_eq!(
            directory.bind_endpoint(&request).await.unwrap(),
            BindOutcome::Created
        );
        assert_eq!(pbx.row("ABS/EXT", "201"), None);
        assert_eq!(pbx.row("ABS/ERV", "PJSIP/phone1").as_deref(), Some("205"));
    }

    #[tokio::test]
    async fn test_group_lifecycle() {
        let (pbx, directory) = service(MemoryPbx::new());
        let mut group = RingGroup {
            id: 2,
            members: vec!["201".into(), "202".into()],
            extension: Some("300".into()),
            mode: RingMode::Sequential,
            timeout_secs: Some(20),
            busy_no_answer_target: Some("abc".into()),
            ..Default::default()
        };

        assert_eq!(
            directory.bind_group(&group).await.unwrap(),
            BindOutcome::Created
        );
        assert_eq!(pbx.row("ABS/GRP", "2").as_deref(), Some("201&202"));
        assert_eq!(pbx.row("ABS/EXT", "300").as_deref(), Some("G2"));
        assert_eq!(pbx.row("ABS/GRP/2", "BNT"), None);

        let read = directory.resolve_group(2).await;
        assert_eq!(read.members, vec!["201", "202"]);
        assert_eq!(read.mode, RingMode::Sequential);
        assert_eq!(read.timeout_secs, Some(20));
        assert_eq!(read.extension.as_deref(), Some("300"));

        group.timeout_secs = None;
        assert_eq!(
            directory.bind_group(&group).await.unwrap(),
            BindOutcome::Updated
        );
        assert_eq!(pbx.row("ABS/GRP/2", "TMO"), None);

        group.members.clear();
        assert_eq!(
            directory.bind_group(&group).await.unwrap(),
            BindOutcome::Removed
        );
        assert!(pbx.is_empty());
    }

    #[tokio::test]
    async fn test_group_extension_conflict_still_writes() {
        let (pbx, directory) = service(MemoryPbx::new().with_row("ABS/EXT", "201", "PJSIP/phone1"));
        let group = RingGroup {
            id: 1,
            members: vec!["202".into()],
            extension: Some("201".into()),
            ..Default::default()
        };
        assert_eq!(
            directory.bind_group(&group).await.unwrap(),
            BindOutcome::Conflict
        );
        assert_eq!(pbx.row("ABS/GRP", "1").as_deref(), Some("202"));
        assert_eq!(pbx.row("ABS/EXT", "201").as_deref(), Some("PJSIP/phone1"));
    }

    #[tokio::test]
    async fn test_group_out_of_range() {
        let (_, directory) = service(MemoryPbx::new());
        let group = RingGroup {
            id: 17,
            members: vec!["201".into()],
            ..Default::default()
        };
        assert!(directory.bind_group(&group).await.is_err());
    }

    #[tokio::test]
    async fn test_key_rewrite() {
        let (pbx, directory) = service(MemoryPbx::new().with_row("KEYTEL/KEYSYS3", "BPIN", "1234"));
        let key = SpeedDialKey {
            key: 3,
            label: "Sales".into(),
            trunk: "trunk-a".into(),
            outbound_caller_id: "03-1111".into(),
            ..Default::default()
        };
        assert_eq!(directory.bind_key(&key).await.unwrap(), BindOutcome::Updated);
        assert_eq!(pbx.row("KEYTEL/KEYSYS3", "BPIN"), None);
        assert_eq!(pbx.row("KEYTEL/KEYSYS3", "OGCID"), None);

        let read = directory.resolve_key(3).await;
        assert_eq!(read.label, "Sales");
        assert_eq!(read.trunk, "trunk-a");
    }

    #[tokio::test]
    async fn test_paging_group() {
        let (_, directory) = service(MemoryPbx::new());
        assert_eq!(
            directory.set_paging_group(1, "201&202").await.unwrap(),
            BindOutcome::Created
        );
        assert_eq!(directory.paging_group(1).await.members, "201&202");
        assert_eq!(
            directory.set_paging_group(1, " ").await.unwrap(),
            BindOutcome::Removed
        );
        assert_eq!(directory.paging_group(1).await.members, "");
    }

    #[tokio::test]
    async fn test_list_targets() {
        let (_, directory) = service(
            MemoryPbx::new()
                .with_row("ABS/ERV", "PJSIP/phone1", "201")
                .with_row("ABS/ERV", "localring", "299")
                .with_row("ABS/FAP/UID", "u1/EXT", "250")
                .with_row("ABS/FAP/UID", "u1/NAME", "roamer")
                .with_row("ABS/GRP", "3", "201&202"),
        );
        let targets = directory.list_targets().await;
        assert_eq!(targets.len(), 32 + 3);
        assert_eq!(targets[0].value, "201");
        assert_eq!(targets[1].value, "");
        assert_eq!(targets[32], RoutingTarget::new(TargetKind::Roaming, "250", "250(F)"));
        assert_eq!(targets[33], RoutingTarget::new(TargetKind::Group, "G3", "G3"));
        assert_eq!(targets[34], RoutingTarget::new(TargetKind::Local, "299", "299(L)"));
    }

    #[tokio::test]
    async fn test_list_dial_targets() {
        let (_, directory) = service(
            MemoryPbx::new()
                .with_row("ABS/EXT", "201", "PJSIP/phone1")
                .with_row("ABS/EXT", "201/OGCID", "0312345678")
                .with_row("ABS/EXT", "1001", "PJSIP/phone2")
                .with_row("ABS/EXT", "300", "G1")
                .with_row("ABS/FAP/UID", "u1/EXT", "201")
                .with_row("ABS/GRP", "1", "201")
                .with_row("ABS/GRP", "10", "1001"),
        );
        let targets = directory.list_dial_targets().await;
        let values: Vec<&str> = targets.iter().map(|t| t.value.as_str()).collect();
        assert_eq!(values, vec!["201", "300", "1001", "G1", "G10"]);
        assert_eq!(targets[0].label, "201 (F)");
        assert_eq!(targets[1].label, "300 (G1)");
        assert_eq!(targets[4].label, "G10 (Group)");
    }

    #[tokio::test]
    async fn test_trunk_switchers() {
        let (_, directory) = service(
            MemoryPbx::new()
                .with_row("ABS/TSSW", "1", "on")
                .with_row("ABS/TSSW", "1/NAME", "day")
                .with_row("ABS/TSSW", "2", "off"),
        );
        assert_eq!(directory.list_trunk_switchers().await, vec!["1", "2"]);
    }

    #[test]
    fn test_parse_registrations() {
        let output = "Response: Success\n\
            Message: Command output follows\n\
            Output: \n\
            Output:  <Registration/ServerURI..............................>  <Auth..........>  <Status.......>\n\
            Output: ==========================================================================================\n\
            Output: \n\
            Output:  trunk-a/sip:trunk-a@203.0.113.5:5060                     trunk-a-auth      Registered        (exp. 3597s)\n\
            Output:  trunk-b/sip:trunk-b@198.51.100.7                         trunk-b-auth      Rejected\n\
            Output:  trunk-a/sip:backup@203.0.113.6                           trunk-a-auth      Unregistered\n\
            Output: \n\
            Output: Objects found: 3\n";
        let trunks = parse_registrations(output);
        assert_eq!(trunks.len(), 2);
        assert_eq!(trunks[0].name, "trunk-a");
        assert_eq!(trunks[0].state, RegistrationState::Registered);
        assert_eq!(trunks[1].name, "trunk-b");
        assert_eq!(trunks[1].state, RegistrationState::Rejected);
    }

    #[tokio::test]
    async fn test_trunks_unreachable_pbx() {
        let pbx = MemoryPbx::new();
        pbx.set_offline(true);
        let (_, directory) = service(pbx);
        assert!(directory.trunk_names().await.is_empty());
    }
}
