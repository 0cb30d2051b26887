//! Business logic services for CallBridge
//!
//! This crate contains the services that sit between the HTTP/WebSocket surface
//! and the PBX: directory translation, call-event fan-out, web-phone sessions and
//! outbound origination.
//!
//! # Architecture
//!
//! Services are designed to be composable and testable:
//! - PBX access goes through the `PbxCommands` trait, injected as `Arc<dyn PbxCommands>`
//! - Registries are guarded by `parking_lot::Mutex`; check-and-insert happens under one lock
//! - All entry points are instrumented with tracing
//!
//! # Services
//!
//! - `DirectoryService` - endpoint, group, key and trunk views of the PBX database
//! - `NotifierHub` - push fan-out of incoming-call events to browser subscribers
//! - `PopupSubscriber` - subscriber-side client with reconnect and popup suppression
//! - `WebPhoneManager` - token-authenticated web-phone sessions and their state machine
//! - `OriginateGateway` - click-to-call originate commands
//! - `HttpCustomerLookup` - CRM lookup used for caller-ID names

pub mod audio;
pub mod customer;
pub mod directory;
pub mod memory;
pub mod notifier;
pub mod originate;
pub mod subscriber;
pub mod webphone;

pub use audio::AudioQueue;
pub use customer::{cid_name, HttpCustomerLookup, NoCustomerLookup};
pub use directory::{is_digits, DirectoryService};
pub use memory::MemoryPbx;
pub use notifier::{DeliveryReport, NotifierHub, PushMessage, SubscriberHandle, SubscriberInfo};
pub use originate::{DialAccepted, OriginateGateway};
pub use subscriber::{should_popup, PopupSubscriber, PopupTarget, SubscriberState};
pub use webphone::{LegHandle, LegOutcome, Session, SessionHandle, SessionInfo, WebPhoneManager};

/// Service constants
pub mod constants {
    /// Database families used by the directory
    pub const FAMILY_ENDPOINT: &str = "ABS/ERV";
    pub const FAMILY_EXTENSION: &str = "ABS/EXT";
    pub const FAMILY_LIMIT: &str = "ABS/LMT";
    pub const FAMILY_GROUP: &str = "ABS/GRP";
    pub const FAMILY_PAGING: &str = "ABS/PGRP";
    pub const FAMILY_ROAMING: &str = "ABS/FAP/UID";
    pub const FAMILY_TRUNK_SWITCH: &str = "ABS/TSSW";
    pub const FAMILY_KEY: &str = "KEYTEL";

    /// Endpoint key holding the local ring destination
    pub const LOCAL_RING_KEY: &str = "localring";

    /// CLI command listing outbound registrations
    pub const SHOW_REGISTRATIONS: &str = "pjsip show registrations";

    /// Reply used by the caller-ID name lookup for malformed numbers
    pub const CID_VALIDATION_ERROR: &str = "番号指定エラー";

    /// Subscriber reconnect bounds in milliseconds
    pub const SUBSCRIBER_BACKOFF_FLOOR_MS: u64 = 50;
    pub const SUBSCRIBER_BACKOFF_CAP_MS: u64 = 10_000;

    /// Popup window name prefix for tab rotation
    pub const POPUP_TAB_PREFIX: &str = "CTITab";
}
