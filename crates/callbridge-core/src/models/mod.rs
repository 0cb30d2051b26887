//! Domain models for CallBridge
//!
//! This module contains the core domain models shared by the PBX client, the
//! services and the HTTP surface.

pub mod call_event;
pub mod customer;
pub mod directory;
pub mod signal;

pub use call_event::{
    is_broadcast_target, CallEvent, CallEventData, CallEventEnvelope, CallEventKind,
    BROADCAST_TARGET,
};
pub use customer::CustomerRecord;
pub use directory::{
    natural_cmp, BindOutcome, DbEntry, Endpoint, EndpointBinding, PagingGroup, RegistrationState,
    RingGroup, RingMode, RoutingTarget, SpeedDialKey, TargetKind, Trunk,
};
pub use signal::{CallState, Signal};
