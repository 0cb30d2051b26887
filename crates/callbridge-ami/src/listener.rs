//! Bridge-based popup detection
//!
//! A second manager connection with events enabled feeds a [`ChannelTracker`]. When
//! an internal phone channel joins a bridge and an external channel of the same call
//! (same `Linkedid`) is known, one [`CallEvent`] is emitted for that internal channel.

use crate::client::{next_backoff, with_jitter};
use crate::connection::ManagerConnection;
use crate::error::AmiError;
use crate::event::AmiEvent;
use crate::events::{BRIDGE_ENTER, HANGUP, NEWCHANNEL, NEWSTATE};
use callbridge_core::config::AmiConfig;
use callbridge_core::models::CallEvent;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// State kept per live channel
#[derive(Debug, Clone, Default)]
struct TrackedChannel {
    linked_id: String,
    channel: String,
    caller_id_num: String,
    caller_id_name: String,
    internal: bool,
    up: bool,
    /// A popup already fired for this channel
    notified: bool,
}

/// Channel bookkeeping driven by manager events
#[derive(Debug, Default)]
pub struct ChannelTracker {
    channels: HashMap<String, TrackedChannel>,
    external_trunks: Vec<String>,
}

impl ChannelTracker {
    pub fn new(external_trunks: Vec<String>) -> Self {
        Self {
            channels: HashMap::new(),
            external_trunks,
        }
    }

    /// `PJSIP/` or `SIP/` channels that are not on an external trunk
    pub fn is_internal(&self, channel: &str) -> bool {
        if self
            .external_trunks
            .iter()
            .any(|t| !t.is_empty() && channel.contains(t.as_str()))
        {
            return false;
        }
        if channel.starts_with("Local/") {
            return false;
        }
        channel.starts_with("PJSIP/") || channel.starts_with("SIP/")
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Feed one event; returns a call event when a popup should fire
    pub fn handle(&mut self, event: &AmiEvent) -> Option<CallEvent> {
        let name = event.event_name()?;
        let uid = event.unique_id()?.to_string();

        if name == NEWCHANNEL && !self.channels.contains_key(&uid) {
            let channel = event.channel().unwrap_or_default().to_string();
            let tracked = TrackedChannel {
                linked_id: event.linked_id().unwrap_or(uid.as_str()).to_string(),
                internal: self.is_internal(&channel),
                channel,
                caller_id_num: event.caller_id_num().unwrap_or_default().to_string(),
                caller_id_name: event.caller_id_name().unwrap_or_default().to_string(),
                ..Default::default()
            };
            debug!(uniqueid = %uid, channel = %tracked.channel, internal = tracked.internal, "Tracking channel");
            self.channels.insert(uid, tracked);
            return None;
        }

        match name {
            NEWSTATE => {
                let channel = self.channels.get_mut(&uid)?;
                if event.channel_state_desc() == Some("Up") {
                    channel.up = true;
                }
                if channel.caller_id_num.is_empty() {
                    if let Some(num) = event.caller_id_num() {
                        channel.caller_id_num = num.to_string();
                    }
                }
                None
            }
            BRIDGE_ENTER => {
                let channel = self.channels.get_mut(&uid)?;
                if !channel.internal || channel.notified {
                    return None;
                }
                self.popup_for(&uid)
            }
            HANGUP => {
                self.channels.remove(&uid);
                None
            }
            _ => None,
        }
    }

    fn popup_for(&mut self, uid: &str) -> Option<CallEvent> {
        let internal = self.channels.get(uid)?;
        let external = self
            .channels
            .iter()
            .find(|(id, ch)| {
                id.as_str() != uid && ch.linked_id == internal.linked_id && !ch.internal
            })
            .map(|(_, ch)| ch.clone())?;

        let extension = internal.caller_id_num.clone();
        let internal_channel = internal.channel.clone();
        let answered = internal.up;
        if let Some(internal) = self.channels.get_mut(uid) {
            internal.notified = true;
        }

        info!(
            internal = %internal_channel,
            external = %external.channel,
            caller = %external.caller_id_num,
            caller_name = %external.caller_id_name,
            answered,
            "Bridged inbound call detected"
        );

        let target = (!extension.is_empty()).then_some(extension);
        Some(CallEvent::incoming(external.caller_id_num, target))
    }
}

/// Supervised event listener publishing detected calls on a channel
pub struct EventListener {
    config: AmiConfig,
    external_trunks: Vec<String>,
    sink: mpsc::Sender<CallEvent>,
}

impl EventListener {
    pub fn new(
        config: AmiConfig,
        external_trunks: Vec<String>,
        sink: mpsc::Sender<CallEvent>,
    ) -> Self {
        Self {
            config,
            external_trunks,
            sink,
        }
    }

    /// Listen until `cancel` fires, reconnecting with jittered backoff
    #[instrument(skip(self, cancel), fields(server = %self.config.addr()))]
    pub async fn run(self, cancel: CancellationToken) {
        let initial = Duration::from_millis(self.config.reconnect_initial_ms.max(1));
        let max = Duration::from_millis(self.config.reconnect_max_ms).max(initial);
        let mut delay = initial;

        while !cancel.is_cancelled() {
            match ManagerConnection::connect_with_events(&self.config).await {
                Ok(conn) => {
                    info!("Listening for manager events");
                    delay = initial;
                    let outcome = tokio::select! {
                        _ = cancel.cancelled() => None,
                        result = self.pump(&conn) => Some(result),
                    };
                    conn.logout().await;
                    match outcome {
                        None | Some(Ok(())) => return,
                        Some(Err(e)) => warn!(error = %e, "Manager event stream ended"),
                    }
                }
                Err(e) => error!(error = %e, "Event connection failed"),
            }

            let wait = with_jitter(delay);
            warn!(wait_ms = wait.as_millis() as u64, "Reconnecting event listener");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(wait) => {}
            }
            delay = next_backoff(delay, max);
        }
    }

    /// Read events until the stream fails; `Ok` when the sink is gone
    async fn pump(&self, conn: &ManagerConnection) -> Result<(), AmiError> {
        // channel state does not survive a reconnect
        let mut tracker = ChannelTracker::new(self.external_trunks.clone());
        loop {
            let event = conn.read_event().await?;
            if let Some(call) = tracker.handle(&event) {
                if self.sink.send(call).await.is_err() {
                    info!("Call event receiver dropped, stopping listener");
                    return Ok(());
                }
            }
        }
    }
}
