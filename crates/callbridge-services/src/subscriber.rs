//! Subscriber-side push client
//!
//! `PopupSubscriber` keeps a WebSocket open to the push hub, decides for every
//! incoming envelope whether it concerns this desk, and turns accepted events into
//! CRM popup targets. The "popups disabled" switch lives outside the connection so
//! it survives reconnects.

use crate::constants::{POPUP_TAB_PREFIX, SUBSCRIBER_BACKOFF_CAP_MS, SUBSCRIBER_BACKOFF_FLOOR_MS};
use callbridge_core::config::{CrmConfig, SubscriberConfig};
use callbridge_core::models::{CallEvent, CallEventEnvelope};
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

type PushStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection state of the subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriberState {
    Connecting,
    Open,
    Closed,
}

/// A popup to surface for an accepted call event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PopupTarget {
    pub phone: String,
    /// CRM customer page for the caller
    pub url: String,
    /// Window name, rotating through `CTITab1..=max_tabs`
    pub tab: String,
}

/// Whether a desk on `own_extension` should pop up for `event`
pub fn should_popup(own_extension: Option<&str>, event: &CallEvent) -> bool {
    event.is_for(own_extension)
}

/// Reconnect wait: never zero, never above the cap
pub fn backoff_interval(reconnect_ms: u64) -> Duration {
    Duration::from_millis(reconnect_ms.clamp(SUBSCRIBER_BACKOFF_FLOOR_MS, SUBSCRIBER_BACKOFF_CAP_MS))
}

/// CRM page showing the customer for `phone`
pub fn popup_url(base: &str, phone: &str) -> String {
    format!(
        "{}?page=crm-page&phone={}&popup=1",
        base,
        urlencoding::encode(phone)
    )
}

/// Reconnecting push-hub client
pub struct PopupSubscriber {
    url: String,
    extension: Option<String>,
    backoff: Duration,
    popup_base_url: String,
    max_tabs: u32,
    popups_disabled: Arc<AtomicBool>,
    state: Mutex<SubscriberState>,
    next_tab: AtomicU32,
    suppressed: AtomicU64,
    surfaced: AtomicU64,
    connects: AtomicU64,
    cancel: CancellationToken,
}

impl PopupSubscriber {
    pub fn new(config: &SubscriberConfig, crm: &CrmConfig) -> Self {
        Self {
            url: config.url.clone(),
            extension: config
                .extension
                .as_deref()
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(String::from),
            backoff: backoff_interval(config.reconnect_ms),
            popup_base_url: crm.popup_base_url.clone(),
            max_tabs: crm.max_tabs.max(1),
            popups_disabled: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(SubscriberState::Closed),
            next_tab: AtomicU32::new(0),
            suppressed: AtomicU64::new(0),
            surfaced: AtomicU64::new(0),
            connects: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        }
    }

    /// Share an existing suppression flag
    pub fn with_popups_disabled(mut self, flag: Arc<AtomicBool>) -> Self {
        self.popups_disabled = flag;
        self
    }

    /// Hub URL, carrying the extension so the hub can target this desk
    pub fn connect_url(&self) -> String {
        match &self.extension {
            Some(ext) => {
                let sep = if self.url.contains('?') { '&' } else { '?' };
                format!("{}{}exten={}", self.url, sep, urlencoding::encode(ext))
            }
            None => self.url.clone(),
        }
    }

    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    pub fn state(&self) -> SubscriberState {
        *self.state.lock()
    }

    fn set_state(&self, state: SubscriberState) {
        *self.state.lock() = state;
    }

    pub fn set_popups_disabled(&self, disabled: bool) {
        self.popups_disabled.store(disabled, Ordering::Relaxed);
        info!(disabled, "Popup suppression changed");
    }

    pub fn popups_disabled(&self) -> bool {
        self.popups_disabled.load(Ordering::Relaxed)
    }

    pub fn popups_disabled_flag(&self) -> Arc<AtomicBool> {
        self.popups_disabled.clone()
    }

    /// Matching events received while popups were disabled
    pub fn suppressed_count(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }

    pub fn surfaced_count(&self) -> u64 {
        self.surfaced.load(Ordering::Relaxed)
    }

    /// Successful connections so far
    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    /// Stop for good; `run` returns and does not reconnect
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn next_tab_name(&self) -> String {
        let index = self.next_tab.fetch_add(1, Ordering::Relaxed) % self.max_tabs;
        format!("{}{}", POPUP_TAB_PREFIX, index + 1)
    }

    /// Decide what to do with one text message from the hub
    ///
    /// Returns a popup target for accepted events. Malformed messages, events for
    /// other desks and events arriving while popups are disabled yield `None`.
    pub fn handle_message(&self, text: &str) -> Option<PopupTarget> {
        let envelope: CallEventEnvelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed push message");
                return None;
            }
        };
        let event = CallEvent::from(envelope);
        if event.phone.is_empty() {
            return None;
        }

        if !should_popup(self.extension.as_deref(), &event) {
            debug!(exten = ?event.target_extension, "Call event for another extension");
            return None;
        }

        if self.popups_disabled() {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            info!(phone = %event.phone, "Call event received while popups are disabled");
            return None;
        }

        self.surfaced.fetch_add(1, Ordering::Relaxed);
        let target = PopupTarget {
            url: popup_url(&self.popup_base_url, &event.phone),
            tab: self.next_tab_name(),
            phone: event.phone,
        };
        info!(phone = %target.phone, tab = %target.tab, "Popup");
        Some(target)
    }

    /// Stay connected until [`close`](Self::close), calling `on_popup` for every
    /// accepted event
    #[instrument(skip(self, on_popup), fields(url = %self.url))]
    pub async fn run<F>(&self, mut on_popup: F)
    where
        F: FnMut(PopupTarget),
    {
        let url = self.connect_url();

        while !self.cancel.is_cancelled() {
            self.set_state(SubscriberState::Connecting);
            let connected = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = connect_async(url.as_str()) => result,
            };

            match connected {
                Ok((mut stream, _)) => {
                    self.connects.fetch_add(1, Ordering::Relaxed);
                    self.set_state(SubscriberState::Open);
                    info!("Connected to push hub");

                    let outcome = tokio::select! {
                        _ = self.cancel.cancelled() => None,
                        result = self.pump(&mut stream, &mut on_popup) => Some(result),
                    };
                    match outcome {
                        None => {
                            let _ = stream.close(None).await;
                            break;
                        }
                        Some(Ok(())) => warn!("Push hub closed the connection"),
                        Some(Err(e)) => warn!(error = %e, "Push connection failed"),
                    }
                }
                Err(e) => warn!(error = %e, "Cannot reach push hub"),
            }

            self.set_state(SubscriberState::Closed);
            debug!(wait_ms = self.backoff.as_millis() as u64, "Reconnecting");
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(self.backoff) => {}
            }
        }

        self.set_state(SubscriberState::Closed);
        info!("Subscriber closed");
    }

    async fn pump<F>(&self, stream: &mut PushStream, on_popup: &mut F) -> Result<(), tungstenite::Error>
    where
        F: FnMut(PopupTarget),
    {
        while let Some(message) = stream.next().await {
            match message? {
                Message::Text(text) => {
                    if let Some(target) = self.handle_message(text.as_str()) {
                        on_popup(target);
                    }
                }
                Message::Close(_) => return Ok(()),
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::SinkExt;
    use std::sync::atomic::AtomicUsize;
    use tokio::net::TcpListener;

    fn subscriber(extension: Option<&str>, url: &str, reconnect_ms: u64) -> PopupSubscriber {
        let config = SubscriberConfig {
            url: url.to_string(),
            extension: extension.map(String::from),
            reconnect_ms,
        };
        let crm = CrmConfig {
            max_tabs: 2,
            ..Default::default()
        };
        PopupSubscriber::new(&config, &crm)
    }

    #[test]
    fn test_should_popup() {
        let broadcast = CallEvent::incoming("0311112222", None);
        let all = CallEvent::incoming("0311112222", Some("all".into()));
        let mine = CallEvent::incoming("0311112222", Some("2001".into()));

        assert!(should_popup(Some("2001"), &broadcast));
        assert!(should_popup(None, &all));
        assert!(should_popup(Some("2001"), &mine));
        assert!(!should_popup(Some("2002"), &mine));
        assert!(!should_popup(None, &mine));
    }

    #[test]
    fn test_should_popup_agrees_with_hub_routing() {
        let events = [
            CallEvent::incoming("0311112222", None),
            CallEvent::incoming("0311112222", Some("".into())),
            CallEvent::incoming("0311112222", Some("ALL".into())),
            CallEvent::incoming("0311112222", Some("2001".into())),
            CallEvent::incoming("0311112222", Some("2002".into())),
        ];
        for event in &events {
            for own in [None, Some("2001"), Some("2002")] {
                assert_eq!(should_popup(own, event), event.is_for(own), "{:?} / {:?}", own, event);
            }
        }
    }

    #[test]
    fn test_backoff_bounds() {
        assert_eq!(backoff_interval(0), Duration::from_millis(50));
        assert_eq!(backoff_interval(5000), Duration::from_secs(5));
        assert_eq!(backoff_interval(60_000), Duration::from_secs(10));
    }

    #[test]
    fn test_popup_url_and_tabs() {
        let sub = subscriber(Some("2001"), "ws://127.0.0.1:8989/crmws", 5000);
        assert_eq!(sub.connect_url(), "ws://127.0.0.1:8989/crmws?exten=2001");

        let msg = r#"{"type":"CALL_IN","data":{"phone":"+81 3","exten":"2001"}}"#;
        let first = sub.handle_message(msg).unwrap();
        assert_eq!(first.url, "index.php?page=crm-page&phone=%2B81%203&popup=1");
        assert_eq!(first.tab, "CTITab1");
        assert_eq!(sub.handle_message(msg).unwrap().tab, "CTITab2");
        assert_eq!(sub.handle_message(msg).unwrap().tab, "CTITab1");
    }

    #[test]
    fn test_suppression_and_filtering() {
        let sub = subscriber(Some("2001"), "ws://127.0.0.1:1/crmws", 5000);
        assert!(sub
            .handle_message(r#"{"type":"CALL_IN","data":{"phone":"1","exten":"2002"}}"#)
            .is_none());
        assert!(sub.handle_message("not json").is_none());

        sub.set_popups_disabled(true);
        assert!(sub
            .handle_message(r#"{"type":"CALL_IN","data":{"phone":"1"}}"#)
            .is_none());
        assert_eq!(sub.suppressed_count(), 1);
        assert_eq!(sub.surfaced_count(), 0);
    }

    #[tokio::test]
    async fn test_reconnect_keeps_suppression_and_close_stops() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));

        let server_accepted = accepted.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let n = server_accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                    let phone = format!("03000{}", n);
                    let text = format!(r#"{{"type":"CALL_IN","data":{{"phone":"{}"}}}}"#, phone);
                    ws.send(Message::Text(text.into())).await.unwrap();
                    // drop the connection to force a reconnect
                    let _ = ws.close(None).await;
                });
            }
        });

        let sub = Arc::new(subscriber(None, &format!("ws://{}/crmws", addr), 0));
        let popups = Arc::new(Mutex::new(Vec::new()));

        let runner = {
            let sub = sub.clone();
            let popups = popups.clone();
            tokio::spawn(async move {
                sub.run(|target| popups.lock().push(target.phone)).await;
            })
        };

        // first popup surfaces, then suppression is switched on
        for _ in 0..100 {
            if !popups.lock().is_empty() {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        sub.set_popups_disabled(true);

        for _ in 0..200 {
            if sub.suppressed_count() >= 1 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert!(sub.connect_count() >= 2);
        assert!(sub.suppressed_count() >= 1);
        assert!(sub.popups_disabled());

        sub.close();
        tokio::time::timeout(Duration::from_secs(2), runner)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sub.state(), SubscriberState::Closed);

        let connects = accepted.load(Ordering::SeqCst);
        sleep(Duration::from_millis(150)).await;
        assert_eq!(accepted.load(Ordering::SeqCst), connects);
    }
}
