//! Web-phone session manager
//!
//! A browser opens a signaling WebSocket with a short-lived token; the manager
//! verifies it and registers one [`Session`] per extension. The PBX side of a call
//! arrives as a separate "leg" connection which feeds control signals and audio.
//!
//! ```text
//! DISCONNECTED -connect-> IDLE -RINGING-> RINGING -answer/ANSWER-> TALKING
//!        ^                  ^                 |                       |
//!        |                  +-----HANGUP------+-----------------------+
//!        +------------------------BUSY / KICKED / disconnect----------+
//! ```
//!
//! A second connect for an extension evicts the incumbent, which receives `KICKED`
//! before it is closed. Server-side teardown always queues a terminal signal for
//! the browser first.

use crate::audio::AudioQueue;
use bytes::Bytes;
use callbridge_auth::{Claims, TokenService};
use callbridge_core::config::WebPhoneConfig;
use callbridge_core::models::{CallState, Signal};
use callbridge_core::{AppError, AppResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// PBX-side connection attached to a session for one call
struct LegLink {
    id: Uuid,
    signals: mpsc::Sender<Signal>,
    audio: Arc<AudioQueue>,
}

impl LegLink {
    /// Close the leg, optionally telling it why
    fn release(self, notify: Option<Signal>) {
        if let Some(signal) = notify {
            if self.signals.try_send(signal).is_err() {
                debug!(leg = %self.id, "Leg already gone");
            }
        }
        self.audio.close();
    }
}

struct SessionInner {
    state: CallState,
    rejected: Option<Signal>,
    leg: Option<LegLink>,
}

/// Result of feeding a PBX signal into a session
enum SignalEffect {
    Ignored,
    Applied,
    /// The session must be torn down with this signal
    Terminate(Signal),
}

/// One authenticated web-phone connection
pub struct Session {
    id: Uuid,
    extension: String,
    claims: Claims,
    connected_at: DateTime<Utc>,
    frame_bytes: usize,
    inner: Mutex<SessionInner>,
    to_client: mpsc::Sender<Signal>,
    /// Audio frames for the browser
    client_audio: AudioQueue,
    leg_audio_capacity: usize,
    closed: CancellationToken,
}

impl Session {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn state(&self) -> CallState {
        self.inner.lock().state
    }

    /// Why the session was rejected (`BUSY` or `KICKED`), if it was
    pub fn rejected(&self) -> Option<Signal> {
        self.inner.lock().rejected
    }

    pub fn has_leg(&self) -> bool {
        self.inner.lock().leg.is_some()
    }

    /// Fires once the session is torn down
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Audio waiting to be written to the browser
    pub fn client_audio(&self) -> &AudioQueue {
        &self.client_audio
    }

    fn send_client(&self, signal: Signal) {
        if self.to_client.try_send(signal).is_err() {
            warn!(ext = %self.extension, signal = %signal, "Signal queue full or closed");
        }
    }

    /// Browser picked up: RINGING -> TALKING, ANSWER goes to the leg
    ///
    /// Returns `false` (and changes nothing) outside RINGING.
    pub fn answer(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != CallState::Ringing {
            debug!(ext = %self.extension, state = %inner.state, "Answer ignored");
            return false;
        }
        inner.state = CallState::Talking;
        if let Some(leg) = &inner.leg {
            let _ = leg.signals.try_send(Signal::Answer);
        }
        info!(ext = %self.extension, "Call answered");
        true
    }

    /// Browser hung up: RINGING/TALKING -> IDLE
    ///
    /// HANGUP is forwarded to the leg and echoed to the browser. Returns `false`
    /// (and changes nothing) when no call is up.
    pub fn hangup(&self) -> bool {
        let leg = {
            let mut inner = self.inner.lock();
            if !inner.state.in_call() {
                debug!(ext = %self.extension, state = %inner.state, "Hangup ignored");
                return false;
            }
            inner.state = CallState::Idle;
            inner.leg.take()
        };
        if let Some(leg) = leg {
            leg.release(Some(Signal::Hangup));
        }
        self.client_audio.clear();
        self.send_client(Signal::Hangup);
        info!(ext = %self.extension, "Call hung up by browser");
        true
    }

    /// Forward a browser frame to the leg; only while TALKING
    pub fn relay_from_client(&self, frame: Bytes) -> bool {
        let inner = self.inner.lock();
        if inner.state != CallState::Talking {
            return false;
        }
        if frame.len() != self.frame_bytes {
            debug!(ext = %self.extension, len = frame.len(), "Unexpected frame size");
        }
        match &inner.leg {
            Some(leg) => leg.audio.push(frame),
            None => false,
        }
    }

    /// Queue a PBX frame for the browser; only while TALKING
    pub fn relay_to_client(&self, frame: Bytes) -> bool {
        if self.state() != CallState::Talking {
            return false;
        }
        self.client_audio.push(frame)
    }

    fn leg_is(&self, leg_id: Uuid) -> bool {
        self.inner
            .lock()
            .leg
            .as_ref()
            .map(|l| l.id == leg_id)
            .unwrap_or(false)
    }

    fn on_pbx_signal(&self, signal: Signal) -> SignalEffect {
        let mut inner = self.inner.lock();
        let state = inner.state;
        match (signal, state) {
            (Signal::Ringing, CallState::Idle) => {
                inner.state = CallState::Ringing;
                drop(inner);
                self.send_client(Signal::Ringing);
                SignalEffect::Applied
            }
            (Signal::Answer, CallState::Ringing) => {
                inner.state = CallState::Talking;
                drop(inner);
                self.send_client(Signal::Answer);
                SignalEffect::Applied
            }
            (Signal::Hangup, CallState::Ringing | CallState::Talking) => {
                inner.state = CallState::Idle;
                let leg = inner.leg.take();
                drop(inner);
                if let Some(leg) = leg {
                    leg.release(None);
                }
                self.client_audio.clear();
                self.send_client(Signal::Hangup);
                SignalEffect::Applied
            }
            (Signal::Busy | Signal::Kicked, CallState::Ringing | CallState::Talking) => {
                SignalEffect::Terminate(signal)
            }
            _ => {
                debug!(ext = %self.extension, signal = %signal, state = %state, "Signal ignored");
                SignalEffect::Ignored
            }
        }
    }

    /// Send `signal` (if any), close the leg and mark the session DISCONNECTED
    ///
    /// Returns `false` when the session was already torn down.
    fn terminate(&self, signal: Option<Signal>, notify_leg: bool) -> bool {
        let leg = {
            let mut inner = self.inner.lock();
            if inner.state == CallState::Disconnected {
                return false;
            }
            inner.state = CallState::Disconnected;
            if let Some(signal) = signal.filter(Signal::is_rejection) {
                inner.rejected = Some(signal);
            }
            inner.leg.take()
        };
        if let Some(signal) = signal {
            self.send_client(signal);
        }
        if let Some(leg) = leg {
            leg.release(notify_leg.then_some(Signal::Hangup));
        }
        self.client_audio.close();
        self.closed.cancel();
        true
    }
}

/// Session handed to the signaling connection
pub struct SessionHandle {
    pub session: Arc<Session>,
    /// Control tokens to write to the browser, in order
    pub signals: mpsc::Receiver<Signal>,
}

/// PBX leg handed to the leg connection
pub struct LegHandle {
    pub id: Uuid,
    pub session: Arc<Session>,
    /// Signals for the PBX side
    pub signals: mpsc::Receiver<Signal>,
    /// Browser audio for the PBX side
    pub audio: Arc<AudioQueue>,
}

impl LegHandle {
    pub fn extension(&self) -> &str {
        self.session.extension()
    }

    /// Whether this leg is still the one attached to its session
    pub fn is_attached(&self) -> bool {
        self.session.leg_is(self.id)
    }

    /// Queue PBX audio for the browser while this leg is attached
    pub fn relay_to_client(&self, frame: Bytes) -> bool {
        self.is_attached() && self.session.relay_to_client(frame)
    }
}

/// Outcome of a leg attach request
pub enum LegOutcome {
    Attached(LegHandle),
    /// Refused; the leg should receive this signal and be closed
    Rejected(Signal),
}

/// Snapshot of a session for listings
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub extension: String,
    pub state: CallState,
    pub connected_at: DateTime<Utc>,
    pub expires_at: i64,
    pub has_leg: bool,
}

/// Registry of web-phone sessions, at most one per extension
pub struct WebPhoneManager {
    tokens: TokenService,
    config: WebPhoneConfig,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl WebPhoneManager {
    pub fn new(tokens: TokenService, config: WebPhoneConfig) -> Self {
        Self {
            tokens,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn config(&self) -> &WebPhoneConfig {
        &self.config
    }

    /// Verify a web-phone token
    ///
    /// # Errors
    ///
    /// `AppError::InvalidToken` for malformed or wrongly signed tokens,
    /// `AppError::TokenExpired` once `exp` has passed.
    pub fn authenticate(&self, token: &str) -> AppResult<Claims> {
        self.tokens.validate_token(token)
    }

    /// Open a session for the token's extension
    ///
    /// An existing session for the same extension is evicted with `KICKED`; the
    /// check and the replacement happen under one lock.
    ///
    /// # Errors
    ///
    /// Token errors from [`authenticate`](Self::authenticate).
    #[instrument(skip(self, token))]
    pub fn connect(&self, token: &str) -> AppResult<SessionHandle> {
        let claims = self.authenticate(token)?;
        let extension = claims.ext.clone();
        let (tx, rx) = mpsc::channel(self.config.signal_queue.max(4));

        let session = Arc::new(Session {
            id: Uuid::new_v4(),
            extension: extension.clone(),
            claims,
            connected_at: Utc::now(),
            frame_bytes: self.config.frame_bytes(),
            inner: Mutex::new(SessionInner {
                state: CallState::Idle,
                rejected: None,
                leg: None,
            }),
            to_client: tx,
            client_audio: AudioQueue::new(self.config.audio_queue_frames),
            leg_audio_capacity: self.config.audio_queue_frames,
            closed: CancellationToken::new(),
        });

        let incumbent = {
            let mut sessions = self.sessions.lock();
            let incumbent = sessions.insert(extension.clone(), session.clone());
            if let Some(old) = &incumbent {
                old.terminate(Some(Signal::Kicked), true);
            }
            incumbent
        };

        if let Some(old) = incumbent {
            warn!(ext = %extension, evicted = %old.id(), "Duplicate session, incumbent kicked");
        }
        info!(ext = %extension, session = %session.id(), "Web-phone session connected");

        Ok(SessionHandle {
            session,
            signals: rx,
        })
    }

    /// Live session for `extension`
    pub fn session(&self, extension: &str) -> Option<Arc<Session>> {
        self.sessions.lock().get(extension).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions
            .lock()
            .values()
            .map(|s| SessionInfo {
                id: s.id(),
                extension: s.extension().to_string(),
                state: s.state(),
                connected_at: s.connected_at(),
                expires_at: s.claims().exp,
                has_leg: s.has_leg(),
            })
            .collect()
    }

    /// Feed a PBX signal into the session for `extension`
    ///
    /// # Errors
    ///
    /// `AppError::SessionNotFound` when the extension has no session.
    pub fn on_signal(&self, extension: &str, signal: Signal) -> AppResult<CallState> {
        let session = self
            .session(extension)
            .ok_or_else(|| AppError::SessionNotFound(extension.to_string()))?;
        Ok(self.apply(&session, signal))
    }

    /// Feed a signal coming from `leg`; ignored once the leg is detached
    pub fn on_leg_signal(&self, leg: &LegHandle, signal: Signal) -> CallState {
        if !leg.is_attached() {
            debug!(leg = %leg.id, signal = %signal, "Signal from detached leg ignored");
            return leg.session.state();
        }
        self.apply(&leg.session, signal)
    }

    fn apply(&self, session: &Arc<Session>, signal: Signal) -> CallState {
        match session.on_pbx_signal(signal) {
            SignalEffect::Terminate(signal) => {
                info!(ext = %session.extension(), signal = %signal, "Call rejected, closing session");
                self.release(session);
                session.terminate(Some(signal), false);
            }
            SignalEffect::Applied => {
                debug!(ext = %session.extension(), signal = %signal, state = %session.state(), "Signal applied");
            }
            SignalEffect::Ignored => {}
        }
        session.state()
    }

    /// Attach a PBX leg to the session for `extension`
    ///
    /// Refused with `HANGUP` when nobody is connected, and with `BUSY` when the
    /// session already has a call.
    #[instrument(skip(self))]
    pub fn attach_leg(&self, extension: &str) -> LegOutcome {
        let Some(session) = self.session(extension) else {
            info!("Leg for unconnected extension");
            return LegOutcome::Rejected(Signal::Hangup);
        };

        let (tx, rx) = mpsc::channel(self.config.signal_queue.max(4));
        let audio = Arc::new(AudioQueue::new(session.leg_audio_capacity));
        let id = Uuid::new_v4();
        {
            let mut inner = session.inner.lock();
            if inner.state != CallState::Idle || inner.leg.is_some() {
                info!(state = %inner.state, "Extension busy, leg refused");
                return LegOutcome::Rejected(Signal::Busy);
            }
            inner.leg = Some(LegLink {
                id,
                signals: tx,
                audio: audio.clone(),
            });
        }

        info!(leg = %id, "Leg attached");
        LegOutcome::Attached(LegHandle {
            id,
            session,
            signals: rx,
            audio,
        })
    }

    /// Detach `leg`; an active call ends with HANGUP to the browser
    pub fn detach_leg(&self, leg: &LegHandle) {
        let (link, was_in_call) = {
            let mut inner = leg.session.inner.lock();
            let attached = inner.leg.as_ref().map(|l| l.id == leg.id).unwrap_or(false);
            if !attached {
                return;
            }
            let in_call = inner.state.in_call();
            if in_call {
                inner.state = CallState::Idle;
            }
            (inner.leg.take(), in_call)
        };
        if let Some(link) = link {
            link.release(None);
        }
        if was_in_call {
            leg.session.client_audio.clear();
            leg.session.send_client(Signal::Hangup);
        }
        info!(leg = %leg.id, ext = %leg.extension(), was_in_call, "Leg detached");
    }

    /// Browser went away; idempotent
    pub fn disconnect(&self, session: &Arc<Session>) -> bool {
        self.release(session);
        let closed = session.terminate(None, true);
        if closed {
            info!(ext = %session.extension(), session = %session.id(), "Web-phone session disconnected");
        }
        closed
    }

    /// Token lifetime ran out: HANGUP, then close
    pub fn expire(&self, session: &Arc<Session>) -> bool {
        self.release(session);
        let closed = session.terminate(Some(Signal::Hangup), true);
        if closed {
            info!(ext = %session.extension(), "Web-phone token expired, session closed");
        }
        closed
    }

    /// Close every session with HANGUP
    pub fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        for session in &sessions {
            session.terminate(Some(Signal::Hangup), true);
        }
        info!(count = sessions.len(), "Web-phone sessions closed");
    }

    /// Drop the registry entry if it still points at `session`
    fn release(&self, session: &Arc<Session>) {
        let mut sessions = self.sessions.lock();
        if sessions
            .get(session.extension())
            .map(|current| Arc::ptr_eq(current, session))
            .unwrap_or(false)
        {
            sessions.remove(session.extension());
        }
    }
}
