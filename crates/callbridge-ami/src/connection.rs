//! Manager interface TCP connection
//!
//! Owns one authenticated socket. All reads and writes go through a single async
//! mutex so request/response pairs never interleave.

use crate::constants::{BANNER_PREFIX, LOGIN_ACCEPTED, LOGOFF_WAIT_MS};
use crate::error::AmiError;
use crate::event::AmiEvent;
use crate::response::ResponseBlock;
use callbridge_core::config::AmiConfig;
use parking_lot::Mutex as StateMutex;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Lifecycle of a manager connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unauthenticated,
    Authenticated,
    Closed,
}

/// A manager action: `Action: <name>` followed by headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    name: String,
    headers: Vec<(String, String)>,
}

impl Action {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            headers: Vec::new(),
        }
    }

    /// `Action: Command` running a CLI command
    pub fn command(command: &str) -> Self {
        Self::new("Command").header("Command", command)
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reject actions that would inject extra header lines
    pub fn validate(&self) -> Result<(), AmiError> {
        let has_break = |s: &str| s.contains('\r') || s.contains('\n');
        if has_break(&self.name)
            || self
                .headers
                .iter()
                .any(|(k, v)| has_break(k) || has_break(v))
        {
            return Err(AmiError::InvalidArgument(format!(
                "line break in {} action",
                self.name
            )));
        }
        Ok(())
    }

    /// CRLF-framed wire form, closed by a blank line
    pub fn to_wire(&self) -> String {
        let mut out = format!("Action: {}\r\n", self.name);
        for (key, value) in &self.headers {
            out.push_str(key);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out
    }
}

/// An authenticated manager connection
pub struct ManagerConnection {
    stream: Mutex<BufReader<TcpStream>>,
    state: StateMutex<ConnectionState>,
    server_id: String,
    read_timeout: Duration,
}

impl ManagerConnection {
    /// Connect and log in with events disabled
    ///
    /// # Errors
    ///
    /// Returns [`AmiError::Connect`] when the socket cannot be opened within the
    /// connect timeout and [`AmiError::Auth`] when the login is not accepted.
    pub async fn connect(config: &AmiConfig) -> Result<Self, AmiError> {
        Self::open(config, false).await
    }

    /// Connect and log in with events enabled (for the event listener)
    pub async fn connect_with_events(config: &AmiConfig) -> Result<Self, AmiError> {
        Self::open(config, true).await
    }

    async fn open(config: &AmiConfig, events: bool) -> Result<Self, AmiError> {
        let server_id = config.addr();
        info!(server = %server_id, "Connecting to Asterisk manager");

        let stream = match timeout(config.connect_timeout(), TcpStream::connect(&server_id)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(AmiError::Connect(format!("{}: {}", server_id, e))),
            Err(_) => {
                return Err(AmiError::Connect(format!(
                    "{}: timed out after {} ms",
                    server_id, config.connect_timeout_ms
                )))
            }
        };

        let conn = Self {
            stream: Mutex::new(BufReader::new(stream)),
            state: StateMutex::new(ConnectionState::Unauthenticated),
            server_id,
            read_timeout: config.read_timeout(),
        };

        conn.read_banner().await;
        conn.login(&config.username, &config.secret, events).await?;
        Ok(conn)
    }

    async fn read_banner(&self) {
        let mut stream = self.stream.lock().await;
        let mut buf = Vec::new();
        match timeout(self.read_timeout, stream.read_until(b'\n', &mut buf)).await {
            Ok(Ok(n)) if n > 0 => {
                let banner = String::from_utf8_lossy(&buf);
                let banner = banner.trim();
                if banner.starts_with(BANNER_PREFIX) {
                    debug!(server = %self.server_id, banner = %banner, "Manager banner");
                } else {
                    warn!(server = %self.server_id, line = %banner, "Unexpected manager greeting");
                }
            }
            _ => debug!(server = %self.server_id, "No manager banner received"),
        }
    }

    async fn login(&self, username: &str, secret: &str, events: bool) -> Result<(), AmiError> {
        let action = Action::new("Login")
            .header("Username", username)
            .header("Secret", secret)
            .header("Events", if events { "on" } else { "off" });
        action.validate()?;

        let reply = match self.exchange(&action).await {
            Ok(reply) => reply,
            Err(AmiError::Timeout(_)) => ResponseBlock::default(),
            Err(e) => return Err(e),
        };

        if reply.contains(LOGIN_ACCEPTED) {
            *self.state.lock() = ConnectionState::Authenticated;
            info!(server = %self.server_id, username = %username, "Authenticated to Asterisk manager");
            Ok(())
        } else {
            let reason = reply
                .message()
                .unwrap_or("Authentication failed")
                .to_string();
            self.shutdown().await;
            Err(AmiError::Auth(reason))
        }
    }

    /// Send an action and read its reply block
    ///
    /// A reply that stops arriving before the closing blank line is returned with
    /// `is_terminated() == false`. A truncated or timed-out reply may still be in
    /// flight, so the connection closes itself and is not reused.
    ///
    /// # Errors
    ///
    /// [`AmiError::Closed`] on a closed connection or EOF, [`AmiError::Timeout`]
    /// when nothing at all arrives within the read timeout.
    pub async fn query(&self, action: &Action) -> Result<ResponseBlock, AmiError> {
        if self.state() != ConnectionState::Authenticated {
            return Err(AmiError::Closed);
        }
        action.validate()?;

        let result = self.exchange(action).await;
        match &result {
            Ok(block) if !block.is_terminated() => {
                warn!(
                    server = %self.server_id,
                    action = %action.name(),
                    lines = block.lines().len(),
                    "Manager reply truncated by read timeout, closing connection"
                );
                self.shutdown().await;
            }
            Err(AmiError::Timeout(ms)) => {
                warn!(
                    server = %self.server_id,
                    action = %action.name(),
                    timeout_ms = ms,
                    "No manager reply, closing connection"
                );
                self.shutdown().await;
            }
            Err(e) if e.is_fatal() => {
                *self.state.lock() = ConnectionState::Closed;
            }
            _ => {}
        }
        result
    }

    async fn exchange(&self, action: &Action) -> Result<ResponseBlock, AmiError> {
        let mut stream = self.stream.lock().await;
        let wire = action.to_wire();
        {
            let socket = stream.get_mut();
            socket.write_all(wire.as_bytes()).await?;
            socket.flush().await?;
        }
        debug!(server = %self.server_id, action = %action.name(), "Sent manager action");
        read_block(&mut stream, Some(self.read_timeout)).await
    }

    /// Wait for the next event block (listener connections)
    ///
    /// Non-event blocks (replies) are skipped.
    pub async fn read_event(&self) -> Result<AmiEvent, AmiError> {
        let mut stream = self.stream.lock().await;
        loop {
            let block = read_block(&mut stream, None).await?;
            let event = AmiEvent::from_block(&block);
            if event.is_event() {
                return Ok(event);
            }
        }
    }

    /// Keepalive probe
    pub async fn ping(&self) -> Result<(), AmiError> {
        let reply = self.query(&Action::new("Ping")).await?;
        if reply.is_success() || reply.header("Ping") == Some("Pong") {
            Ok(())
        } else {
            Err(AmiError::Protocol(format!(
                "ping answered with {:?}",
                reply.header("Response")
            )))
        }
    }

    /// Best-effort logoff; safe to call more than once
    pub async fn logout(&self) {
        if self.state() == ConnectionState::Closed {
            return;
        }
        *self.state.lock() = ConnectionState::Closed;

        let mut stream = self.stream.lock().await;
        let wire = Action::new("Logoff").to_wire();
        if stream.get_mut().write_all(wire.as_bytes()).await.is_ok() {
            let _ = timeout(
                Duration::from_millis(LOGOFF_WAIT_MS),
                read_block(&mut stream, Some(self.read_timeout)),
            )
            .await;
        }
        let _ = stream.get_mut().shutdown().await;
        info!(server = %self.server_id, "Logged off from Asterisk manager");
    }

    async fn shutdown(&self) {
        *self.state.lock() = ConnectionState::Closed;
        let mut stream = self.stream.lock().await;
        let _ = stream.get_mut().shutdown().await;
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Authenticated
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }
}

/// Read one blank-line-terminated block
///
/// With `line_timeout` set, a line that does not arrive in time ends the block:
/// partial data comes back as a truncated block, no data at all as
/// [`AmiError::Timeout`].
async fn read_block(
    reader: &mut BufReader<TcpStream>,
    line_timeout: Option<Duration>,
) -> Result<ResponseBlock, AmiError> {
    let mut lines: Vec<String> = Vec::new();

    loop {
        let mut buf = Vec::new();
        let read = match line_timeout {
            Some(limit) => match timeout(limit, reader.read_until(b'\n', &mut buf)).await {
                Ok(result) => result?,
                Err(_) => {
                    push_partial(&mut lines, &buf);
                    if lines.is_empty() {
                        return Err(AmiError::Timeout(limit.as_millis() as u64));
                    }
                    return Ok(ResponseBlock::truncated(lines));
                }
            },
            None => reader.read_until(b'\n', &mut buf).await?,
        };

        if read == 0 {
            push_partial(&mut lines, &buf);
            if lines.is_empty() {
                return Err(AmiError::Closed);
            }
            return Ok(ResponseBlock::truncated(lines));
        }

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            if lines.is_empty() {
                continue;
            }
            return Ok(ResponseBlock::complete(lines));
        }
        lines.push(line.to_string());
    }
}

fn push_partial(lines: &mut Vec<String>, buf: &[u8]) {
    let partial = String::from_utf8_lossy(buf);
    let partial = partial.trim_end_matches(['\r', '\n']);
    if !partial.is_empty() {
        lines.push(partial.to_string());
    }
}
