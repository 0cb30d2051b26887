//! Web-phone endpoints
//!
//! - `POST /api/v1/webphone/token` mints a token for an extension (operator)
//! - `GET /webphone?token=` is the browser's signaling WebSocket
//! - `GET /webphone/leg/{ext}` is the PBX side of a call (operator)
//!
//! Control tokens travel as text frames (`RINGING`, `ANSWER`, `HANGUP`, `BUSY`,
//! `KICKED`); audio travels as binary frames of 16-bit little-endian mono PCM.

use crate::dto::{
    ApiResponse, DialResponse, TokenQuery, TokenRequest, TokenResponse, WebPhoneDialRequest,
};
use actix_web::{web, HttpRequest, HttpResponse};
use actix_ws::{Message, MessageStream, Session as WsSession};
use callbridge_auth::{ApiCaller, Claims, TokenService, WebPhoneCaller};
use callbridge_core::models::Signal;
use callbridge_core::AppError;
use callbridge_services::{
    is_digits, LegHandle, LegOutcome, OriginateGateway, SessionHandle, WebPhoneManager,
};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, sleep, Instant};
use tracing::{debug, error, info, instrument, warn};
use validator::Validate;

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Mint a web-phone token
///
/// POST /api/v1/webphone/token
#[instrument(skip(_caller, tokens, req))]
pub async fn issue_token(
    _caller: ApiCaller,
    tokens: web::Data<TokenService>,
    req: web::Json<TokenRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Token request validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let extension = req.extension.trim();
    if !is_digits(extension) {
        return Err(AppError::Validation(format!(
            "extension must be numeric: {}",
            extension
        )));
    }

    let claims = Claims::with_expiration(extension, tokens.expiration_secs());
    let token = tokens.create_token(&claims)?;
    info!(ext = %extension, exp = claims.exp, "Web-phone token issued");

    Ok(HttpResponse::Ok().json(ApiResponse::success(TokenResponse {
        token,
        extension: extension.to_string(),
        expires_in: tokens.expiration_secs(),
        expires_at: claims.expires_at(),
    })))
}

/// Open web-phone sessions
///
/// GET /api/v1/webphone/sessions
pub async fn list_sessions(
    _caller: ApiCaller,
    manager: web::Data<WebPhoneManager>,
) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::success(manager.sessions()))
}

/// Click-to-call from the browser's own extension
///
/// POST /api/v1/webphone/dial
#[instrument(skip(caller, gateway, req), fields(ext = %caller.extension()))]
pub async fn dial_from_webphone(
    caller: WebPhoneCaller,
    gateway: web::Data<OriginateGateway>,
    req: web::Json<WebPhoneDialRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate()?;
    let accepted = gateway.dial(caller.extension(), &req.destination).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(DialResponse::from(accepted))))
}

/// Browser signaling WebSocket
///
/// GET /webphone?token=
///
/// The token is checked before the upgrade, so a bad or expired token gets a
/// plain 401. A second connection for the same extension evicts the first.
pub async fn signaling_ws(
    req: HttpRequest,
    body: web::Payload,
    query: web::Query<TokenQuery>,
    manager: web::Data<WebPhoneManager>,
) -> Result<HttpResponse, actix_web::Error> {
    let token = query
        .into_inner()
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::InvalidToken("no token provided".into()))?;

    manager.authenticate(&token)?;
    let (response, ws, msg_stream) = actix_ws::handle(&req, body)?;
    let handle = manager.connect(&token)?;

    actix_web::rt::spawn(signaling_session(
        manager.into_inner(),
        handle,
        ws,
        msg_stream,
    ));

    Ok(response)
}

/// Relay loop for one browser connection
///
/// Ends when the browser leaves, the session is torn down from the server side
/// (queued terminal signals are flushed first), or the token expires.
async fn signaling_session(
    manager: Arc<WebPhoneManager>,
    handle: SessionHandle,
    mut ws: WsSession,
    mut msg_stream: MessageStream,
) {
    let SessionHandle {
        session,
        mut signals,
    } = handle;
    let ext = session.extension().to_string();
    let closed = session.closed();

    let expiry = sleep(Duration::from_secs(
        session.claims().remaining_secs().max(0) as u64,
    ));
    tokio::pin!(expiry);
    let mut expired = false;
    let mut ping_interval = interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);

    loop {
        tokio::select! {
            biased;

            queued = signals.recv() => {
                let Some(signal) = queued else { break };
                if ws.text(signal.as_str()).await.is_err() {
                    warn!(ext = %ext, "Signal write failed");
                    break;
                }
            }

            _ = closed.cancelled() => {
                while let Ok(signal) = signals.try_recv() {
                    if ws.text(signal.as_str()).await.is_err() {
                        break;
                    }
                }
                debug!(ext = %ext, "Session closed by server");
                break;
            }

            _ = &mut expiry, if !expired => {
                expired = true;
                manager.expire(&session);
            }

            frame = session.client_audio().pop() => {
                if let Some(frame) = frame {
                    if ws.binary(frame).await.is_err() {
                        warn!(ext = %ext, "Audio write failed");
                        break;
                    }
                }
            }

            incoming = msg_stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => match Signal::parse(&text) {
                        Some(Signal::Answer) => {
                            session.answer();
                        }
                        Some(Signal::Hangup) => {
                            session.hangup();
                        }
                        _ => debug!(ext = %ext, "Ignoring client text: {}", text),
                    },
                    Some(Ok(Message::Binary(frame))) => {
                        session.relay_from_client(frame);
                    }
                    Some(Ok(Message::Ping(msg))) => {
                        if ws.pong(&msg).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(reason))) => {
                        info!(ext = %ext, "Browser closed connection: {:?}", reason);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(ext = %ext, "WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }

            _ = ping_interval.tick() => {
                if ws.ping(b"").await.is_err() {
                    break;
                }
            }
        }
    }

    manager.disconnect(&session);
    let _ = ws.close(None).await;
}

/// PBX leg WebSocket
///
/// GET /webphone/leg/{ext}
///
/// Refused legs receive `HANGUP` (nobody connected) or `BUSY` (a call is already
/// up) and are closed.
#[instrument(skip(_caller, req, body, manager))]
pub async fn leg_ws(
    _caller: ApiCaller,
    req: HttpRequest,
    body: web::Payload,
    path: web::Path<String>,
    manager: web::Data<WebPhoneManager>,
) -> Result<HttpResponse, actix_web::Error> {
    let extension = path.into_inner();
    let (response, mut ws, msg_stream) = actix_ws::handle(&req, body)?;

    match manager.attach_leg(&extension) {
        LegOutcome::Attached(leg) => {
            actix_web::rt::spawn(leg_session(manager.into_inner(), leg, ws, msg_stream));
        }
        LegOutcome::Rejected(signal) => {
            actix_web::rt::spawn(async move {
                let _ = ws.text(signal.as_str()).await;
                let _ = ws.close(None).await;
            });
        }
    }

    Ok(response)
}

/// Relay loop for one PBX leg; the leg ends with its call
async fn leg_session(
    manager: Arc<WebPhoneManager>,
    mut leg: LegHandle,
    mut ws: WsSession,
    mut msg_stream: MessageStream,
) {
    let audio = leg.audio.clone();
    let mut audio_open = true;
    let mut ping_interval = interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);

    loop {
        tokio::select! {
            biased;

            queued = leg.signals.recv() => {
                let Some(signal) = queued else {
                    debug!(leg = %leg.id, "Leg released");
                    break;
                };
                if ws.text(signal.as_str()).await.is_err() {
                    break;
                }
            }

            frame = audio.pop(), if audio_open => {
                match frame {
                    Some(frame) => {
                        if ws.binary(frame).await.is_err() {
                            break;
                        }
                    }
                    None => audio_open = false,
                }
            }

            incoming = msg_stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => match Signal::parse(&text) {
                        Some(signal) => {
                            manager.on_leg_signal(&leg, signal);
                        }
                        None => debug!(leg = %leg.id, "Ignoring leg text: {}", text),
                    },
                    Some(Ok(Message::Binary(frame))) => {
                        leg.relay_to_client(frame);
                    }
                    Some(Ok(Message::Ping(msg))) => {
                        if ws.pong(&msg).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(leg = %leg.id, "WebSocket error: {}", e);
                        break;
                    }
                }
            }

            _ = ping_interval.tick() => {
                if ws.ping(b"").await.is_err() {
                    break;
                }
            }
        }
    }

    manager.detach_leg(&leg);
    let _ = ws.close(None).await;
}
