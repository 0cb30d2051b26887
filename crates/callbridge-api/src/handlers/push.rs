//! Call-event push channel
//!
//! Browsers hold a WebSocket on `/crmws` and receive one JSON envelope per
//! incoming call. Calls are announced through `POST /api/trigger` by the PBX
//! dialplan, or by the AMI event listener running inside the server.

use crate::dto::{non_blank, PushQuery, TriggerQuery};
use crate::state::PushSettings;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_ws::{Message, MessageStream, Session};
use callbridge_core::models::CallEvent;
use callbridge_core::AppError;
use callbridge_services::{NotifierHub, SubscriberHandle};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, timeout, Instant};
use tracing::{debug, error, info, instrument, warn};

/// HTTP call trigger
///
/// POST /api/trigger?token=&phone=&exten=
///
/// The peer must be on the trigger allow list and present the shared secret.
/// Answers `OK` as plain text even when nobody is listening for the target.
#[instrument(skip(req, query, hub, push), fields(phone, exten))]
pub async fn trigger(
    req: HttpRequest,
    query: web::Query<TriggerQuery>,
    hub: web::Data<NotifierHub>,
    push: web::Data<PushSettings>,
) -> Result<HttpResponse, AppError> {
    if !push.trigger_acl.allows_peer(&req) {
        return Err(AppError::Forbidden("source address not allowed".into()));
    }

    let query = query.into_inner();
    if !push.token_matches(query.token.as_deref().unwrap_or_default()) {
        warn!("Trigger rejected: invalid token");
        return Err(AppError::Unauthorized("invalid trigger token".into()));
    }

    let phone = non_blank(query.phone).ok_or_else(|| AppError::MissingField("phone".into()))?;
    let exten = non_blank(query.exten);
    tracing::Span::current()
        .record("phone", phone.as_str())
        .record("exten", exten.as_deref().unwrap_or("all"));

    let report = hub.publish(&CallEvent::incoming(phone, exten))?;
    info!(
        matched = report.matched,
        delivered = report.delivered,
        dropped = report.dropped,
        "Trigger received"
    );

    Ok(HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body("OK"))
}

/// Push WebSocket
///
/// GET /crmws?exten=
///
/// A subscriber with an extension receives events targeted at it plus
/// broadcasts; one without receives broadcasts only.
pub async fn push_ws(
    req: HttpRequest,
    body: web::Payload,
    query: web::Query<PushQuery>,
    hub: web::Data<NotifierHub>,
    push: web::Data<PushSettings>,
) -> Result<HttpResponse, actix_web::Error> {
    if !push.subscriber_acl.allows_peer(&req) {
        return Err(AppError::Forbidden("source address not allowed".into()).into());
    }

    let (response, session, msg_stream) = actix_ws::handle(&req, body)?;

    let client_ip = req
        .connection_info()
        .realip_remote_addr()
        .unwrap_or("unknown")
        .to_string();

    let handle = hub.register(query.into_inner().exten);
    info!(
        client = %client_ip,
        subscriber = %handle.id,
        exten = handle.extension.as_deref().unwrap_or("-"),
        "Push connection established"
    );

    actix_web::rt::spawn(push_session(
        session,
        msg_stream,
        handle,
        hub.into_inner(),
        push.write_timeout,
        push.ping_interval,
        client_ip,
    ));

    Ok(response)
}

/// Writer loop for one subscriber
///
/// Messages leave in queue order. A write that fails or exceeds `write_timeout`
/// closes the connection; the hub entry is always released on exit.
async fn push_session(
    mut session: Session,
    mut msg_stream: MessageStream,
    mut handle: SubscriberHandle,
    hub: Arc<NotifierHub>,
    write_timeout: Duration,
    ping_every: Duration,
    client_ip: String,
) {
    let mut ping_interval = interval_at(Instant::now() + ping_every, ping_every);

    loop {
        tokio::select! {
            queued = handle.receiver.recv() => {
                let Some(text) = queued else {
                    debug!(client = %client_ip, "Subscriber removed by hub");
                    break;
                };
                match timeout(write_timeout, session.text(text.to_string())).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => {
                        warn!(client = %client_ip, "Push write failed, closing connection");
                        break;
                    }
                    Err(_) => {
                        warn!(client = %client_ip, "Push write timed out, closing connection");
                        break;
                    }
                }
            }

            incoming = msg_stream.next() => {
                match incoming {
                    Some(Ok(Message::Ping(msg))) => {
                        if session.pong(&msg).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(reason))) => {
                        info!(client = %client_ip, "Client closed connection: {:?}", reason);
                        break;
                    }
                    Some(Ok(Message::Text(text))) => {
                        debug!(client = %client_ip, "Ignoring client text: {}", text);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(client = %client_ip, "WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }

            _ = ping_interval.tick() => {
                if session.ping(b"").await.is_err() {
                    warn!(client = %client_ip, "Failed to send ping, closing connection");
                    break;
                }
            }
        }
    }

    hub.unregister(handle.id);
    info!(client = %client_ip, subscriber = %handle.id, "Push connection closed");
    let _ = session.close(None).await;
}
