//! WebSocket round trips against a live server
//!
//! The server listens on an ephemeral port; clients use tokio-tungstenite.

use actix_web::{web, App, HttpServer};
use callbridge_api::{configure_routes, AppState};
use callbridge_core::config::{
    AmiConfig, AuthConfig, CrmConfig, DirectoryConfig, EventsConfig, NotifierConfig,
    OriginateConfig, ServerConfig, SubscriberConfig, WebPhoneConfig,
};
use callbridge_core::models::{CallEvent, CallEventEnvelope};
use callbridge_core::AppConfig;
use callbridge_services::{MemoryPbx, NoCustomerLookup};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const API_SECRET: &str = "operator-secret";

fn test_config() -> AppConfig {
    AppConfig {
        server: ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            workers: 1,
            cors_origins: String::new(),
        },
        ami: AmiConfig::new("127.0.0.1", 5038, "admin", "secret"),
        auth: AuthConfig {
            jwt_secret: "test-jwt-secret".into(),
            token_ttl_secs: 3600,
            api_token: API_SECRET.into(),
        },
        notifier: NotifierConfig::with_token("trigger-secret"),
        webphone: WebPhoneConfig::default(),
        originate: OriginateConfig::default(),
        directory: DirectoryConfig::default(),
        events: EventsConfig::default(),
        crm: CrmConfig::default(),
        subscriber: SubscriberConfig::default(),
    }
}

async fn start_server() -> (AppState, SocketAddr) {
    let state = AppState::new(
        &test_config(),
        Arc::new(MemoryPbx::new()),
        Arc::new(NoCustomerLookup),
    )
    .unwrap();

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let app_state = state.clone();
    let server = HttpServer::new(move || {
        let state = app_state.clone();
        App::new()
            .configure(move |cfg: &mut web::ServiceConfig| state.register(cfg))
            .configure(configure_routes)
    })
    .workers(1)
    .listen(listener)
    .unwrap()
    .run();
    actix_web::rt::spawn(server);

    (state, addr)
}

async fn connect(url: &str) -> Client {
    connect_async(url).await.unwrap().0
}

async fn connect_leg(addr: SocketAddr, ext: &str) -> Client {
    let mut request = format!("ws://{}/webphone/leg/{}", addr, ext)
        .into_client_request()
        .unwrap();
    request.headers_mut().insert(
        "Authorization",
        format!("Bearer {}", API_SECRET).parse().unwrap(),
    );
    connect_async(request).await.unwrap().0
}

/// Next text or binary frame, skipping keepalives
async fn next_frame(ws: &mut Client) -> Option<Message> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(3), ws.next())
            .await
            .expect("timed out waiting for a frame")?;
        match msg {
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(other) => return Some(other),
        }
    }
}

async fn next_text(ws: &mut Client) -> String {
    match next_frame(ws).await {
        Some(Message::Text(text)) => text.as_str().to_string(),
        other => panic!("expected a text frame, got {:?}", other),
    }
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached");
}

#[actix_web::test]
async fn test_push_delivery_by_extension() {
    let (state, addr) = start_server().await;
    let mut mine = connect(&format!("ws://{}/crmws?exten=2001", addr)).await;
    let mut everyone = connect(&format!("ws://{}/crmws", addr)).await;
    wait_until(|| state.hub.subscriber_count() == 2).await;

    let report = state
        .hub
        .publish(&CallEvent::incoming("0312345678", Some("2001".into())))
        .unwrap();
    assert_eq!(report.delivered, 1);

    let envelope: CallEventEnvelope = serde_json::from_str(&next_text(&mut mine).await).unwrap();
    assert_eq!(envelope.data.phone, "0312345678");

    state
        .hub
        .publish(&CallEvent::incoming("0311112222", None))
        .unwrap();
    let envelope: CallEventEnvelope =
        serde_json::from_str(&next_text(&mut everyone).await).unwrap();
    assert_eq!(envelope.data.phone, "0311112222");
    let envelope: CallEventEnvelope = serde_json::from_str(&next_text(&mut mine).await).unwrap();
    assert_eq!(envelope.data.phone, "0311112222");

    mine.close(None).await.unwrap();
    wait_until(|| state.hub.subscriber_count() == 1).await;
}

#[actix_web::test]
async fn test_call_through_leg() {
    let (state, addr) = start_server().await;
    let token = state.tokens.issue_for_extension("2001").unwrap();
    let mut browser = connect(&format!("ws://{}/webphone?token={}", addr, token)).await;
    wait_until(|| state.webphone.session_count() == 1).await;

    let mut leg = connect_leg(addr, "2001").await;
    wait_until(|| state.webphone.session("2001").map(|s| s.has_leg()).unwrap_or(false)).await;

    leg.send(Message::Text("RINGING".into())).await.unwrap();
    assert_eq!(next_text(&mut browser).await, "RINGING");

    browser.send(Message::Text("ANSWER".into())).await.unwrap();
    assert_eq!(next_text(&mut leg).await, "ANSWER");

    let frame = vec![7u8; 640];
    leg.send(Message::Binary(frame.clone().into())).await.unwrap();
    match next_frame(&mut browser).await {
        Some(Message::Binary(data)) => assert_eq!(data.to_vec(), frame),
        other => panic!("expected audio, got {:?}", other),
    }

    browser.send(Message::Binary(vec![1u8; 640].into())).await.unwrap();
    match next_frame(&mut leg).await {
        Some(Message::Binary(data)) => assert_eq!(data.len(), 640),
        other => panic!("expected audio, got {:?}", other),
    }

    browser.send(Message::Text("HANGUP".into())).await.unwrap();
    assert_eq!(next_text(&mut browser).await, "HANGUP");
    assert_eq!(next_text(&mut leg).await, "HANGUP");
    // the leg is done with its call
    assert!(next_frame(&mut leg).await.is_none());
}

#[actix_web::test]
async fn test_leg_refused() {
    let (state, addr) = start_server().await;

    // nobody connected
    let mut leg = connect_leg(addr, "2001").await;
    assert_eq!(next_text(&mut leg).await, "HANGUP");
    assert!(next_frame(&mut leg).await.is_none());

    // a second leg while the first is attached
    let token = state.tokens.issue_for_extension("2001").unwrap();
    let _browser = connect(&format!("ws://{}/webphone?token={}", addr, token)).await;
    wait_until(|| state.webphone.session_count() == 1).await;
    let _first = connect_leg(addr, "2001").await;
    wait_until(|| state.webphone.session("2001").map(|s| s.has_leg()).unwrap_or(false)).await;

    let mut second = connect_leg(addr, "2001").await;
    assert_eq!(next_text(&mut second).await, "BUSY");
}

#[actix_web::test]
async fn test_second_browser_kicks_first() {
    let (state, addr) = start_server().await;
    let token = state.tokens.issue_for_extension("2001").unwrap();

    let mut first = connect(&format!("ws://{}/webphone?token={}", addr, token)).await;
    wait_until(|| state.webphone.session_count() == 1).await;
    let first_id = state.webphone.session("2001").unwrap().id();

    let _second = connect(&format!("ws://{}/webphone?token={}", addr, token)).await;
    assert_eq!(next_text(&mut first).await, "KICKED");
    assert!(next_frame(&mut first).await.is_none());

    wait_until(|| {
        state
            .webphone
            .session("2001")
            .map(|s| s.id() != first_id)
            .unwrap_or(false)
    })
    .await;
    assert_eq!(state.webphone.session_count(), 1);
}

#[actix_web::test]
async fn test_expired_token_is_refused() {
    let (state, addr) = start_server().await;
    let expired = state
        .tokens
        .create_token(&callbridge_auth::Claims::with_expiration("2001", -5))
        .unwrap();

    let result = connect_async(format!("ws://{}/webphone?token={}", addr, expired)).await;
    assert!(result.is_err());
    assert_eq!(state.webphone.session_count(), 0);
}
