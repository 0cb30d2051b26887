//! CallBridge server
//!
//! Bridges the PBX to browsers: call-event push, caller-ID lookup, directory
//! administration, click-to-call and the web phone, all on one HTTP listener.

use actix_cors::Cors;
use actix_web::{http::header, middleware, web, App, HttpResponse, HttpServer};
use anyhow::Context;
use callbridge_ami::{AmiClient, EventListener};
use callbridge_api::{configure_routes, AppState};
use callbridge_core::models::CallEvent;
use callbridge_core::traits::{CustomerLookup, PbxCommands};
use callbridge_core::AppConfig;
use callbridge_services::{HttpCustomerLookup, MemoryPbx, NoCustomerLookup, NotifierHub};
use std::env;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Detected calls waiting to be fanned out
const EVENT_BUFFER: usize = 64;

/// Initialize tracing/logging
fn init_tracing() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "callbridge={lvl},callbridge_api={lvl},callbridge_ami={lvl},callbridge_services={lvl},actix_web=info",
            lvl = log_level
        ))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();
}

/// Forward listener detections to the push hub
async fn forward_events(mut events: mpsc::Receiver<CallEvent>, hub: Arc<NotifierHub>) {
    while let Some(event) = events.recv().await {
        match hub.publish(&event) {
            Ok(report) => info!(
                phone = %event.phone,
                delivered = report.delivered,
                "Detected call pushed"
            ),
            Err(e) => warn!(error = %e, "Dropping detected call"),
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting CallBridge v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load().context("failed to load configuration")?;
    let cancel = CancellationToken::new();

    let pbx: Arc<dyn PbxCommands> = if config.ami.enabled {
        let client = Arc::new(AmiClient::new(config.ami.clone()));
        actix_web::rt::spawn(client.clone().run_supervisor(cancel.child_token()));
        info!(server = %config.ami.addr(), "Manager client configured");
        client
    } else {
        warn!("Manager interface disabled, using the in-memory PBX");
        Arc::new(MemoryPbx::new())
    };

    let customers: Arc<dyn CustomerLookup> = match HttpCustomerLookup::from_config(&config.crm)? {
        Some(lookup) => Arc::new(lookup),
        None => {
            info!("No CRM lookup configured, caller-ID names are the number itself");
            Arc::new(NoCustomerLookup)
        }
    };

    let state = AppState::new(&config, pbx, customers)?;

    if config.events.enabled {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let listener = EventListener::new(
            config.ami.clone(),
            config.events.external_trunk_list(),
            tx,
        );
        actix_web::rt::spawn(listener.run(cancel.child_token()));
        actix_web::rt::spawn(forward_events(rx, state.hub.clone()));
        info!("Manager event listener started");
    }

    let bind_addr = config.server_addr();
    let workers = if config.server.workers == 0 {
        num_cpus::get()
    } else {
        config.server.workers
    };
    let cors_origins = config.server.cors_origins.clone();
    info!(
        "Starting HTTP server on {} with {} workers",
        bind_addr, workers
    );

    let app_state = state.clone();
    let server = HttpServer::new(move || {
        let cors_origins_inner = cors_origins.clone();
        let cors = Cors::default()
            .allowed_origin_fn(move |origin, _req_head| {
                let origins: Vec<&str> = cors_origins_inner.split(',').collect();
                if let Ok(origin_str) = origin.to_str() {
                    origins.iter().any(|o| o.trim() == origin_str)
                } else {
                    false
                }
            })
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                header::AUTHORIZATION,
                header::ACCEPT,
                header::CONTENT_TYPE,
            ])
            .supports_credentials()
            .max_age(3600);

        let state = app_state.clone();
        App::new()
            .configure(move |cfg: &mut web::ServiceConfig| state.register(cfg))
            .app_data(web::PayloadConfig::new(1024 * 1024))
            .app_data(web::QueryConfig::default().error_handler(|err, _req| {
                let error_message = err.to_string();
                actix_web::error::InternalError::from_response(
                    err,
                    HttpResponse::BadRequest().json(serde_json::json!({
                        "error": "invalid_query",
                        "message": error_message
                    })),
                )
                .into()
            }))
            .wrap(cors)
            .wrap(middleware::Logger::new("%a \"%r\" %s %b %Dms"))
            .wrap(TracingLogger::default())
            .wrap(middleware::Compress::default())
            .wrap(middleware::NormalizePath::trim())
            .configure(configure_routes)
            .route(
                "/",
                web::get().to(|| async {
                    HttpResponse::Found()
                        .append_header(("Location", "/api/v1/health"))
                        .finish()
                }),
            )
    })
    .workers(workers)
    .bind(&bind_addr)
    .with_context(|| format!("cannot bind {}", bind_addr))?
    .run();

    let result = server.await;

    info!("Shutting down");
    cancel.cancel();
    state.webphone.shutdown();
    state.hub.close_all();

    result.context("HTTP server failed")
}
