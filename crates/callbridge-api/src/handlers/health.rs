//! Liveness endpoint

use crate::dto::HealthResponse;
use actix_web::{web, HttpResponse};
use callbridge_services::{NotifierHub, WebPhoneManager};
use chrono::{DateTime, Utc};

/// Health check
///
/// GET /api/v1/health
pub async fn health_check(
    hub: web::Data<NotifierHub>,
    webphone: web::Data<WebPhoneManager>,
    started_at: web::Data<DateTime<Utc>>,
) -> HttpResponse {
    let now = Utc::now();
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        service: "callbridge".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        subscribers: hub.subscriber_count(),
        sessions: webphone.session_count(),
        uptime_secs: (now - *started_at.get_ref()).num_seconds(),
        timestamp: now,
    })
}
