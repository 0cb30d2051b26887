//! Push hub inspection

use crate::dto::ApiResponse;
use actix_web::{web, HttpResponse};
use callbridge_auth::ApiCaller;
use callbridge_services::NotifierHub;

/// Connected push subscribers
///
/// GET /api/v1/notifier/subscribers
pub async fn list_subscribers(_caller: ApiCaller, hub: web::Data<NotifierHub>) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::success(hub.subscribers()))
}
