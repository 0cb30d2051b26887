//! Click-to-call endpoint

use crate::dto::{ApiResponse, DialRequest, DialResponse};
use actix_web::{web, HttpResponse};
use callbridge_auth::ApiCaller;
use callbridge_core::AppError;
use callbridge_services::OriginateGateway;
use tracing::{instrument, warn};
use validator::Validate;

/// Originate a call: ring the caller, then the destination
///
/// POST /api/v1/dial
///
/// Returns as soon as the PBX accepts the command; call progress is not tracked
/// here.
#[instrument(skip(_caller, gateway, req))]
pub async fn dial(
    _caller: ApiCaller,
    gateway: web::Data<OriginateGateway>,
    req: web::Json<DialRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Dial validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let accepted = gateway
        .dial(&req.caller_extension, &req.destination)
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(DialResponse::from(accepted))))
}
