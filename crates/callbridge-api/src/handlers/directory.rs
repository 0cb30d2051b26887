//! PBX directory endpoints
//!
//! Read and rewrite endpoint bindings, ring groups, speed-dial keys and paging
//! groups, and list routing targets and trunks. All routes require the operator
//! API secret.

use crate::dto::{
    ApiResponse, BindResponse, PagingGroupRequest, RingGroupRequest, SpeedDialKeyRequest,
};
use actix_web::{web, HttpResponse};
use callbridge_auth::ApiCaller;
use callbridge_core::models::{BindOutcome, Endpoint, EndpointBinding};
use callbridge_core::AppError;
use callbridge_services::DirectoryService;
use futures::future::join_all;
use tracing::{info, instrument};
use validator::Validate;

fn bind_response(target: String, outcome: BindOutcome) -> HttpResponse {
    let body = ApiResponse::success(BindResponse { target, outcome });
    match outcome {
        BindOutcome::Created => HttpResponse::Created().json(body),
        BindOutcome::Conflict => HttpResponse::Conflict().json(body),
        BindOutcome::Updated | BindOutcome::Removed => HttpResponse::Ok().json(body),
    }
}

fn positive(value: u32, what: &str) -> Result<u32, AppError> {
    if value == 0 {
        return Err(AppError::Validation(format!("{} must be positive", what)));
    }
    Ok(value)
}

/// Every endpoint slot with its binding
///
/// GET /api/v1/directory/endpoints
pub async fn list_endpoints(
    _caller: ApiCaller,
    directory: web::Data<DirectoryService>,
) -> HttpResponse {
    let names: Vec<String> = (1..=directory.config().endpoint_slots)
        .map(|slot| directory.endpoint_name(slot))
        .collect();
    let endpoints: Vec<Endpoint> =
        join_all(names.iter().map(|name| directory.resolve_endpoint(name))).await;
    HttpResponse::Ok().json(ApiResponse::success(endpoints))
}

/// One endpoint slot
///
/// GET /api/v1/directory/endpoints/{slot}
pub async fn get_endpoint(
    _caller: ApiCaller,
    directory: web::Data<DirectoryService>,
    path: web::Path<u32>,
) -> Result<HttpResponse, AppError> {
    let slot = path.into_inner();
    if slot == 0 || slot > directory.config().endpoint_slots {
        return Err(AppError::NotFound(format!("endpoint slot {}", slot)));
    }
    let endpoint = directory
        .resolve_endpoint(&directory.endpoint_name(slot))
        .await;
    Ok(HttpResponse::Ok().json(ApiResponse::success(endpoint)))
}

/// Bind, update or remove an endpoint's extension
///
/// PUT /api/v1/directory/endpoints
#[instrument(skip(_caller, directory, req), fields(endpoint = %req.endpoint))]
pub async fn bind_endpoint(
    _caller: ApiCaller,
    directory: web::Data<DirectoryService>,
    req: web::Json<EndpointBinding>,
) -> Result<HttpResponse, AppError> {
    let binding = req.into_inner();
    let outcome = directory.bind_endpoint(&binding).await?;
    info!(outcome = %outcome, "Endpoint binding written");
    Ok(bind_response(binding.endpoint, outcome))
}

/// GET /api/v1/directory/groups/{id}
pub async fn get_group(
    _caller: ApiCaller,
    directory: web::Data<DirectoryService>,
    path: web::Path<u32>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    if id == 0 || id > directory.config().group_slots {
        return Err(AppError::NotFound(format!("ring group {}", id)));
    }
    Ok(HttpResponse::Ok().json(ApiResponse::success(directory.resolve_group(id).await)))
}

/// Rewrite a ring group; an empty member list removes it
///
/// PUT /api/v1/directory/groups/{id}
#[instrument(skip(_caller, directory, req))]
pub async fn bind_group(
    _caller: ApiCaller,
    directory: web::Data<DirectoryService>,
    path: web::Path<u32>,
    req: web::Json<RingGroupRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate()?;
    let id = path.into_inner();
    let outcome = directory.bind_group(&req.into_inner().into_group(id)).await?;
    info!(group = id, outcome = %outcome, "Ring group written");
    Ok(bind_response(format!("group {}", id), outcome))
}

/// GET /api/v1/directory/keys/{n}
pub async fn get_key(
    _caller: ApiCaller,
    directory: web::Data<DirectoryService>,
    path: web::Path<u32>,
) -> Result<HttpResponse, AppError> {
    let key = positive(path.into_inner(), "key")?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(directory.resolve_key(key).await)))
}

/// PUT /api/v1/directory/keys/{n}
#[instrument(skip(_caller, directory, req))]
pub async fn bind_key(
    _caller: ApiCaller,
    directory: web::Data<DirectoryService>,
    path: web::Path<u32>,
    req: web::Json<SpeedDialKeyRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate()?;
    let key = positive(path.into_inner(), "key")?;
    let outcome = directory.bind_key(&req.into_inner().into_key(key)).await?;
    Ok(bind_response(format!("key {}", key), outcome))
}

/// GET /api/v1/directory/paging/{id}
pub async fn get_paging_group(
    _caller: ApiCaller,
    directory: web::Data<DirectoryService>,
    path: web::Path<u32>,
) -> Result<HttpResponse, AppError> {
    let id = positive(path.into_inner(), "paging group")?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(directory.paging_group(id).await)))
}

/// PUT /api/v1/directory/paging/{id}
pub async fn set_paging_group(
    _caller: ApiCaller,
    directory: web::Data<DirectoryService>,
    path: web::Path<u32>,
    req: web::Json<PagingGroupRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate()?;
    let id = path.into_inner();
    let outcome = directory.set_paging_group(id, &req.members).await?;
    Ok(bind_response(format!("paging group {}", id), outcome))
}

/// Routing targets for incoming calls
///
/// GET /api/v1/directory/targets
pub async fn list_targets(
    _caller: ApiCaller,
    directory: web::Data<DirectoryService>,
) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::success(directory.list_targets().await))
}

/// Merged, naturally sorted dial targets
///
/// GET /api/v1/directory/dial-targets
pub async fn list_dial_targets(
    _caller: ApiCaller,
    directory: web::Data<DirectoryService>,
) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::success(directory.list_dial_targets().await))
}

/// Trunk registrations
///
/// GET /api/v1/directory/trunks
pub async fn list_trunks(
    _caller: ApiCaller,
    directory: web::Data<DirectoryService>,
) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::success(directory.list_trunks().await))
}

/// GET /api/v1/directory/trunk-switchers
pub async fn list_trunk_switchers(
    _caller: ApiCaller,
    directory: web::Data<DirectoryService>,
) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::success(
        directory.list_trunk_switchers().await,
    ))
}

/// Configure directory routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/directory")
            .route("/endpoints", web::get().to(list_endpoints))
            .route("/endpoints", web::put().to(bind_endpoint))
            .route("/endpoints/{slot}", web::get().to(get_endpoint))
            .route("/groups/{id}", web::get().to(get_group))
            .route("/groups/{id}", web::put().to(bind_group))
            .route("/keys/{n}", web::get().to(get_key))
            .route("/keys/{n}", web::put().to(bind_key))
            .route("/paging/{id}", web::get().to(get_paging_group))
            .route("/paging/{id}", web::put().to(set_paging_group))
            .route("/targets", web::get().to(list_targets))
            .route("/dial-targets", web::get().to(list_dial_targets))
            .route("/trunks", web::get().to(list_trunks))
            .route("/trunk-switchers", web::get().to(list_trunk_switchers)),
    );
}
