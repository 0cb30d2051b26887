//! Caller-ID name lookup
//!
//! The PBX dialplan asks for the display name of an incoming number and shows
//! whatever text comes back.

use crate::dto::CidNameQuery;
use actix_web::{web, HttpResponse};
use callbridge_core::traits::CustomerLookup;
use callbridge_services::cid_name;
use tracing::{debug, instrument};

/// Caller-ID name as plain text
///
/// GET /api/cidname?phone=
#[instrument(skip(customers, query), fields(phone = %query.phone))]
pub async fn lookup_cid_name(
    customers: web::Data<dyn CustomerLookup>,
    query: web::Query<CidNameQuery>,
) -> HttpResponse {
    let name = cid_name(customers.get_ref(), &query.phone).await;
    debug!(name = %name, "Caller-ID name resolved");
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body(format!("{}\n", name))
}
