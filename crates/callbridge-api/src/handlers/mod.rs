//! HTTP request handlers

pub mod cidname;
pub mod dial;
pub mod directory;
pub mod health;
pub mod notifier;
pub mod push;
pub mod webphone;

use actix_web::web;

pub use directory::configure as configure_directory;
pub use health::health_check;
pub use push::{push_ws, trigger};
pub use webphone::{leg_ws, signaling_ws};

/// Versioned operator API, mounted under `/api/v1`
pub fn configure_api(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/dial", web::post().to(dial::dial))
        .service(
            web::scope("/webphone")
                .route("/token", web::post().to(webphone::issue_token))
                .route("/sessions", web::get().to(webphone::list_sessions))
                .route("/dial", web::post().to(webphone::dial_from_webphone)),
        )
        .route(
            "/notifier/subscribers",
            web::get().to(notifier::list_subscribers),
        )
        .configure(configure_directory);
}

/// Unversioned routes used by the PBX and the browsers
pub fn configure_bridge(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/trigger", web::post().to(trigger))
        .route("/api/cidname", web::get().to(cidname::lookup_cid_name))
        .route("/crmws", web::get().to(push_ws))
        .route("/webphone", web::get().to(signaling_ws))
        .route("/webphone/leg/{ext}", web::get().to(leg_ws));
}

/// Every route: `/api/v1` scope plus the bridge routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/api/v1").configure(configure_api))
        .configure(configure_bridge);
}
