//! Shared application state
//!
//! Every service is built once and handed to each worker as `web::Data`.

use crate::acl::IpAllowList;
use actix_web::web;
use callbridge_auth::{timing_safe_eq, ApiSecret, TokenService};
use callbridge_core::config::NotifierConfig;
use callbridge_core::traits::{CustomerLookup, PbxCommands};
use callbridge_core::{AppConfig, AppResult};
use callbridge_services::{DirectoryService, NotifierHub, OriginateGateway, WebPhoneManager};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Push-channel access rules and timing
#[derive(Debug, Clone)]
pub struct PushSettings {
    pub trigger_acl: IpAllowList,
    pub subscriber_acl: IpAllowList,
    trigger_token: String,
    pub write_timeout: Duration,
    pub ping_interval: Duration,
}

impl PushSettings {
    /// # Errors
    ///
    /// Returns `AppError::Config` when an allow list does not parse.
    pub fn from_config(config: &NotifierConfig) -> AppResult<Self> {
        Ok(Self {
            trigger_acl: IpAllowList::parse(&config.trigger_allow)?,
            subscriber_acl: IpAllowList::parse(&config.subscriber_allow)?,
            trigger_token: config.trigger_token.clone(),
            write_timeout: config.write_timeout(),
            ping_interval: Duration::from_secs(config.ping_interval_secs.max(1)),
        })
    }

    /// Constant-time check of the trigger secret; an unset secret never matches
    pub fn token_matches(&self, provided: &str) -> bool {
        !self.trigger_token.is_empty() && timing_safe_eq(&self.trigger_token, provided)
    }
}

/// Services shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<NotifierHub>,
    pub webphone: Arc<WebPhoneManager>,
    pub directory: Arc<DirectoryService>,
    pub originate: Arc<OriginateGateway>,
    pub customers: Arc<dyn CustomerLookup>,
    pub tokens: TokenService,
    pub api_secret: ApiSecret,
    pub push: Arc<PushSettings>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Wire the services over one PBX command channel
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for malformed allow lists.
    pub fn new(
        config: &AppConfig,
        pbx: Arc<dyn PbxCommands>,
        customers: Arc<dyn CustomerLookup>,
    ) -> AppResult<Self> {
        let tokens = TokenService::new(&config.auth.jwt_secret, config.auth.token_ttl_secs);
        let push = PushSettings::from_config(&config.notifier)?;

        info!(
            trigger_acl = push.trigger_acl.len(),
            subscriber_acl = push.subscriber_acl.len(),
            originate_simulated = !config.originate.enabled,
            "Application state ready"
        );

        Ok(Self {
            hub: Arc::new(NotifierHub::new(config.notifier.queue_capacity)),
            webphone: Arc::new(WebPhoneManager::new(
                tokens.clone(),
                config.webphone.clone(),
            )),
            directory: Arc::new(DirectoryService::new(
                pbx.clone(),
                config.directory.clone(),
            )),
            originate: Arc::new(OriginateGateway::new(pbx, config.originate.clone())),
            customers,
            tokens,
            api_secret: ApiSecret::new(&config.auth.api_token),
            push: Arc::new(push),
            started_at: Utc::now(),
        })
    }

    /// Register every service as app data
    pub fn register(&self, cfg: &mut web::ServiceConfig) {
        cfg.app_data(web::Data::from(self.hub.clone()))
            .app_data(web::Data::from(self.webphone.clone()))
            .app_data(web::Data::from(self.directory.clone()))
            .app_data(web::Data::from(self.originate.clone()))
            .app_data(web::Data::from(self.customers.clone()))
            .app_data(web::Data::from(self.push.clone()))
            .app_data(web::Data::new(self.tokens.clone()))
            .app_data(web::Data::new(self.api_secret.clone()))
            .app_data(web::Data::new(self.started_at));
    }
}
