//! Authentication broker for federated (Shibboleth-style) and local logins.
//!
//! The broker fronts an account repository: it accepts identity attributes
//! from an external IdP (or the embedded emulator), provisions and reconciles
//! accounts, and writes the browser session the rest of the application reads.

pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod models;
pub mod observability;
pub mod routes;

#[cfg(test)]
mod tests;

use std::{sync::Arc, time::Duration};

use axum::{Router, routing::get};
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::{
    auth::{
        AttributeSource, AuthenticationBroker, EmulatedSource, Emulator, RealTransportSource,
        StateManager, create_session_store, create_state_store,
    },
    cache::{Cache, CacheError},
    config::BrokerConfig,
    db::{DbError, DbPool},
    routes::ViewResolver,
};

/// Errors raised while assembling the application.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("Failed to open database: {0}")]
    Db(#[from] DbError),

    #[error("Failed to connect to cache: {0}")]
    Cache(#[from] CacheError),

    #[error("Failed to load views: {0}")]
    Views(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<BrokerConfig>,
    pub db: Arc<DbPool>,
    pub cache: Option<Arc<dyn Cache>>,
    pub broker: Arc<AuthenticationBroker>,
    /// Present only when `federation.emulate_idp` is set.
    pub emulator: Option<Emulator>,
    pub views: Arc<dyn ViewResolver>,
}

impl AppState {
    pub async fn new(config: BrokerConfig) -> Result<Self, InitError> {
        let db = Arc::new(DbPool::from_config(&config.database).await?);
        let cache = cache::create_cache(&config.cache).await?;
        let views = routes::create_view_resolver(&config.views)?;

        let sessions = create_session_store(
            cache.clone(),
            Duration::from_secs(config.session.duration_secs),
        );

        let (source, emulator) = if config.federation.emulate_idp {
            let state = StateManager::new(
                create_state_store(cache.clone()),
                Duration::from_secs(config.federation.pending_state_ttl_secs),
            );
            let emulator = Emulator::new(state, &config);
            (
                Arc::new(EmulatedSource::new(emulator.sp.clone())) as Arc<dyn AttributeSource>,
                Some(emulator),
            )
        } else {
            (
                Arc::new(RealTransportSource::new(
                    &config.federation,
                    &config.server.trusted_proxies,
                )) as Arc<dyn AttributeSource>,
                None,
            )
        };

        let broker = AuthenticationBroker::new(
            &config,
            db.accounts(),
            db.groups(),
            sessions,
            source,
        );

        Ok(Self {
            config: Arc::new(config),
            db,
            cache,
            broker: Arc::new(broker),
            emulator,
            views,
        })
    }
}

pub fn build_app(config: &BrokerConfig, state: AppState) -> Router {
    let mut app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/health/live", get(routes::health::liveness))
        .merge(routes::auth::routes());

    if config.observability.metrics.enabled {
        app = app.route("/metrics", get(routes::health::metrics));
    }

    if state.emulator.is_some() {
        app = app.merge(routes::emulator::routes());
    }

    app.layer(PropagateRequestIdLayer::x_request_id())
        .layer(tower_cookies::CookieManagerLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(RequestBodyLimitLayer::new(config.server.body_limit_bytes))
        .with_state(state)
}
