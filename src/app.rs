use std::sync::Arc;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::{DecisionCache, PermissionService, SqliteRuleStore};
use crate::errors::AppError;
use crate::events::{init_event_bus, start_security_listener, EventBus};
use crate::jwt::JwtConfig;
use crate::routes::{auth, health, impersonation, permissions, security_events};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub authz: Arc<PermissionService>,
    pub event_bus: EventBus,
}

impl AppState {
    pub fn new(pool: SqlitePool, jwt: JwtConfig) -> Self {
        let (event_bus, rx) = init_event_bus();
        tokio::spawn(start_security_listener(rx, pool.clone()));

        let store = Arc::new(SqliteRuleStore::new(pool.clone()));
        let authz = Arc::new(PermissionService::new(
            store,
            DecisionCache::from_env(),
            event_bus.clone(),
        ));

        Self {
            pool,
            jwt: Arc::new(jwt),
            authz,
            event_bus,
        }
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;
    let state = AppState::new(pool, jwt_config);

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/me", get(auth::me))
        .route("/logout", post(auth::logout));

    let impersonation_routes = Router::new()
        .route("/start", post(impersonation::start_impersonation))
        .route("/end", post(impersonation::end_impersonation));

    let router = Router::new()
        .route("/api/health", get(health::health))
        .nest("/auth", auth_routes)
        .nest("/permissions", permissions::routes())
        .nest("/impersonation", impersonation_routes)
        .route("/security-events", get(security_events::list_security_events))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
