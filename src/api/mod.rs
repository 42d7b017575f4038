// HTTP endpoints for the demo resource server

use axum::{
    Router,
    extract::State,
    middleware,
    response::Json,
    routing::{get, post},
};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{AuthState, AuthorizationContext, VerifiedIdentity, require_authorization};
use crate::service::AuthService;

pub type AppState = Arc<AuthService>;

/// `/health` is open; `/whoami` requires a valid bearer token.
pub fn create_public_router(state: AppState) -> Router {
    let auth_state = AuthState::new(state.authenticator());

    let protected = Router::new()
        .route("/whoami", get(whoami))
        .route_layer(middleware::from_fn_with_state(auth_state, require_authorization));

    Router::new()
        .route("/health", get(health_check))
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Operator endpoints. Bind to an internal address only.
pub fn create_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/admin/refresh", post(refresh_keys))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let ready = state.is_ready().await;
    let providers = state.provider_statuses().await;
    let cached_issuers = state.cache().map(|c| c.cached_issuers().len());

    Json(serde_json::json!({
        "status": if ready { "healthy" } else { "degraded" },
        "mode": state.mode(),
        "providers": providers,
        "cachedIssuers": cached_issuers,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn whoami(context: AuthorizationContext, identity: VerifiedIdentity) -> Json<Value> {
    Json(serde_json::json!({
        "provider": identity.provider(),
        "issuer": identity.issuer(),
        "context": context,
    }))
}

async fn refresh_keys(State(state): State<AppState>) -> Json<Value> {
    let outcomes = state.refresh_all().await;
    let ok = outcomes.iter().all(|o| o.ok);

    Json(serde_json::json!({
        "status": if ok { "ok" } else { "partial" },
        "providers": outcomes,
    }))
}
