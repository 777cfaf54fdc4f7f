use axum::{
    Json, Router, middleware,
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::middleware::require_auth;
use crate::state::AppState;
use crate::{payments, weixin};

/// Build the full HTTP surface.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/api/weixin/msg", get(weixin::verify).post(weixin::receive))
        .route("/api/payment/callback/{method}", post(payments::callback))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/api/weixin/sendmsg", get(weixin::send_test))
        .route("/api/payment/create", post(payments::create_order))
        .route("/api/payment/status/{order_id}", get(payments::order_status))
        .route("/api/payment/subscription", get(payments::subscription))
        .route("/api/payment/history", get(payments::history))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<Value> {
    Json(json!({
        "success": true,
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    }))
}
