use std::sync::Arc;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::lifecycle::LifecycleEngine;
use crate::services::identity::IdentityVerifier;
use crate::services::storage::ObjectStore;

pub mod auth;
pub mod payments;
pub mod properties;
pub mod rate_limit;
pub mod utils;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<LifecycleEngine>,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub storage: Arc<dyn ObjectStore>,
    pub webhook_key: Arc<str>,
    pub limiter: rate_limit::RateLimiter,
}

/// CORS policy for browser clients; `*` in `origins` allows any origin.
pub fn cors_layer(origins: &[String]) -> Result<CorsLayer, String> {
    let allow_origin = if origins.iter().any(|origin| origin == "*") {
        AllowOrigin::any()
    } else {
        let list = origins
            .iter()
            .map(|origin| HeaderValue::from_str(origin).map_err(|_| format!("Invalid CORS origin: {origin}")))
            .collect::<Result<Vec<_>, _>>()?;
        AllowOrigin::list(list)
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::AUTHORIZATION,
            HeaderName::from_static("x-api-key"),
        ]))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub fn app_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(properties::property_routes(state.clone()))
        .merge(payments::payment_routes(state))
}
