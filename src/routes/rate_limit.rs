//! Fixed-window request limit per client address for the property routes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;

use super::AppState;
use crate::config::RateLimitConfig;
use crate::error::AppError;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    started: Instant,
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    clients: Arc<DashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            max_requests: config.max_requests,
            window: config.window,
            clients: Arc::new(DashMap::new()),
        }
    }

    /// Count one request for `client`; false once the window is used up.
    pub fn check(&self, client: &str) -> bool {
        let now = Instant::now();
        if !self.clients.contains_key(client) {
            let window = self.window;
            self.clients.retain(|_, entry| now.duration_since(entry.started) < window);
        }

        let mut entry = self.clients.entry(client.to_string()).or_insert(Window {
            count: 0,
            started: now,
        });
        if now.duration_since(entry.started) >= self.window {
            *entry = Window { count: 0, started: now };
        }
        if entry.count >= self.max_requests {
            return false;
        }
        entry.count += 1;
        true
    }
}

/// First `X-Forwarded-For` hop, then the peer address.
fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "anonymous".to_string())
}

pub async fn limit_per_client(State(state): State<AppState>, request: Request, next: Next) -> Result<Response, AppError> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_key(request.headers(), peer);

    if !state.limiter.check(&client) {
        tracing::warn!(%client, path = %request.uri().path(), "Rate limit exceeded");
        return Err(AppError::RateLimited("Too many requests. Please try again later.".to_string()));
    }
    Ok(next.run(request).await)
}
