//! HTTP server exposing quota checks and store health.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::{rate_limit_middleware, RateLimitState};
use crate::error::{Result, TollgateError};
use crate::quota::{PolicySet, QuotaKey, QuotaPolicyEngine};

#[derive(Clone)]
struct AppState {
    engine: Arc<QuotaPolicyEngine>,
    policies: Arc<PolicySet>,
}

/// Body of `POST /v1/check`.
#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    /// Policy name
    pub policy: String,
    /// Client identity to count against
    pub key: String,
}

/// Build the service router.
///
/// `/v1/check` sits behind the rate limit middleware; `/health` does not.
/// Forwarding headers are honoured only from `trusted_proxies`.
pub fn router(
    engine: Arc<QuotaPolicyEngine>,
    policies: Arc<PolicySet>,
    trusted_proxies: Vec<IpAddr>,
) -> Router {
    let limiter =
        RateLimitState::new(engine.clone(), policies.clone()).with_trusted_proxies(trusted_proxies);
    let state = AppState { engine, policies };

    Router::new()
        .route("/v1/check", post(check))
        .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
        .route("/health", get(health))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "store": state.engine.store().stats(),
    }))
}

/// Count one request for an explicit client under a named policy.
///
/// The decision is returned in the body; this endpoint answers 200 whether
/// or not the client is over its limit.
async fn check(State(state): State<AppState>, Json(request): Json<CheckRequest>) -> Response {
    let Some(policy) = state.policies.get(&request.policy) else {
        return error_response(
            StatusCode::NOT_FOUND,
            "UNKNOWN_POLICY",
            format!("policy '{}' is not configured", request.policy),
        );
    };

    let client = request.key.trim();
    if client.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "INVALID_KEY",
            "key must not be empty".to_string(),
        );
    }

    let outcome = state
        .engine
        .evaluate_key(&QuotaKey::new(policy.name(), client), policy);

    info!(
        policy = policy.name(),
        allowed = outcome.allowed,
        remaining = outcome.remaining,
        "Quota check decision made"
    );

    Json(json!({ "success": true, "data": outcome })).into_response()
}

fn error_response(status: StatusCode, code: &str, message: String) -> Response {
    (
        status,
        Json(json!({
            "success": false,
            "error": { "code": code, "message": message },
        })),
    )
        .into_response()
}

/// HTTP server for the quota service.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    router: Router,
}

impl HttpServer {
    /// Create a new server around a shared engine and policy set.
    pub fn new(
        addr: SocketAddr,
        engine: Arc<QuotaPolicyEngine>,
        policies: Arc<PolicySet>,
        trusted_proxies: Vec<IpAddr>,
    ) -> Self {
        Self {
            addr,
            router: router(engine, policies, trusted_proxies),
        }
    }

    /// Start the server.
    ///
    /// This method will block until the server fails.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;

        info!(addr = %self.addr, "Starting HTTP server");

        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            TollgateError::Io(e)
        })
    }
}
