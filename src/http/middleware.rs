//! Axum middleware enforcing quotas on incoming requests.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{error, instrument};

use super::headers::{apply_rate_limit_headers, denial_response};
use crate::quota::{PolicySet, QuotaBackend, RequestContext};

/// Identity established by upstream authentication.
///
/// Auth layers insert this as a request extension; per-user policies key
/// on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

/// Shared state for [`rate_limit_middleware`].
#[derive(Clone)]
pub struct RateLimitState {
    backend: Arc<dyn QuotaBackend>,
    policies: Arc<PolicySet>,
    trusted_proxies: Arc<[IpAddr]>,
}

impl RateLimitState {
    /// State that keys clients by socket address only.
    pub fn new(backend: Arc<dyn QuotaBackend>, policies: Arc<PolicySet>) -> Self {
        Self {
            backend,
            policies,
            trusted_proxies: Arc::from(Vec::new()),
        }
    }

    /// Honour forwarding headers from these peers.
    pub fn with_trusted_proxies(mut self, proxies: Vec<IpAddr>) -> Self {
        self.trusted_proxies = Arc::from(proxies);
        self
    }

    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }
}

/// Count the request against the policy for its route.
///
/// Denied requests get a 429 without reaching the inner service. Admitted
/// requests carry the `RateLimit-*` headers on whatever response the inner
/// service produces. A backend failure lets the request through.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let ctx = request_context(&request, &state.trusted_proxies);
    let policy = state.policies.resolve(&ctx.path);

    let outcome = match state.backend.evaluate(&ctx, policy) {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(
                error = %e,
                policy = policy.name(),
                "Rate limit evaluation failed, allowing request"
            );
            return next.run(request).await;
        }
    };

    if !outcome.allowed {
        return denial_response(&outcome);
    }

    let mut response = next.run(request).await;
    apply_rate_limit_headers(response.headers_mut(), &outcome);
    response
}

/// Extract the attributes key functions work from.
pub fn request_context<B>(
    request: &axum::http::Request<B>,
    trusted_proxies: &[IpAddr],
) -> RequestContext {
    RequestContext {
        client_ip: client_ip(request, trusted_proxies),
        user_id: request
            .extensions()
            .get::<AuthenticatedUser>()
            .map(|user| user.0.clone()),
        path: request.uri().path().to_string(),
    }
}

/// Client address: the socket peer, unless the peer is a trusted proxy.
///
/// Behind a trusted proxy the rightmost `X-Forwarded-For` hop that is not
/// itself a trusted proxy is used, then `X-Real-IP`, then the peer.
fn client_ip<B>(request: &axum::http::Request<B>, trusted_proxies: &[IpAddr]) -> Option<IpAddr> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip())?;

    if !trusted_proxies.contains(&peer) {
        return Some(peer);
    }
    forwarded_client(request, trusted_proxies).or(Some(peer))
}

fn forwarded_client<B>(request: &axum::http::Request<B>, trusted_proxies: &[IpAddr]) -> Option<IpAddr> {
    let header = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
    };

    if let Some(raw) = header("x-forwarded-for") {
        for hop in raw.rsplit(',').map(str::trim) {
            match parse_ip_addr(hop) {
                Some(ip) if trusted_proxies.contains(&ip) => continue,
                Some(ip) => return Some(ip),
                // A malformed hop means the chain can't be trusted past it
                None => return None,
            }
        }
    }

    header("x-real-ip").and_then(|raw| parse_ip_addr(raw.trim()))
}

fn parse_ip_addr(raw: &str) -> Option<IpAddr> {
    raw.parse::<IpAddr>()
        .ok()
        .or_else(|| raw.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}
