//! Admission decisions over counter state.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, trace, warn};

use super::key::QuotaKey;
use super::policy::{Policy, RequestContext};
use super::store::CounterStore;

/// Client identity used when a key function fails.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Result of evaluating one request against a policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    /// Whether the request fits within the quota
    pub allowed: bool,
    /// The policy's `max_requests`
    pub limit: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// Requests counted in the current window, this one included
    pub count: u64,
    /// Window end (epoch millis)
    pub reset_at: u64,
    /// Seconds until the window resets, rounded up
    pub retry_after_secs: u64,
    /// Count has reached the policy's warning threshold
    pub near_limit: bool,
    #[serde(skip)]
    pub window: Duration,
    #[serde(skip)]
    pub key: QuotaKey,
}

impl Outcome {
    /// Window end in epoch seconds, rounded up.
    pub fn reset_epoch_secs(&self) -> u64 {
        self.reset_at.div_ceil(1000)
    }
}

/// Turns counter state into allow/deny outcomes.
///
/// The engine holds no state of its own; every decision is a single
/// increment against the shared [`CounterStore`].
pub struct QuotaPolicyEngine {
    store: Arc<CounterStore>,
}

impl QuotaPolicyEngine {
    pub fn new(store: Arc<CounterStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<CounterStore> {
        &self.store
    }

    /// Count a request and decide whether it is admitted.
    ///
    /// Never fails: if the policy's key function errors or yields an empty
    /// key, the request is counted against the shared `"unknown"` client.
    pub fn evaluate(&self, ctx: &RequestContext, policy: &Policy) -> Outcome {
        let client = match policy.derive_key(ctx) {
            Ok(client) => client,
            Err(e) => {
                warn!(
                    policy = policy.name(),
                    path = %ctx.path,
                    error = %e,
                    "Key derivation failed, using sentinel client key"
                );
                UNKNOWN_CLIENT.to_string()
            }
        };

        self.evaluate_key(&QuotaKey::new(policy.name(), &client), policy)
    }

    /// Count a request for an already derived key.
    pub fn evaluate_key(&self, key: &QuotaKey, policy: &Policy) -> Outcome {
        // One clock reading drives both the window update and Retry-After
        let now = self.store.now_millis();
        let entry = self
            .store
            .increment_at(&key.to_store_key(), policy.window(), now);

        let max_requests = policy.max_requests();
        let allowed = entry.count <= max_requests;
        let near_limit = policy.is_near_limit(entry.count);

        trace!(
            key = %key.masked(),
            count = entry.count,
            limit = max_requests,
            "Evaluated quota"
        );

        if !allowed {
            debug!(
                key = %key.masked(),
                count = entry.count,
                limit = max_requests,
                "Rate limit exceeded"
            );
        } else if near_limit {
            warn!(
                key = %key.masked(),
                count = entry.count,
                limit = max_requests,
                "Client approaching rate limit"
            );
        }

        Outcome {
            allowed,
            limit: max_requests,
            remaining: max_requests.saturating_sub(entry.count),
            count: entry.count,
            reset_at: entry.reset_at,
            retry_after_secs: entry.millis_until_reset(now).div_ceil(1000),
            near_limit,
            window: policy.window(),
            key: key.clone(),
        }
    }
}

impl super::backend::QuotaBackend for QuotaPolicyEngine {
    fn evaluate(&self, ctx: &RequestContext, policy: &Policy) -> crate::error::Result<Outcome> {
        Ok(QuotaPolicyEngine::evaluate(self, ctx, policy))
    }
}
