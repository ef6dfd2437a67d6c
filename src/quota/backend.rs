//! Quota backend trait used by the HTTP layer.

use super::engine::Outcome;
use super::policy::{Policy, RequestContext};
use crate::error::Result;

/// Trait for quota evaluation implementations.
///
/// This lets the middleware run against the in-process
/// [`QuotaPolicyEngine`](super::QuotaPolicyEngine) or any substitute. An
/// `Err` is treated as an internal fault and the request is let through.
pub trait QuotaBackend: Send + Sync {
    /// Count a request and decide whether it is admitted.
    fn evaluate(&self, ctx: &RequestContext, policy: &Policy) -> Result<Outcome>;
}
