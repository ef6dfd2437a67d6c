//! Quota policies and client key derivation.

use std::net::IpAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::error::{Result, TollgateError};

/// Fraction of the quota at which a client is considered close to the limit.
pub const DEFAULT_WARN_THRESHOLD: f64 = 0.9;

/// Request attributes a key function may draw on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Resolved client address, if any
    pub client_ip: Option<IpAddr>,
    /// Authenticated user, if upstream auth established one
    pub user_id: Option<String>,
    /// Request path
    pub path: String,
}

impl RequestContext {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Reasons a client key could not be derived.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("client address unavailable")]
    MissingClientAddress,
    #[error("key function returned an empty key")]
    Empty,
    #[error("{0}")]
    Custom(String),
    #[error("key function panicked: {0}")]
    Panicked(String),
}

/// Derives the client identity a request is counted against.
pub type KeyFn = Arc<dyn Fn(&RequestContext) -> std::result::Result<String, KeyError> + Send + Sync>;

/// Key requests by client IP address.
pub fn key_by_ip(ctx: &RequestContext) -> std::result::Result<String, KeyError> {
    ctx.client_ip
        .map(|ip| ip.to_string())
        .ok_or(KeyError::MissingClientAddress)
}

/// Key requests by authenticated user, falling back to client IP.
pub fn key_by_user(ctx: &RequestContext) -> std::result::Result<String, KeyError> {
    match ctx.user_id.as_deref() {
        Some(user) if !user.is_empty() => Ok(format!("user:{}", user)),
        _ => key_by_ip(ctx),
    }
}

/// A named admission rule: at most `max_requests` per `window` per client.
#[derive(Clone)]
pub struct Policy {
    name: String,
    window: Duration,
    max_requests: u64,
    warn_threshold: f64,
    key_fn: KeyFn,
}

impl Policy {
    /// Create a policy keyed by client IP.
    ///
    /// A `max_requests` of zero is valid and denies every request.
    pub fn new(name: impl Into<String>, window: Duration, max_requests: u64) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(TollgateError::InvalidPolicy(
                "policy name must not be empty".to_string(),
            ));
        }
        if window.is_zero() {
            return Err(TollgateError::InvalidPolicy(format!(
                "policy '{}' window must be greater than zero",
                name
            )));
        }

        Ok(Self {
            name,
            window,
            max_requests,
            warn_threshold: DEFAULT_WARN_THRESHOLD,
            key_fn: Arc::new(key_by_ip),
        })
    }

    /// Replace the key function.
    pub fn with_key_fn<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&RequestContext) -> std::result::Result<String, KeyError> + Send + Sync + 'static,
    {
        self.key_fn = Arc::new(key_fn);
        self
    }

    /// Set the near-limit warning ratio; must lie in `(0, 1]`.
    pub fn with_warn_threshold(mut self, ratio: f64) -> Result<Self> {
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(TollgateError::InvalidPolicy(format!(
                "policy '{}' warn threshold {} is outside (0, 1]",
                self.name, ratio
            )));
        }
        self.warn_threshold = ratio;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    pub fn warn_threshold(&self) -> f64 {
        self.warn_threshold
    }

    /// Run the key function, rejecting empty keys.
    ///
    /// A panicking key function is reported as [`KeyError::Panicked`].
    pub fn derive_key(&self, ctx: &RequestContext) -> std::result::Result<String, KeyError> {
        let key = catch_unwind(AssertUnwindSafe(|| (self.key_fn)(ctx)))
            .map_err(|payload| KeyError::Panicked(panic_message(payload.as_ref())))??;
        if key.is_empty() {
            return Err(KeyError::Empty);
        }
        Ok(key)
    }

    /// Whether `count` has reached the warning threshold.
    pub fn is_near_limit(&self, count: u64) -> bool {
        count as f64 >= self.max_requests as f64 * self.warn_threshold
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|msg| msg.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

impl std::fmt::Debug for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Policy")
            .field("name", &self.name)
            .field("window", &self.window)
            .field("max_requests", &self.max_requests)
            .field("warn_threshold", &self.warn_threshold)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with_ip() -> RequestContext {
        RequestContext::new("/api/items").with_client_ip("10.0.0.1".parse().unwrap())
    }

    #[test]
    fn test_policy_rejects_zero_window() {
        let err = Policy::new("general", Duration::ZERO, 10).unwrap_err();
        assert!(matches!(err, TollgateError::InvalidPolicy(_)));
    }

    #[test]
    fn test_policy_rejects_empty_name() {
        assert!(Policy::new("", Duration::from_secs(1), 10).is_err());
    }

    #[test]
    fn test_policy_allows_zero_max_requests() {
        let policy = Policy::new("closed", Duration::from_secs(1), 0).unwrap();
        assert_eq!(policy.max_requests(), 0);
    }

    #[test]
    fn test_warn_threshold_bounds() {
        let policy = Policy::new("general", Duration::from_secs(1), 10).unwrap();
        assert!(policy.clone().with_warn_threshold(0.0).is_err());
        assert!(policy.clone().with_warn_threshold(1.5).is_err());
        assert!(policy.clone().with_warn_threshold(f64::NAN).is_err());

        let policy = policy.with_warn_threshold(0.5).unwrap();
        assert_eq!(policy.warn_threshold(), 0.5);
    }

    #[test]
    fn test_near_limit() {
        let policy = Policy::new("general", Duration::from_secs(1), 10).unwrap();
        assert!(!policy.is_near_limit(8));
        assert!(policy.is_near_limit(9));
        assert!(policy.is_near_limit(11));
    }

    #[test]
    fn test_default_key_is_client_ip() {
        let policy = Policy::new("general", Duration::from_secs(1), 10).unwrap();
        assert_eq!(policy.derive_key(&ctx_with_ip()).unwrap(), "10.0.0.1");
        assert_eq!(
            policy.derive_key(&RequestContext::new("/")),
            Err(KeyError::MissingClientAddress)
        );
    }

    #[test]
    fn test_key_by_user_falls_back_to_ip() {
        let ctx = ctx_with_ip();
        assert_eq!(key_by_user(&ctx).unwrap(), "10.0.0.1");

        let ctx = ctx.with_user_id("alice");
        assert_eq!(key_by_user(&ctx).unwrap(), "user:alice");
    }

    #[test]
    fn test_custom_key_fn_empty_is_rejected() {
        let policy = Policy::new("custom", Duration::from_secs(1), 10)
            .unwrap()
            .with_key_fn(|_| Ok(String::new()));

        assert_eq!(policy.derive_key(&ctx_with_ip()), Err(KeyError::Empty));
    }

    #[test]
    fn test_panicking_key_fn_is_reported() {
        let policy = Policy::new("custom", Duration::from_secs(1), 10)
            .unwrap()
            .with_key_fn(|_| panic!("lookup exploded"));

        assert_eq!(
            policy.derive_key(&ctx_with_ip()),
            Err(KeyError::Panicked("lookup exploded".to_string()))
        );
    }
}
