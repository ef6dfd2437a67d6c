//! Tollgate - In-process Request Quota Enforcement
//!
//! This crate implements per-client request quotas for HTTP services. A
//! capacity-bounded, self-expiring counter store tracks requests per client
//! key, a policy engine turns counter state into allow/deny decisions, and
//! an axum middleware renders those decisions as standard rate limit headers.

pub mod config;
pub mod error;
pub mod http;
pub mod quota;
