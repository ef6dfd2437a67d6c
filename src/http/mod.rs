//! HTTP surface: quota middleware, response rendering and the service router.

mod headers;
mod middleware;
mod server;

pub use headers::{
    apply_rate_limit_headers, denial_message, denial_response, describe_window, DenialBody,
    DenialError, RATE_LIMITED_CODE, RATE_LIMIT_LIMIT, RATE_LIMIT_REMAINING, RATE_LIMIT_RESET,
};
pub use middleware::{rate_limit_middleware, request_context, AuthenticatedUser, RateLimitState};
pub use server::{router, CheckRequest, HttpServer};
