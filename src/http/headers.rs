//! Rendering of quota outcomes into HTTP responses.

use std::time::Duration;

use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::quota::Outcome;

pub const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
pub const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
pub const RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

/// Machine-readable code carried in every denial body.
pub const RATE_LIMITED_CODE: &str = "RATE_LIMITED";

/// JSON body of a 429 response.
#[derive(Debug, Clone, Serialize)]
pub struct DenialBody {
    pub success: bool,
    pub error: DenialError,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DenialError {
    pub code: &'static str,
    pub message: String,
    pub retry_after: u64,
}

impl DenialBody {
    pub fn from_outcome(outcome: &Outcome) -> Self {
        Self {
            success: false,
            error: DenialError {
                code: RATE_LIMITED_CODE,
                message: denial_message(outcome),
                retry_after: outcome.retry_after_secs,
            },
        }
    }
}

/// Attach `RateLimit-Limit`, `RateLimit-Remaining` and `RateLimit-Reset`.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, outcome: &Outcome) {
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(outcome.limit));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(outcome.remaining));
    headers.insert(RATE_LIMIT_RESET, HeaderValue::from(outcome.reset_epoch_secs()));
}

/// Build the 429 response for a denied request.
pub fn denial_response(outcome: &Outcome) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(DenialBody::from_outcome(outcome)),
    )
        .into_response();

    let headers = response.headers_mut();
    apply_rate_limit_headers(headers, outcome);
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(0u64));
    headers.insert(RETRY_AFTER, HeaderValue::from(outcome.retry_after_secs));
    response
}

/// Human-readable explanation of a denial.
pub fn denial_message(outcome: &Outcome) -> String {
    format!(
        "Too many requests: limit of {} requests per {} exceeded. Try again in {} seconds.",
        outcome.limit,
        describe_window(outcome.window),
        outcome.retry_after_secs
    )
}

/// Render a window length the way a person would say it.
pub fn describe_window(window: Duration) -> String {
    let secs = window.as_secs();
    let (amount, unit) = if window.subsec_nanos() != 0 || secs == 0 {
        (u64::try_from(window.as_millis()).unwrap_or(u64::MAX), "millisecond")
    } else if secs % 3600 == 0 {
        (secs / 3600, "hour")
    } else if secs % 60 == 0 {
        (secs / 60, "minute")
    } else {
        (secs, "second")
    };

    if amount == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", amount, unit)
    }
}
