//! Presence-detection hook (spec.md §4.5). Runs after `EcKryptoMiddleware`,
//! before the authenticated mux.

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::state::AppState;

const INTERVAL_HEADER: &str = "x-kolide-presence-detection-interval";
const REASON_HEADER: &str = "x-kolide-presence-detection-reason";
const RESULT_HEADER: &str = "x-kolide-duration-since-last-presence-detection";
const DEFAULT_REASON: &str = "authenticate";

#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("presence detection failed: {0}")]
    Failed(String),
}

/// An externally supplied user-consent check (spec.md §4.5, §9 "narrow
/// capability abstraction").
#[async_trait]
pub trait PresenceDetector: Send + Sync {
    async fn detect_presence(&self, reason: &str, max_staleness: Duration) -> Result<Duration, PresenceError>;
}

/// Pure pass-through: this crate targets no macOS-specific consent UI, so the
/// hook always reports no staleness rather than denying requests (spec.md
/// §4.5 "On non-macOS systems, the hook MUST be a pure pass-through").
pub struct NoopPresenceDetector;

#[async_trait]
impl PresenceDetector for NoopPresenceDetector {
    async fn detect_presence(&self, _reason: &str, _max_staleness: Duration) -> Result<Duration, PresenceError> {
        Ok(Duration::ZERO)
    }
}

/// `axum::middleware::from_fn_with_state` hook. Missing interval header is a
/// pass-through; an unparseable one is a `400`; otherwise the detector runs
/// and its outcome (even an error) is attached as a forwarded header.
pub async fn hook(State(state): State<Arc<AppState>>, mut request: Request, next: Next) -> Response {
    let Some(interval_header) = request.headers().get(INTERVAL_HEADER).cloned() else {
        return next.run(request).await;
    };

    let interval_str = match interval_header.to_str() {
        Ok(s) => s,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    let max_staleness = match humantime::parse_duration(interval_str) {
        Ok(d) => d,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    let reason = request
        .headers()
        .get(REASON_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_REASON)
        .to_string();

    let duration_since = match state.presence.detect_presence(&reason, max_staleness).await {
        Ok(duration) => duration,
        Err(err) => {
            tracing::warn!(error = %err, "presence detection failed, forwarding with unknown staleness");
            max_staleness
        }
    };

    if let Ok(value) = HeaderValue::from_str(&humantime::format_duration(duration_since).to_string()) {
        request.headers_mut().insert(RESULT_HEADER, value);
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_detector_reports_zero_staleness() {
        let detector = NoopPresenceDetector;
        let elapsed = detector.detect_presence("authenticate", Duration::from_secs(10)).await.unwrap();
        assert_eq!(elapsed, Duration::ZERO);
    }
}
