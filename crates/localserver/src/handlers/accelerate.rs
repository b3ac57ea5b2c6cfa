//! `AccelerateHandler` (spec.md §4.7): `POST /acceleratecontrol`.

use axum::extract::State;
use axum::http::StatusCode;
use serde::Deserialize;
use std::sync::Arc;

use crate::state::AppState;

/// Go-style duration strings (`"10s"`, `"5m"`), parsed with the same
/// `humantime` crate used by the presence-detection hook.
#[derive(Debug, Deserialize)]
pub struct AccelerateBody {
    interval: String,
    duration: String,
}

pub async fn handle(
    State(state): State<Arc<AppState>>,
    body: axum::body::Bytes,
) -> StatusCode {
    let Ok(parsed) = serde_json::from_slice::<AccelerateBody>(&body) else {
        return StatusCode::BAD_REQUEST;
    };
    let Ok(interval) = humantime::parse_duration(&parsed.interval) else {
        return StatusCode::BAD_REQUEST;
    };
    let Ok(duration) = humantime::parse_duration(&parsed.duration) else {
        return StatusCode::BAD_REQUEST;
    };

    match state.accelerator.accelerate(interval.as_secs(), duration.as_secs()).await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(err) => {
            tracing::warn!(error = %err, "accelerate control failed");
            StatusCode::BAD_REQUEST
        }
    }
}
