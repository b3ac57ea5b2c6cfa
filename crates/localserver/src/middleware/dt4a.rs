//! `DT4aMiddleware` (spec.md §4.3): trust-chain gate for `/dt4a`, `/v3/dt4a`.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::chain::{Chain, ChainValidator};
use crate::origin;
use crate::seal;
use crate::state::AppState;

const B64URL: base64::engine::GeneralPurpose = base64::engine::general_purpose::URL_SAFE_NO_PAD;

#[derive(Debug, Deserialize)]
pub struct PayloadQuery {
    payload: Option<String>,
}

#[derive(Debug, Serialize)]
struct SealedResponse {
    data: String,
    #[serde(rename = "pubKey")]
    pub_key: String,
}

/// `/dt4a`, `/v3/dt4a` (spec.md §4.3 steps 1-9).
pub async fn handle(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<PayloadQuery>,
) -> Response {
    let origin_header = headers
        .get(axum::http::header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !origin::is_allowlisted(origin_header, &state.config.origin_allowlist, &state.config.origin_allowed_suffixes) {
        tracing::debug!(origin = %origin::sanitize_for_log(origin_header), "dt4a origin denied");
        return StatusCode::FORBIDDEN.into_response();
    }

    let Some(payload) = params.payload.filter(|p| !p.is_empty()) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let decoded = match B64URL.decode(&payload) {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    let links: Vec<crate::chain::ChainLink> = match serde_json::from_slice(&decoded) {
        Ok(links) => links,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    let chain = Chain { links };

    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64;
    let recipient = match ChainValidator::validate(&chain, &state.trusted_chain_roots, now) {
        Ok(key) => key,
        Err(err) => {
            tracing::debug!(error = %err, "chain validation failed");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    let inner_response = crate::handlers::dt4a_info::handle(State(state.clone()), headers).await.into_response();
    let inner_status = inner_response.status();
    let inner_body = match axum::body::to_bytes(inner_response.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    match seal::seal(&inner_body, recipient) {
        Ok(envelope) => {
            let response = SealedResponse {
                data: B64URL.encode(&envelope.data),
                pub_key: B64URL.encode(envelope.pub_key),
            };
            (inner_status, Json(response)).into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "dt4a seal failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_query_missing_field_deserializes_as_none() {
        let parsed: PayloadQuery = serde_urlencoded::from_str("").unwrap();
        assert!(parsed.payload.is_none());
    }
}
