//! `EcKryptoMiddleware` (spec.md §4.4): the ECC challenge/response gate for
//! `/v0/cmd` and `/v1/cmd`.

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use base64::Engine;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tower::ServiceExt;

use crate::callback::{headers_from_map, CallbackDatum, CallbackError, QueuedCallback};
use crate::challenge::{self, ChallengeMessage, InnerCommand};
use crate::config::CHALLENGE_WINDOW;
use crate::state::AppState;

const KRYPTO_HEADER: &str = "x-kolide-krypto";
const KRYPTO_VERSION: &str = "2023-01-30";
const B64STD: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// The signed response wrapper (spec.md §4.4 step 8). Encoded to bytes, then
/// either base64-std'd directly or wrapped in a PNG container per step 9.
#[derive(Debug, serde::Serialize)]
struct SignedResponse {
    body: String,
    db_signature: String,
    hardware_signature: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BoxBody {
    #[serde(rename = "box")]
    value: Option<String>,
}

/// State for the `/v0/cmd` / `/v1/cmd` route: the shared `AppState` plus the
/// authenticated sub-router EcKrypto proxies into (spec.md §4.4 step 6-7).
#[derive(Clone)]
pub struct EcKryptoState {
    pub app: Arc<AppState>,
    pub authenticated_mux: Router,
}

pub async fn handle(State(ec): State<EcKryptoState>, request: Request) -> Response {
    let method = request.method().clone();
    let headers = request.headers().clone();
    let query = request.uri().query().unwrap_or("").to_string();
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let body_bytes = match to_bytes(request.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    let box_b64 = match extract_box(&method, &query, &body_bytes) {
        Some(value) => value,
        None => return StatusCode::UNAUTHORIZED.into_response(),
    };

    let (message, inner) = match challenge::decode_and_verify(&box_b64, ec.app.keystore.counter_party_ecdsa()) {
        Ok(pair) => pair,
        Err(_) => return StatusCode::UNAUTHORIZED.into_response(),
    };

    if ec.app.challenges.check_and_record(&message.challenge_id) {
        tracing::warn!(challenge_id = %message.challenge_id, "challenge replay rejected");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let callback_url = inner.callback_url.clone();
    let callback_headers = headers_from_map(&inner.callback_headers);

    if let Err(status) = check_timestamp(&message) {
        enqueue_if_present(&ec.app, &callback_url, &callback_headers, CallbackDatum::failed(
            CallbackError::TimeOutOfRange,
            user_agent.clone(),
        ));
        return status.into_response();
    }

    let (inner_status, inner_response) = match serve_inner(&ec, &headers, &inner).await {
        Ok(pair) => pair,
        Err(status) => {
            enqueue_if_present(&ec.app, &callback_url, &callback_headers, CallbackDatum::failed(
                CallbackError::ResponseFailure,
                user_agent.clone(),
            ));
            return status.into_response();
        }
    };

    match build_signed_response(&ec.app, &inner.path, &inner_response) {
        Ok((wire_bytes, content_type)) => {
            enqueue_if_present(
                &ec.app,
                &callback_url,
                &callback_headers,
                CallbackDatum::success(&wire_bytes, user_agent),
            );
            (
                inner_status,
                [
                    (axum::http::header::CONTENT_TYPE, HeaderValue::from_static(content_type)),
                    (
                        axum::http::HeaderName::from_static(KRYPTO_HEADER),
                        HeaderValue::from_static(KRYPTO_VERSION),
                    ),
                ],
                wire_bytes,
            )
                .into_response()
        }
        Err(_) => {
            enqueue_if_present(&ec.app, &callback_url, &callback_headers, CallbackDatum::failed(
                CallbackError::ResponseFailure,
                user_agent,
            ));
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}

/// Prefer the `box` query parameter; fall back to a JSON body (spec.md §4.4
/// step 1, "two shapes, identical semantics").
fn extract_box(method: &Method, query: &str, body: &[u8]) -> Option<String> {
    if let Ok(parsed) = serde_urlencoded::from_str::<BoxBody>(query) {
        if let Some(value) = parsed.value {
            return Some(value);
        }
    }
    if *method == Method::POST || !body.is_empty() {
        if let Ok(parsed) = serde_json::from_slice::<BoxBody>(body) {
            return parsed.value;
        }
    }
    None
}

fn check_timestamp(message: &ChallengeMessage) -> Result<(), StatusCode> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64;
    let delta = (now - message.timestamp).unsigned_abs();
    if delta > CHALLENGE_WINDOW.as_secs() {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(())
}

/// Build and dispatch the inner request (spec.md §4.4 steps 6-7). Returns
/// the inner status alongside the body so the caller can propagate it
/// unchanged to the wrapped response (spec.md §7 "Inner-handler errors").
async fn serve_inner(
    ec: &EcKryptoState,
    original_headers: &axum::http::HeaderMap,
    inner: &InnerCommand,
) -> Result<(StatusCode, Vec<u8>), StatusCode> {
    let mut builder = Request::builder().method(Method::POST).uri(inner.path.as_str());
    for (name, value) in original_headers.iter() {
        if name == axum::http::header::CONTENT_LENGTH || name == axum::http::header::HOST {
            continue;
        }
        builder = builder.header(name.clone(), value.clone());
    }
    let inner_request = builder
        .body(Body::from(inner.body_bytes()))
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let response = ec
        .authenticated_mux
        .clone()
        .oneshot(inner_request)
        .await
        .map_err(|_: std::convert::Infallible| StatusCode::UNAUTHORIZED)?;

    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .map_err(|_| StatusCode::UNAUTHORIZED)?;
    Ok((status, body.to_vec()))
}

/// Sign with the DB signer and, when usable, the hardware signer, then
/// encode as base64-std text or a PNG container (spec.md §4.4 steps 8-9).
fn build_signed_response(
    app: &AppState,
    inner_path: &str,
    inner_response: &[u8],
) -> Result<(Vec<u8>, &'static str), ()> {
    let db_sig = app.keystore.local_db_signer().sign(inner_response).ok_or(())?;
    let hardware_signature = app
        .keystore
        .hardware_signer()
        .filter(|signer| crate::signer::is_usable(*signer))
        .and_then(|signer| signer.sign(inner_response))
        .map(|sig| B64STD.encode(sig.to_der().as_bytes()));

    let signed = SignedResponse {
        body: B64STD.encode(inner_response),
        db_signature: B64STD.encode(db_sig.to_der().as_bytes()),
        hardware_signature,
    };
    let json_bytes = serde_json::to_vec(&signed).map_err(|_| ())?;

    if inner_path.ends_with(".png") {
        let png = crate::png_container::encode(&json_bytes).map_err(|_| ())?;
        Ok((png, "image/png"))
    } else {
        Ok((B64STD.encode(&json_bytes).into_bytes(), "text/plain"))
    }
}

fn enqueue_if_present(
    app: &AppState,
    callback_url: &str,
    headers: &http::HeaderMap,
    datum: CallbackDatum,
) {
    if callback_url.is_empty() {
        return;
    }
    app.callbacks.enqueue(QueuedCallback {
        url: callback_url.to_string(),
        headers: headers.clone(),
        datum,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_box_prefers_query_over_body() {
        let result = extract_box(&Method::GET, "box=from-query", b"{\"box\":\"from-body\"}");
        assert_eq!(result, Some("from-query".to_string()));
    }

    #[test]
    fn extract_box_falls_back_to_body() {
        let result = extract_box(&Method::POST, "", b"{\"box\":\"from-body\"}");
        assert_eq!(result, Some("from-body".to_string()));
    }

    #[test]
    fn extract_box_missing_both_is_none() {
        assert_eq!(extract_box(&Method::GET, "", b""), None);
    }
}
