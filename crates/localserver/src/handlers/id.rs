//! `IdHandler` (spec.md §4.7): signed device-identity information.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Json;
use serde::Serialize;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use ulid::Ulid;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct IdResponse {
    #[serde(rename = "UUID")]
    uuid: String,
    #[serde(rename = "InstanceId")]
    instance_id: String,
    #[serde(rename = "HardwareSerial")]
    hardware_serial: String,
    #[serde(rename = "Nonce")]
    nonce: String,
    #[serde(rename = "Timestamp")]
    timestamp: i64,
    #[serde(rename = "Origin")]
    origin: String,
    #[serde(rename = "EnrollmentStatus")]
    enrollment_status: String,
    #[serde(rename = "EnrollmentDetails")]
    enrollment_details: serde_json::Value,
}

/// Always succeeds, even when identity fields are still empty (spec.md
/// §4.7 "writes succeed even if identity fields are empty").
pub async fn handle(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Json<IdResponse> {
    let identity = state.identity.snapshot().await;
    let origin = headers
        .get(axum::http::header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64;

    Json(IdResponse {
        uuid: identity.uuid,
        instance_id: identity.instance_id,
        hardware_serial: identity.hardware_serial,
        nonce: Ulid::new().to_string(),
        timestamp,
        origin: crate::origin::sanitize_for_log(&origin),
        enrollment_status: "unknown".to_string(),
        enrollment_details: serde_json::Value::Null,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::KeyStore;
    use crate::kv::MemoryKvStore;
    use crate::middleware::presence::NoopPresenceDetector;
    use crate::querier::UnconfiguredQuerier;
    use crate::signer::SoftwareSigner;
    use std::collections::HashMap;

    fn test_state() -> Arc<AppState> {
        let signer = Arc::new(SoftwareSigner::generate());
        let pubkey = signer.public().unwrap();
        let keystore = KeyStore::for_testing(pubkey, signer);
        let q = Arc::new(UnconfiguredQuerier);
        Arc::new(AppState::new(
            crate::config::Config::default(),
            keystore,
            Arc::new(MemoryKvStore::new()),
            q.clone(),
            q,
            Arc::new(NoopPresenceDetector),
            HashMap::new(),
        ))
    }

    #[tokio::test]
    async fn succeeds_with_empty_identity_fields() {
        let state = test_state();
        let response = handle(State(state), HeaderMap::new()).await;
        assert!(response.0.uuid.is_empty());
        assert!(!response.0.nonce.is_empty());
    }
}
