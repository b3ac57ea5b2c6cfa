//! `Dt4aInfoHandler` (spec.md §4.7): the DT4a-wrapped inner handler reached
//! via `/dt4a`, `/v3/dt4a`.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use crate::kv::{BUCKET_DT4A_INFO, LEGACY_DT4A_KEY};
use crate::state::AppState;

const ACCOUNT_UUID_HEADER: &str = "dt4a-account-uuid";

pub async fn handle(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let key = headers
        .get(ACCOUNT_UUID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .unwrap_or(LEGACY_DT4A_KEY);

    match state.kv.get(BUCKET_DT4A_INFO, key).await {
        Ok(Some(bytes)) => {
            ([(axum::http::header::CONTENT_TYPE, "application/json")], bytes).into_response()
        }
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            tracing::error!(error = %err, key = %key, "dt4a info lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
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

    fn test_state(kv: Arc<MemoryKvStore>) -> Arc<AppState> {
        let signer = Arc::new(SoftwareSigner::generate());
        let pubkey = signer.public().unwrap();
        let keystore = KeyStore::for_testing(pubkey, signer);
        let q = Arc::new(UnconfiguredQuerier);
        Arc::new(AppState::new(
            crate::config::Config::default(),
            keystore,
            kv,
            q.clone(),
            q,
            Arc::new(NoopPresenceDetector),
            HashMap::new(),
        ))
    }

    #[tokio::test]
    async fn falls_back_to_legacy_key_when_header_absent() {
        let kv = Arc::new(MemoryKvStore::new());
        kv.set(BUCKET_DT4A_INFO, LEGACY_DT4A_KEY, b"legacy-bytes".to_vec()).await.unwrap();
        let state = test_state(kv);

        let response = handle(State(state), HeaderMap::new()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_value_is_no_content() {
        let kv = Arc::new(MemoryKvStore::new());
        let state = test_state(kv);

        let response = handle(State(state), HeaderMap::new()).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn present_account_uuid_is_looked_up_by_header() {
        let kv = Arc::new(MemoryKvStore::new());
        kv.set(BUCKET_DT4A_INFO, "account-1", b"{}".to_vec()).await.unwrap();
        let state = test_state(kv);

        let mut headers = HeaderMap::new();
        headers.insert(ACCOUNT_UUID_HEADER, "account-1".parse().unwrap());
        let response = handle(State(state), headers).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
