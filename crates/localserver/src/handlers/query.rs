//! `QueryHandler` (spec.md §4.7, §6 `GET /query`).

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use std::sync::Arc;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct QueryParams {
    query: Option<String>,
}

pub async fn handle(State(state): State<Arc<AppState>>, Query(params): Query<QueryParams>) -> Response {
    let Some(sql) = params.query.filter(|s| !s.is_empty()) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    match state.querier.query(&sql).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => {
            tracing::debug!(error = %err, "query failed");
            StatusCode::BAD_REQUEST.into_response()
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
    async fn missing_query_param_is_bad_request() {
        let state = test_state();
        let response = handle(State(state), Query(QueryParams { query: None })).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
