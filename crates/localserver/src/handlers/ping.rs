//! Unauthenticated health check (spec.md §6 `GET /ping`).

use axum::response::Json;
use serde_json::{json, Value};

pub async fn handle() -> Json<Value> {
    Json(json!({ "ping": "Kolide" }))
}
