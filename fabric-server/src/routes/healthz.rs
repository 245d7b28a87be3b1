//! `GET /healthz` (§6 addition): ambient liveness endpoint, used by the
//! CLI's own readiness polling before it proxies a command to the server.

use axum::Json;
use serde_json::{json, Value};

pub async fn healthz() -> Json<Value> {
    Json(json!({ "ok": true }))
}
