use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::api_state::ApiState;

/// Process is up.
pub async fn live() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

/// Readiness probe: returns 200 once an index with passages is being served,
/// else 503.
pub async fn ready(State(state): State<ApiState>) -> impl IntoResponse {
    let info = state.gateway.backend_info();
    let stats = state.gateway.stats();

    if info.passages == 0 {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "error",
                "index": info.index_name,
                "reason": "index holds no passages"
            })),
        );
    }

    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "index": info.index_name,
            "passages": info.passages,
            "collection_loaded": info.collection_loaded,
            "cached_queries": state.gateway.cached_queries(),
            "backend_calls": stats.backend_calls(),
            "cache_hits": stats.cache_hits(),
            "requests": state.request_count()
        })),
    )
}
