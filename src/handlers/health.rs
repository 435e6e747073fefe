use axum::{Json, response::IntoResponse};

use crate::metrics::{CACHE_HITS, CACHE_MISSES, FAILURES, REQUEST_TOTAL};

// health handler, also reports batch progress so far
pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "requests": REQUEST_TOTAL.get(),
        "cache_hits": CACHE_HITS.get(),
        "cache_misses": CACHE_MISSES.get(),
        "failures": FAILURES.get(),
    }))
}
