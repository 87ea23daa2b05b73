use crate::AppState;
use axum::{Json, extract::State, response::IntoResponse};

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "ok": !state.pipeline.is_closed(),
        "sessions": state.registry.len(),
    }))
}
