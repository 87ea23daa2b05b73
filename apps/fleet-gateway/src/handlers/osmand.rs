//! OsmAnd / Traccar Client 推送
//!
//! - GET /?id=..&lat=..&lon=..
//! - POST /（表单体；空体时回退到查询串）
//! - 同样挂在 /osmand 下

use crate::AppState;
use crate::utils::response::ingest_error;
use api_contract::{ApiResponse, PushAcceptedDto};
use axum::{
    Json,
    body::Bytes,
    extract::{RawQuery, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use fleet_ingest::ingest_http_push;

pub async fn osmand_push_query(State(state): State<AppState>, RawQuery(query): RawQuery) -> Response {
    push(&state, query.unwrap_or_default().as_bytes()).await
}

pub async fn osmand_push_body(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    if body.iter().all(u8::is_ascii_whitespace) {
        return push(&state, query.unwrap_or_default().as_bytes()).await;
    }
    push(&state, &body).await
}

async fn push(state: &AppState, payload: &[u8]) -> Response {
    match ingest_http_push(payload, state.handler.as_ref()).await {
        Ok(accepted) => (
            StatusCode::OK,
            Json(ApiResponse::success(PushAcceptedDto { accepted })),
        )
            .into_response(),
        Err(err) => ingest_error(err),
    }
}
