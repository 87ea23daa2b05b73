//! 在线会话查询
//!
//! - GET /sessions[?deviceId=..]

use crate::AppState;
use api_contract::{ApiResponse, SessionDto, SessionQuery};
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use fleet_session::Session;

pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Response {
    let sessions: Vec<SessionDto> = match query.device_id.as_deref().map(str::trim) {
        Some(device_id) if !device_id.is_empty() => state
            .registry
            .lookup_device(device_id)
            .into_iter()
            .map(session_to_dto)
            .collect(),
        _ => state
            .registry
            .sessions()
            .into_iter()
            .map(session_to_dto)
            .collect(),
    };
    (StatusCode::OK, Json(ApiResponse::success(sessions))).into_response()
}

fn session_to_dto(session: Session) -> SessionDto {
    SessionDto {
        connection_id: session.connection_id,
        remote_addr: session.remote_addr.to_string(),
        protocol: session.protocol.map(|tag| tag.as_str().to_string()),
        device_id: session.device_id,
        connected_at_ms: session.connected_at_ms,
        last_activity_ms: session.last_activity_ms,
    }
}
