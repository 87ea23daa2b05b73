//! HTTP 错误响应辅助函数

use api_contract::ApiResponse;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use fleet_ingest::IngestError;

/// 错误请求响应
pub fn bad_request_error(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse::<()>::error("INVALID.REQUEST", message.into())),
    )
        .into_response()
}

/// 接入链路不可用（流水线已关闭等）
pub fn unavailable_error(message: impl Into<String>) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ApiResponse::<()>::error("INGEST.UNAVAILABLE", message.into())),
    )
        .into_response()
}

/// 接入错误映射为 HTTP 响应
pub fn ingest_error(err: IngestError) -> Response {
    match err {
        IngestError::BadRequest(message) => bad_request_error(message),
        other => unavailable_error(other.to_string()),
    }
}
