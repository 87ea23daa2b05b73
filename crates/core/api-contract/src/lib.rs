//! 稳定的 DTO 与 API 响应契约。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 标准 API 响应封装。
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

/// 失败响应的错误体。
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

/// HTTP 推送受理结果。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushAcceptedDto {
    pub accepted: usize,
}

/// 单协议计数。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolMetricsDto {
    pub protocol: String,
    pub frames: u64,
    pub checksum_failures: u64,
    pub decode_failures: u64,
    pub fixes_decoded: u64,
    pub fixes_dropped: u64,
}

/// 接入指标快照。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshotDto {
    pub protocols: Vec<ProtocolMetricsDto>,
    pub connections_accepted: u64,
    pub connections_closed: u64,
    pub unknown_protocol: u64,
    pub frame_overflows: u64,
    pub identity_conflicts: u64,
    pub active_sessions: u64,
    pub sessions_evicted: u64,
    pub records_normalized: u64,
    pub records_rejected: u64,
    pub rejected_by_reason: BTreeMap<String, u64>,
    pub records_unknown_vehicle: u64,
    pub dropped_duplicate: u64,
    pub dropped_shed: u64,
    pub queue_depth: u64,
    pub write_success: u64,
    pub write_failure: u64,
    pub write_latency_ms_total: u64,
    pub write_latency_ms_count: u64,
    pub end_to_end_latency_ms_total: u64,
    pub end_to_end_latency_ms_count: u64,
}

/// 在线会话。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDto {
    pub connection_id: u64,
    pub remote_addr: String,
    pub protocol: Option<String>,
    pub device_id: Option<String>,
    pub connected_at_ms: i64,
    pub last_activity_ms: i64,
}

/// 会话列表查询参数。
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionQuery {
    #[serde(alias = "device_id")]
    pub device_id: Option<String>,
}
