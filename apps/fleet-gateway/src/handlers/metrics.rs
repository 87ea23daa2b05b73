//! 接入指标快照。
//!
//! - GET /metrics

use api_contract::{ApiResponse, MetricsSnapshotDto, ProtocolMetricsDto};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use fleet_telemetry::{MetricsSnapshot, metrics};

pub async fn get_metrics() -> Response {
    (
        StatusCode::OK,
        Json(ApiResponse::success(snapshot_to_dto(metrics().snapshot()))),
    )
        .into_response()
}

fn snapshot_to_dto(snapshot: MetricsSnapshot) -> MetricsSnapshotDto {
    MetricsSnapshotDto {
        protocols: snapshot
            .protocols
            .into_iter()
            .filter_map(|counters| {
                let protocol = counters.protocol?;
                Some(ProtocolMetricsDto {
                    protocol: protocol.as_str().to_string(),
                    frames: counters.frames,
                    checksum_failures: counters.checksum_failures,
                    decode_failures: counters.decode_failures,
                    fixes_decoded: counters.fixes_decoded,
                    fixes_dropped: counters.fixes_dropped,
                })
            })
            .collect(),
        connections_accepted: snapshot.connections_accepted,
        connections_closed: snapshot.connections_closed,
        unknown_protocol: snapshot.unknown_protocol,
        frame_overflows: snapshot.frame_overflows,
        identity_conflicts: snapshot.identity_conflicts,
        active_sessions: snapshot.active_sessions,
        sessions_evicted: snapshot.sessions_evicted,
        records_normalized: snapshot.records_normalized,
        records_rejected: snapshot.records_rejected,
        rejected_by_reason: snapshot
            .rejected_by_reason
            .into_iter()
            .map(|(reason, count)| (reason.to_string(), count))
            .collect(),
        records_unknown_vehicle: snapshot.records_unknown_vehicle,
        dropped_duplicate: snapshot.dropped_duplicate,
        dropped_shed: snapshot.dropped_shed,
        queue_depth: snapshot.queue_depth,
        write_success: snapshot.write_success,
        write_failure: snapshot.write_failure,
        write_latency_ms_total: snapshot.write_latency_ms_total,
        write_latency_ms_count: snapshot.write_latency_ms_count,
        end_to_end_latency_ms_total: snapshot.end_to_end_latency_ms_total,
        end_to_end_latency_ms_count: snapshot.end_to_end_latency_ms_count,
    }
}
