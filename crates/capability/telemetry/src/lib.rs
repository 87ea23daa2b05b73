//! 追踪、请求 ID 与接入指标。

use domain::ProtocolTag;
use std::collections::BTreeMap;
use std::sync::{Mutex, OnceLock};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 请求级追踪标识。
#[derive(Debug, Clone)]
pub struct RequestIds {
    pub request_id: String,
    pub trace_id: String,
}

/// 单协议计数快照。
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtocolCounters {
    pub protocol: Option<ProtocolTag>,
    pub frames: u64,
    pub checksum_failures: u64,
    pub decode_failures: u64,
    pub fixes_decoded: u64,
    pub fixes_dropped: u64,
}

/// 指标快照。
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub protocols: Vec<ProtocolCounters>,
    pub connections_accepted: u64,
    pub connections_closed: u64,
    pub unknown_protocol: u64,
    pub frame_overflows: u64,
    pub identity_conflicts: u64,
    pub active_sessions: u64,
    pub sessions_evicted: u64,
    pub records_normalized: u64,
    pub records_rejected: u64,
    /// 按拒绝原因分组的计数。
    pub rejected_by_reason: BTreeMap<&'static str, u64>,
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

#[derive(Default)]
struct ProtocolMetrics {
    frames: AtomicU64,
    checksum_failures: AtomicU64,
    decode_failures: AtomicU64,
    fixes_decoded: AtomicU64,
    fixes_dropped: AtomicU64,
}

/// 进程级接入指标。
pub struct TelemetryMetrics {
    protocols: [ProtocolMetrics; ProtocolTag::COUNT],
    connections_accepted: AtomicU64,
    connections_closed: AtomicU64,
    unknown_protocol: AtomicU64,
    frame_overflows: AtomicU64,
    identity_conflicts: AtomicU64,
    active_sessions: AtomicU64,
    sessions_evicted: AtomicU64,
    records_normalized: AtomicU64,
    records_rejected: AtomicU64,
    rejected_by_reason: Mutex<BTreeMap<&'static str, u64>>,
    records_unknown_vehicle: AtomicU64,
    dropped_duplicate: AtomicU64,
    dropped_shed: AtomicU64,
    queue_depth: AtomicU64,
    write_success: AtomicU64,
    write_failure: AtomicU64,
    write_latency_ms_total: AtomicU64,
    write_latency_ms_count: AtomicU64,
    end_to_end_latency_ms_total: AtomicU64,
    end_to_end_latency_ms_count: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            protocols: Default::default(),
            connections_accepted: AtomicU64::new(0),
            connections_closed: AtomicU64::new(0),
            unknown_protocol: AtomicU64::new(0),
            frame_overflows: AtomicU64::new(0),
            identity_conflicts: AtomicU64::new(0),
            active_sessions: AtomicU64::new(0),
            sessions_evicted: AtomicU64::new(0),
            records_normalized: AtomicU64::new(0),
            records_rejected: AtomicU64::new(0),
            rejected_by_reason: Mutex::new(BTreeMap::new()),
            records_unknown_vehicle: AtomicU64::new(0),
            dropped_duplicate: AtomicU64::new(0),
            dropped_shed: AtomicU64::new(0),
            queue_depth: AtomicU64::new(0),
            write_success: AtomicU64::new(0),
            write_failure: AtomicU64::new(0),
            write_latency_ms_total: AtomicU64::new(0),
            write_latency_ms_count: AtomicU64::new(0),
            end_to_end_latency_ms_total: AtomicU64::new(0),
            end_to_end_latency_ms_count: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let protocols = ProtocolTag::ALL
            .iter()
            .map(|tag| {
                let item = &self.protocols[tag.index()];
                ProtocolCounters {
                    protocol: Some(*tag),
                    frames: item.frames.load(Ordering::Relaxed),
                    checksum_failures: item.checksum_failures.load(Ordering::Relaxed),
                    decode_failures: item.decode_failures.load(Ordering::Relaxed),
                    fixes_decoded: item.fixes_decoded.load(Ordering::Relaxed),
                    fixes_dropped: item.fixes_dropped.load(Ordering::Relaxed),
                }
            })
            .collect();
        MetricsSnapshot {
            protocols,
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            unknown_protocol: self.unknown_protocol.load(Ordering::Relaxed),
            frame_overflows: self.frame_overflows.load(Ordering::Relaxed),
            identity_conflicts: self.identity_conflicts.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            sessions_evicted: self.sessions_evicted.load(Ordering::Relaxed),
            records_normalized: self.records_normalized.load(Ordering::Relaxed),
            records_rejected: self.records_rejected.load(Ordering::Relaxed),
            rejected_by_reason: self
                .rejected_by_reason
                .lock()
                .map(|reasons| reasons.clone())
                .unwrap_or_default(),
            records_unknown_vehicle: self.records_unknown_vehicle.load(Ordering::Relaxed),
            dropped_duplicate: self.dropped_duplicate.load(Ordering::Relaxed),
            dropped_shed: self.dropped_shed.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            write_success: self.write_success.load(Ordering::Relaxed),
            write_failure: self.write_failure.load(Ordering::Relaxed),
            write_latency_ms_total: self.write_latency_ms_total.load(Ordering::Relaxed),
            write_latency_ms_count: self.write_latency_ms_count.load(Ordering::Relaxed),
            end_to_end_latency_ms_total: self.end_to_end_latency_ms_total.load(Ordering::Relaxed),
            end_to_end_latency_ms_count: self.end_to_end_latency_ms_count.load(Ordering::Relaxed),
        }
    }

    fn protocol(&self, tag: ProtocolTag) -> &ProtocolMetrics {
        &self.protocols[tag.index()]
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成新的 request_id 与 trace_id。
pub fn new_request_ids() -> RequestIds {
    RequestIds {
        request_id: uuid::Uuid::new_v4().to_string(),
        trace_id: uuid::Uuid::new_v4().to_string(),
    }
}

/// 记录完整帧数（按协议）。
pub fn record_frame(tag: ProtocolTag) {
    metrics().protocol(tag).frames.fetch_add(1, Ordering::Relaxed);
}

/// 记录校验失败帧数（按协议）。
pub fn record_checksum_failure(tag: ProtocolTag) {
    metrics()
        .protocol(tag)
        .checksum_failures
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录解码失败帧数（按协议，不含校验失败）。
pub fn record_decode_failure(tag: ProtocolTag) {
    metrics()
        .protocol(tag)
        .decode_failures
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录解出的定位点数。
pub fn record_fixes_decoded(tag: ProtocolTag, count: u64) {
    metrics()
        .protocol(tag)
        .fixes_decoded
        .fetch_add(count, Ordering::Relaxed);
}

/// 记录帧内单点解析失败而丢弃的定位点数。
pub fn record_fix_dropped(tag: ProtocolTag) {
    metrics()
        .protocol(tag)
        .fixes_dropped
        .fetch_add(1, Ordering::Relaxed);
}

pub fn record_connection_accepted() {
    metrics()
        .connections_accepted
        .fetch_add(1, Ordering::Relaxed);
}

pub fn record_connection_closed() {
    metrics().connections_closed.fetch_add(1, Ordering::Relaxed);
}

/// 记录协议识别失败而关闭的连接数。
pub fn record_unknown_protocol() {
    metrics().unknown_protocol.fetch_add(1, Ordering::Relaxed);
}

/// 记录分帧缓冲超限次数。
pub fn record_frame_overflow() {
    metrics().frame_overflows.fetch_add(1, Ordering::Relaxed);
}

/// 记录会话内设备身份冲突次数。
pub fn record_identity_conflict() {
    metrics().identity_conflicts.fetch_add(1, Ordering::Relaxed);
}

/// 设置当前活跃会话数（由会话回收任务刷新）。
pub fn set_active_sessions(count: u64) {
    metrics().active_sessions.store(count, Ordering::Relaxed);
}

pub fn record_sessions_evicted(count: u64) {
    metrics()
        .sessions_evicted
        .fetch_add(count, Ordering::Relaxed);
}

pub fn record_normalized() {
    metrics().records_normalized.fetch_add(1, Ordering::Relaxed);
}

/// 记录规范化拒绝（按原因码分组）。
pub fn record_rejected(reason: &'static str) {
    let metrics = metrics();
    metrics.records_rejected.fetch_add(1, Ordering::Relaxed);
    if let Ok(mut reasons) = metrics.rejected_by_reason.lock() {
        *reasons.entry(reason).or_default() += 1;
    }
}

/// 记录未能解析到车辆的记录数（记录仍保留）。
pub fn record_unknown_vehicle() {
    metrics()
        .records_unknown_vehicle
        .fetch_add(1, Ordering::Relaxed);
}

pub fn record_dropped_duplicate() {
    metrics().dropped_duplicate.fetch_add(1, Ordering::Relaxed);
}

/// 记录队列满时丢弃最旧记录的条数。
pub fn record_dropped_shed() {
    metrics().dropped_shed.fetch_add(1, Ordering::Relaxed);
}

pub fn queue_depth_add(count: u64) {
    metrics().queue_depth.fetch_add(count, Ordering::Relaxed);
}

pub fn queue_depth_sub(count: u64) {
    let depth = &metrics().queue_depth;
    let _ = depth.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
        Some(current.saturating_sub(count))
    });
}

pub fn record_write_success(count: u64) {
    metrics().write_success.fetch_add(count, Ordering::Relaxed);
}

pub fn record_write_failure(count: u64) {
    metrics().write_failure.fetch_add(count, Ordering::Relaxed);
}

/// 记录写入延迟（毫秒）。
pub fn record_write_latency_ms(latency_ms: u64) {
    let metrics = metrics();
    metrics
        .write_latency_ms_total
        .fetch_add(latency_ms, Ordering::Relaxed);
    metrics
        .write_latency_ms_count
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录端到端延迟（接收到写入完成，毫秒）。
pub fn record_end_to_end_latency_ms(latency_ms: u64) {
    let metrics = metrics();
    metrics
        .end_to_end_latency_ms_total
        .fetch_add(latency_ms, Ordering::Relaxed);
    metrics
        .end_to_end_latency_ms_count
        .fetch_add(1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_counters_are_kept_per_tag() {
        record_frame(ProtocolTag::Ruptela);
        record_checksum_failure(ProtocolTag::Ruptela);
        record_fixes_decoded(ProtocolTag::Ruptela, 3);
        let snapshot = metrics().snapshot();
        let ruptela = snapshot
            .protocols
            .iter()
            .find(|item| item.protocol == Some(ProtocolTag::Ruptela))
            .unwrap();
        assert!(ruptela.frames >= 1);
        assert!(ruptela.checksum_failures >= 1);
        assert!(ruptela.fixes_decoded >= 3);
        assert_eq!(snapshot.protocols.len(), ProtocolTag::COUNT);
    }

    #[test]
    fn rejections_are_grouped_by_reason() {
        record_rejected("implausible_speed");
        record_rejected("implausible_speed");
        let snapshot = metrics().snapshot();
        assert!(snapshot.rejected_by_reason["implausible_speed"] >= 2);
        assert!(snapshot.records_rejected >= 2);
    }

    #[test]
    fn queue_depth_never_underflows() {
        queue_depth_sub(u64::MAX);
        assert_eq!(metrics().snapshot().queue_depth, 0);
    }

    #[test]
    fn request_ids_are_unique() {
        let first = new_request_ids();
        let second = new_request_ids();
        assert_ne!(first.request_id, second.request_id);
        assert_ne!(first.request_id, first.trace_id);
    }
}
