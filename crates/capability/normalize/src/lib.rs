//! DecodedFix -> TelemetryRecord 的规范化。
//!
//! 单位换算已在解码器完成，这里只做三件事：解析车辆、校验数据质量、打上接收时间。
//! 设备上报时间原样保留，作为下游排序键。

mod directory;

pub use directory::{CachedDeviceDirectory, DeviceDirectory, StorageDeviceDirectory};

use domain::{DecodedFix, ProtocolTag, TelemetryRecord};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// 规范化错误。
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("device directory error: {0}")]
    Directory(String),
}

/// 拒绝原因码。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    NonFinite,
    LatitudeOutOfRange,
    LongitudeOutOfRange,
    NullIslandInvalid,
    ImplausibleSpeed,
    NegativeSpeed,
    InvalidTimestamp,
    FutureTimestamp,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::NonFinite => "non_finite",
            RejectReason::LatitudeOutOfRange => "latitude_out_of_range",
            RejectReason::LongitudeOutOfRange => "longitude_out_of_range",
            RejectReason::NullIslandInvalid => "null_island_invalid",
            RejectReason::ImplausibleSpeed => "implausible_speed",
            RejectReason::NegativeSpeed => "negative_speed",
            RejectReason::InvalidTimestamp => "invalid_timestamp",
            RejectReason::FutureTimestamp => "future_timestamp",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 被拒绝的定位点（数据质量问题，不影响连接）。
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{protocol} fix from {device_id} rejected: {reason}")]
pub struct Rejection {
    pub device_id: String,
    pub protocol: ProtocolTag,
    pub timestamp_ms: i64,
    pub reason: RejectReason,
}

/// 校验阈值。
#[derive(Debug, Clone, Copy)]
pub struct NormalizerConfig {
    pub max_speed_kmh: f64,
    /// 设备时间允许超前接收时间的最大值
    pub max_future_skew_ms: i64,
    /// 单次车辆解析的上限，超时按目录不可用处理
    pub directory_timeout: Duration,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            max_speed_kmh: 300.0,
            max_future_skew_ms: 86_400_000,
            directory_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Clone)]
pub struct Normalizer {
    directory: Arc<dyn DeviceDirectory>,
    config: NormalizerConfig,
}

impl Normalizer {
    pub fn new(directory: Arc<dyn DeviceDirectory>, config: NormalizerConfig) -> Self {
        Self { directory, config }
    }

    pub fn config(&self) -> NormalizerConfig {
        self.config
    }

    /// 规范化单个定位点。
    ///
    /// 车辆未绑定或目录不可用时记录保留，`vehicle_id` 为空。
    pub async fn normalize(
        &self,
        fix: DecodedFix,
        received_at_ms: i64,
    ) -> Result<TelemetryRecord, Rejection> {
        if let Err(reason) = self.validate(&fix, received_at_ms) {
            return Err(Rejection {
                device_id: fix.device_id,
                protocol: fix.protocol,
                timestamp_ms: fix.timestamp_ms,
                reason,
            });
        }

        let vehicle_id = match self.resolve_vehicle(&fix.device_id).await {
            Ok(vehicle_id) => vehicle_id,
            Err(err) => {
                warn!(
                    target: "fleet.ingest",
                    device_id = %fix.device_id,
                    protocol = %fix.protocol,
                    error = %err,
                    "device_directory_failed"
                );
                None
            }
        };

        Ok(TelemetryRecord {
            device_id: fix.device_id,
            vehicle_id,
            protocol: fix.protocol,
            timestamp_ms: fix.timestamp_ms,
            received_at_ms,
            lat: fix.latitude,
            lng: fix.longitude,
            speed_kmh: fix.speed_kmh,
            heading_deg: wrap_heading(fix.heading_deg),
            altitude_m: fix.altitude_m.filter(|value| value.is_finite()),
            gps_valid: fix.gps_valid,
            hdop: fix.hdop.filter(|value| value.is_finite()),
            satellites: fix.satellites,
            ignition: fix.ignition,
            fuel_percent: fix
                .fuel_percent
                .filter(|value| value.is_finite())
                .map(|value| value.clamp(0.0, 100.0)),
            alarm_code: fix.alarm_code,
            odometer_m: fix.odometer_m.filter(|value| value.is_finite()),
            sequence_no: fix.sequence_no,
        })
    }

    async fn resolve_vehicle(&self, device_id: &str) -> Result<Option<String>, NormalizeError> {
        let timeout = self.config.directory_timeout;
        tokio::time::timeout(timeout, self.directory.resolve(device_id))
            .await
            .map_err(|_| {
                NormalizeError::Directory(format!("lookup timed out after {}ms", timeout.as_millis()))
            })?
    }

    fn validate(&self, fix: &DecodedFix, received_at_ms: i64) -> Result<(), RejectReason> {
        let (lat, lng) = (fix.latitude, fix.longitude);
        if !lat.is_finite() || !lng.is_finite() || !fix.speed_kmh.is_finite() {
            return Err(RejectReason::NonFinite);
        }
        if !(-90.0..=90.0).contains(&lat) {
            return Err(RejectReason::LatitudeOutOfRange);
        }
        if !(-180.0..=180.0).contains(&lng) {
            return Err(RejectReason::LongitudeOutOfRange);
        }
        if !fix.gps_valid && lat == 0.0 && lng == 0.0 {
            return Err(RejectReason::NullIslandInvalid);
        }
        if fix.speed_kmh < 0.0 {
            return Err(RejectReason::NegativeSpeed);
        }
        if fix.speed_kmh > self.config.max_speed_kmh {
            return Err(RejectReason::ImplausibleSpeed);
        }
        if fix.timestamp_ms <= 0 {
            return Err(RejectReason::InvalidTimestamp);
        }
        if fix.timestamp_ms > received_at_ms.saturating_add(self.config.max_future_skew_ms) {
            return Err(RejectReason::FutureTimestamp);
        }
        Ok(())
    }
}

/// 航向折算到 [0, 360)；非有限值记为 0
fn wrap_heading(heading: f64) -> f64 {
    if !heading.is_finite() {
        return 0.0;
    }
    let wrapped = heading.rem_euclid(360.0);
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    const RECEIVED_AT: i64 = 1_710_498_040_000;

    struct FixedDirectory(Option<&'static str>);

    #[async_trait]
    impl DeviceDirectory for FixedDirectory {
        async fn resolve(&self, _device_id: &str) -> Result<Option<String>, NormalizeError> {
            Ok(self.0.map(str::to_string))
        }
    }

    struct BrokenDirectory;

    #[async_trait]
    impl DeviceDirectory for BrokenDirectory {
        async fn resolve(&self, _device_id: &str) -> Result<Option<String>, NormalizeError> {
            Err(NormalizeError::Directory("timeout".to_string()))
        }
    }

    /// 永不返回的目录（模拟卡住的后端）
    struct StalledDirectory;

    #[async_trait]
    impl DeviceDirectory for StalledDirectory {
        async fn resolve(&self, _device_id: &str) -> Result<Option<String>, NormalizeError> {
            std::future::pending().await
        }
    }

    fn normalizer(directory: impl DeviceDirectory + 'static) -> Normalizer {
        Normalizer::new(Arc::new(directory), NormalizerConfig::default())
    }

    fn fix() -> DecodedFix {
        let mut fix = DecodedFix::new(
            "864180030000001",
            ProtocolTag::Gt06,
            1_710_498_030_000,
            22.546,
            114.0579,
        );
        fix.speed_kmh = 60.0;
        fix.heading_deg = 90.0;
        fix.sequence_no = Some(2);
        fix
    }

    async fn reason_for(fix: DecodedFix) -> RejectReason {
        normalizer(FixedDirectory(None))
            .normalize(fix, RECEIVED_AT)
            .await
            .unwrap_err()
            .reason
    }

    #[tokio::test]
    async fn resolves_vehicle_and_keeps_device_time() {
        let record = normalizer(FixedDirectory(Some("truck-17")))
            .normalize(fix(), RECEIVED_AT)
            .await
            .unwrap();
        assert_eq!(record.vehicle_id.as_deref(), Some("truck-17"));
        assert_eq!(record.timestamp_ms, 1_710_498_030_000);
        assert_eq!(record.received_at_ms, RECEIVED_AT);
        assert_eq!(record.lat, 22.546);
        assert_eq!(record.sequence_no, Some(2));
    }

    #[tokio::test]
    async fn unknown_vehicle_is_kept() {
        let record = normalizer(FixedDirectory(None))
            .normalize(fix(), RECEIVED_AT)
            .await
            .unwrap();
        assert!(record.vehicle_id.is_none());

        let record = normalizer(BrokenDirectory)
            .normalize(fix(), RECEIVED_AT)
            .await
            .unwrap();
        assert!(record.vehicle_id.is_none());
    }

    #[tokio::test]
    async fn stalled_directory_times_out_without_vehicle() {
        let normalizer = Normalizer::new(
            Arc::new(StalledDirectory),
            NormalizerConfig {
                directory_timeout: Duration::from_millis(20),
                ..NormalizerConfig::default()
            },
        );
        let record = tokio::time::timeout(
            Duration::from_secs(2),
            normalizer.normalize(fix(), RECEIVED_AT),
        )
        .await
        .expect("normalize must not block on the directory")
        .unwrap();
        assert!(record.vehicle_id.is_none());
        assert_eq!(record.device_id, "864180030000001");
    }

    #[tokio::test]
    async fn coordinate_rejections() {
        let mut bad = fix();
        bad.latitude = 91.0;
        assert_eq!(reason_for(bad).await, RejectReason::LatitudeOutOfRange);

        let mut bad = fix();
        bad.longitude = -180.5;
        assert_eq!(reason_for(bad).await, RejectReason::LongitudeOutOfRange);

        let mut bad = fix();
        bad.latitude = f64::NAN;
        assert_eq!(reason_for(bad).await, RejectReason::NonFinite);

        let mut bad = fix();
        bad.latitude = 0.0;
        bad.longitude = 0.0;
        bad.gps_valid = false;
        assert_eq!(reason_for(bad).await, RejectReason::NullIslandInvalid);
    }

    #[tokio::test]
    async fn null_island_with_valid_fix_is_kept() {
        let mut fix = fix();
        fix.latitude = 0.0;
        fix.longitude = 0.0;
        assert!(
            normalizer(FixedDirectory(None))
                .normalize(fix, RECEIVED_AT)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn speed_and_time_rejections() {
        let mut bad = fix();
        bad.speed_kmh = 301.0;
        assert_eq!(reason_for(bad).await, RejectReason::ImplausibleSpeed);

        let mut bad = fix();
        bad.speed_kmh = -1.0;
        assert_eq!(reason_for(bad).await, RejectReason::NegativeSpeed);

        let mut bad = fix();
        bad.timestamp_ms = 0;
        assert_eq!(reason_for(bad).await, RejectReason::InvalidTimestamp);

        let mut bad = fix();
        bad.timestamp_ms = RECEIVED_AT + 86_400_001;
        assert_eq!(reason_for(bad).await, RejectReason::FutureTimestamp);
    }

    #[tokio::test]
    async fn rejection_carries_identity_for_audit() {
        let mut bad = fix();
        bad.speed_kmh = 999.0;
        let rejection = normalizer(FixedDirectory(None))
            .normalize(bad, RECEIVED_AT)
            .await
            .unwrap_err();
        assert_eq!(rejection.device_id, "864180030000001");
        assert_eq!(rejection.protocol, ProtocolTag::Gt06);
        assert_eq!(rejection.reason.as_str(), "implausible_speed");
    }

    #[tokio::test]
    async fn optional_fields_are_cleaned() {
        let mut fix = fix();
        fix.heading_deg = -90.0;
        fix.fuel_percent = Some(104.0);
        fix.hdop = Some(f64::INFINITY);
        let record = normalizer(FixedDirectory(None))
            .normalize(fix, RECEIVED_AT)
            .await
            .unwrap();
        assert_eq!(record.heading_deg, 270.0);
        assert_eq!(record.fuel_percent, Some(100.0));
        assert!(record.hdop.is_none());
    }

    #[test]
    fn heading_wraps_into_range() {
        assert_eq!(wrap_heading(360.0), 0.0);
        assert_eq!(wrap_heading(725.0), 5.0);
        assert_eq!(wrap_heading(f64::NAN), 0.0);
    }
}
