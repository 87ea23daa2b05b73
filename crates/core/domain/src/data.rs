use crate::ProtocolTag;
use serde::{Deserialize, Serialize};

/// 协议解码后的单个定位点（协议原生字段，已换算为标准单位）。
///
/// 坐标为带符号十进制度，速度为 km/h，时间为 UTC 毫秒。
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFix {
    pub device_id: String,
    pub protocol: ProtocolTag,
    pub timestamp_ms: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kmh: f64,
    pub heading_deg: f64,
    pub altitude_m: Option<f64>,
    pub satellites: Option<u8>,
    pub hdop: Option<f64>,
    pub gps_valid: bool,
    pub ignition: Option<bool>,
    /// 数字输入位图（bit0 = 输入 1）。
    pub digital_inputs: Option<u32>,
    pub fuel_percent: Option<f64>,
    pub alarm_code: Option<String>,
    pub odometer_m: Option<f64>,
    pub sequence_no: Option<u64>,
}

impl DecodedFix {
    /// 以必填字段构造，其余字段为空。
    pub fn new(
        device_id: impl Into<String>,
        protocol: ProtocolTag,
        timestamp_ms: i64,
        latitude: f64,
        longitude: f64,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            protocol,
            timestamp_ms,
            latitude,
            longitude,
            speed_kmh: 0.0,
            heading_deg: 0.0,
            altitude_m: None,
            satellites: None,
            hdop: None,
            gps_valid: true,
            ignition: None,
            digital_inputs: None,
            fuel_percent: None,
            alarm_code: None,
            odometer_m: None,
            sequence_no: None,
        }
    }
}

/// 规范化后的轨迹记录（下游统一消费格式）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub device_id: String,
    pub vehicle_id: Option<String>,
    pub protocol: ProtocolTag,
    /// 终端上报时间（UTC 毫秒），原样保留作为排序键。
    pub timestamp_ms: i64,
    /// 网关接收时间（UTC 毫秒）。
    pub received_at_ms: i64,
    pub lat: f64,
    pub lng: f64,
    pub speed_kmh: f64,
    pub heading_deg: f64,
    pub altitude_m: Option<f64>,
    pub gps_valid: bool,
    pub hdop: Option<f64>,
    pub satellites: Option<u8>,
    pub ignition: Option<bool>,
    pub fuel_percent: Option<f64>,
    pub alarm_code: Option<String>,
    pub odometer_m: Option<f64>,
    pub sequence_no: Option<u64>,
}

/// 需回写给终端的协议应答字节。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckFrame {
    pub bytes: Vec<u8>,
}

impl AckFrame {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn text(text: &str) -> Self {
        Self::new(text.as_bytes().to_vec())
    }
}
