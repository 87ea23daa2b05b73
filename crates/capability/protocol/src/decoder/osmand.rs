//! OsmAnd / Traccar Client 查询串协议
//!
//! HTTP 推送（GET 查询串或 POST 表单）与 TCP 按行上报共用此解码器；
//! 应答由传输层完成（HTTP 状态码）。

use super::{ProtocolDecoder, knots_to_kmh};
use crate::error::DecodeError;
use crate::types::{Decoded, SessionContext};
use chrono::{DateTime, NaiveDateTime};
use domain::{DecodedFix, ProtocolTag, now_epoch_ms};
use std::collections::HashMap;

/// 10^12 毫秒约为 2001 年，小于该值的数字时间戳按秒处理
const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

pub struct OsmandDecoder;

impl ProtocolDecoder for OsmandDecoder {
    fn protocol(&self) -> ProtocolTag {
        ProtocolTag::Osmand
    }

    fn decode(&self, frame: &[u8], _ctx: &SessionContext) -> Result<Decoded, DecodeError> {
        let query = strip_request_prefix(frame);
        let params: HashMap<String, String> = form_urlencoded::parse(query)
            .map(|(key, value)| (key.to_ascii_lowercase(), value.into_owned()))
            .collect();
        let get = |keys: &[&str]| {
            keys.iter()
                .find_map(|key| params.get(*key))
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
        };

        let device_id = get(&["id", "deviceid"])
            .ok_or_else(|| DecodeError::malformed("missing id"))?
            .to_string();

        let (latitude, longitude) = match (get(&["lat"]), get(&["lon"]), get(&["location"])) {
            (Some(lat), Some(lon), _) => (number(lat, "lat")?, number(lon, "lon")?),
            (_, _, Some(location)) => {
                let (lat, lon) = location
                    .split_once(',')
                    .ok_or_else(|| DecodeError::Malformed(format!("invalid location: {location:?}")))?;
                (number(lat, "lat")?, number(lon, "lon")?)
            }
            _ => return Err(DecodeError::malformed("missing coordinates")),
        };

        let timestamp_ms = match get(&["timestamp"]) {
            Some(value) => timestamp(value)?,
            None => now_epoch_ms(),
        };

        let mut fix = DecodedFix::new(
            device_id.clone(),
            ProtocolTag::Osmand,
            timestamp_ms,
            latitude,
            longitude,
        );
        if let Some(speed) = get(&["speed"]) {
            fix.speed_kmh = knots_to_kmh(number(speed, "speed")?);
        }
        if let Some(bearing) = get(&["bearing", "heading"]) {
            fix.heading_deg = number(bearing, "bearing")?;
        }
        fix.altitude_m = get(&["altitude"]).and_then(|value| value.parse().ok());
        fix.hdop = get(&["hdop"]).and_then(|value| value.parse().ok());
        fix.satellites = get(&["sat", "satellites"]).and_then(|value| value.parse().ok());
        if let Some(valid) = get(&["valid"]) {
            fix.gps_valid = flag(valid);
        }
        fix.ignition = get(&["ignition"]).map(flag);
        fix.fuel_percent = get(&["fuel"]).and_then(|value| value.parse().ok());
        fix.odometer_m = get(&["odometer", "mileage"]).and_then(|value| value.parse().ok());
        fix.alarm_code = get(&["alarm"]).map(str::to_string);

        Ok(Decoded::with_fixes(vec![fix]).identity(device_id))
    }
}

/// 去掉可能存在的 `/?` 或 `?` 前缀以及行尾空白
fn strip_request_prefix(frame: &[u8]) -> &[u8] {
    let frame = frame.trim_ascii();
    let frame = frame.strip_prefix(b"/").unwrap_or(frame);
    frame.strip_prefix(b"?").unwrap_or(frame)
}

fn number(value: &str, name: &str) -> Result<f64, DecodeError> {
    value
        .parse::<f64>()
        .map_err(|_| DecodeError::Malformed(format!("invalid {name}: {value:?}")))
}

fn flag(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on")
}

/// 秒 / 毫秒 / RFC 3339 / `yyyy-MM-dd HH:mm:ss`（UTC）
fn timestamp(value: &str) -> Result<i64, DecodeError> {
    if let Ok(number) = value.parse::<i64>() {
        return Ok(if number >= MILLIS_THRESHOLD {
            number
        } else {
            number.saturating_mul(1000)
        });
    }
    if let Ok(datetime) = DateTime::parse_from_rfc3339(value) {
        return Ok(datetime.timestamp_millis());
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .map(|datetime| datetime.and_utc().timestamp_millis())
        .map_err(|_| DecodeError::Malformed(format!("invalid timestamp: {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(query: &str) -> Result<Decoded, DecodeError> {
        OsmandDecoder.decode(query.as_bytes(), &SessionContext::default())
    }

    #[test]
    fn full_query() {
        let decoded = decode(
            "id=123456&lat=52.5200&lon=13.4050&timestamp=1710498030&speed=10.0&bearing=45&altitude=34&hdop=1.2&sat=8&valid=true&ignition=1&fuel=62.5&odometer=1500",
        )
        .unwrap();
        assert_eq!(decoded.update.identity.as_deref(), Some("123456"));
        let fix = &decoded.fixes[0];
        assert_eq!(fix.timestamp_ms, 1_710_498_030_000);
        assert_eq!(fix.latitude, 52.52);
        assert!((fix.speed_kmh - 18.52).abs() < 1e-9);
        assert_eq!(fix.heading_deg, 45.0);
        assert_eq!(fix.satellites, Some(8));
        assert_eq!(fix.hdop, Some(1.2));
        assert_eq!(fix.ignition, Some(true));
        assert_eq!(fix.fuel_percent, Some(62.5));
        assert_eq!(fix.odometer_m, Some(1500.0));
        assert!(decoded.ack.is_none());
    }

    #[test]
    fn location_pair_and_text_timestamps() {
        let decoded =
            decode("/?deviceid=abc&location=52.52%2C13.405&timestamp=2024-03-15%2010%3A20%3A30")
                .unwrap();
        let fix = &decoded.fixes[0];
        assert_eq!(fix.device_id, "abc");
        assert_eq!(fix.longitude, 13.405);
        assert_eq!(fix.timestamp_ms, 1_710_498_030_000);

        let rfc = decode("id=abc&lat=1&lon=2&timestamp=2024-03-15T10:20:30Z").unwrap();
        assert_eq!(rfc.fixes[0].timestamp_ms, 1_710_498_030_000);

        let millis = decode("id=abc&lat=1&lon=2&timestamp=1710498030123").unwrap();
        assert_eq!(millis.fixes[0].timestamp_ms, 1_710_498_030_123);
    }

    #[test]
    fn missing_timestamp_uses_ingestion_time() {
        let before = now_epoch_ms();
        let decoded = decode("id=abc&lat=1&lon=2").unwrap();
        assert!(decoded.fixes[0].timestamp_ms >= before);
    }

    #[test]
    fn missing_id_or_coordinates_fails() {
        assert!(decode("lat=1&lon=2").is_err());
        assert!(decode("id=abc&lat=1").is_err());
        assert!(decode("id=abc&lat=x&lon=2").is_err());
    }
}
