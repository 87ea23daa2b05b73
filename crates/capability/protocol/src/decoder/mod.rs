//! 协议解码器
//!
//! 每个 [`ProtocolTag`] 对应一个无状态解码器，分派为封闭的 `match`，
//! 新增协议时编译器会检查所有分支。

mod gt06;
mod h02;
mod meitrack;
mod osmand;
mod queclink;
mod ruptela;
mod teltonika;
mod tk103;
mod ytwl;

pub use gt06::Gt06Decoder;
pub use h02::H02Decoder;
pub use meitrack::MeitrackDecoder;
pub use osmand::OsmandDecoder;
pub use queclink::QueclinkDecoder;
pub use ruptela::RuptelaDecoder;
pub use teltonika::TeltonikaDecoder;
pub use tk103::Tk103Decoder;
pub use ytwl::YtwlDecoder;

use crate::error::DecodeError;
use crate::types::{Decoded, SessionContext};
use chrono::NaiveDate;
use domain::ProtocolTag;
use std::str::FromStr;

/// 协议解码器
///
/// 相同的帧字节与相同的会话上下文总是得到相同的结果。
pub trait ProtocolDecoder: Send + Sync {
    fn protocol(&self) -> ProtocolTag;

    fn decode(&self, frame: &[u8], ctx: &SessionContext) -> Result<Decoded, DecodeError>;
}

/// 按协议取解码器
pub fn decoder_for(tag: ProtocolTag) -> Option<&'static dyn ProtocolDecoder> {
    match tag {
        ProtocolTag::Gt06 => Some(&Gt06Decoder),
        ProtocolTag::Tk103 => Some(&Tk103Decoder),
        ProtocolTag::H02 => Some(&H02Decoder),
        ProtocolTag::Osmand => Some(&OsmandDecoder),
        ProtocolTag::Teltonika => Some(&TeltonikaDecoder),
        ProtocolTag::Queclink => Some(&QueclinkDecoder),
        ProtocolTag::Ruptela => Some(&RuptelaDecoder),
        ProtocolTag::Meitrack => Some(&MeitrackDecoder),
        ProtocolTag::Ytwl => Some(&YtwlDecoder),
        ProtocolTag::Unknown => None,
    }
}

const KMH_PER_KNOT: f64 = 1.852;

pub(crate) fn knots_to_kmh(knots: f64) -> f64 {
    knots * KMH_PER_KNOT
}

/// 文本帧转 `&str`
pub(crate) fn ascii(frame: &[u8]) -> Result<&str, DecodeError> {
    std::str::from_utf8(frame).map_err(|_| DecodeError::malformed("frame is not valid text"))
}

/// 解析单个字段，失败时带上字段名
pub(crate) fn field<T: FromStr>(value: &str, name: &str) -> Result<T, DecodeError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| DecodeError::Malformed(format!("invalid {name}: {value:?}")))
}

/// 可选字段：空串视为缺省
pub(crate) fn optional_field<T: FromStr>(value: Option<&str>) -> Option<T> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .and_then(|value| value.parse::<T>().ok())
}

/// 取第 `index` 个逗号字段，缺失即截断
pub(crate) fn nth<'a>(fields: &[&'a str], index: usize) -> Result<&'a str, DecodeError> {
    fields.get(index).copied().ok_or(DecodeError::Truncated)
}

/// NMEA `(d)ddmm.mmmm` + 半球 → 带符号十进制度
pub(crate) fn nmea_coordinate(value: &str, hemisphere: &str) -> Result<f64, DecodeError> {
    let raw: f64 = field(value, "coordinate")?;
    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    if minutes >= 60.0 {
        return Err(DecodeError::Malformed(format!("invalid coordinate: {value:?}")));
    }
    let decimal = degrees + minutes / 60.0;
    match hemisphere.trim() {
        "N" | "E" => Ok(decimal),
        "S" | "W" => Ok(-decimal),
        other => Err(DecodeError::Malformed(format!("invalid hemisphere: {other:?}"))),
    }
}

/// 十进制度 + 半球
pub(crate) fn hemisphere_coordinate(value: &str, hemisphere: &str) -> Result<f64, DecodeError> {
    let decimal: f64 = field(value, "coordinate")?;
    match hemisphere.trim() {
        "N" | "E" => Ok(decimal),
        "S" | "W" => Ok(-decimal),
        other => Err(DecodeError::Malformed(format!("invalid hemisphere: {other:?}"))),
    }
}

/// UTC 日历时间 → 毫秒
pub(crate) fn utc_millis(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
    millis: u32,
) -> Result<i64, DecodeError> {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_milli_opt(hour, minute, second, millis))
        .map(|datetime| datetime.and_utc().timestamp_millis())
        .ok_or_else(|| {
            DecodeError::Malformed(format!(
                "invalid datetime: {year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
            ))
        })
}

/// 解析定长纯数字子串，如 `YYMMDDhhmmss` 中的各段
pub(crate) fn digits(text: &str, start: usize, len: usize) -> Result<u32, DecodeError> {
    let part = text
        .get(start..start + len)
        .ok_or_else(|| DecodeError::Malformed(format!("short datetime: {text:?}")))?;
    if !part.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(DecodeError::Malformed(format!("invalid datetime: {text:?}")));
    }
    field(part, "datetime")
}

/// `YYMMDD` + `hhmmss[.sss]` → 毫秒
pub(crate) fn yymmdd_hhmmss(date: &str, time: &str) -> Result<i64, DecodeError> {
    let millis = match time.split_once('.') {
        Some((_, fraction)) if !fraction.is_empty() => {
            let fraction = &fraction[..fraction.len().min(3)];
            let scale = 10u32.pow(3 - fraction.len() as u32);
            field::<u32>(fraction, "milliseconds")? * scale
        }
        _ => 0,
    };
    utc_millis(
        2000 + digits(date, 0, 2)? as i32,
        digits(date, 2, 2)?,
        digits(date, 4, 2)?,
        digits(time, 0, 2)?,
        digits(time, 2, 2)?,
        digits(time, 4, 2)?,
        millis,
    )
}

/// `YYMMDDhhmmss` → 毫秒
pub(crate) fn compact_datetime(text: &str) -> Result<i64, DecodeError> {
    if text.len() < 12 {
        return Err(DecodeError::Malformed(format!("short datetime: {text:?}")));
    }
    yymmdd_hhmmss(&text[..6], &text[6..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_known_protocol_has_a_decoder() {
        for tag in ProtocolTag::ALL {
            match decoder_for(tag) {
                Some(decoder) => assert_eq!(decoder.protocol(), tag),
                None => assert_eq!(tag, ProtocolTag::Unknown),
            }
        }
    }

    #[test]
    fn nmea_coordinates() {
        let lat = nmea_coordinate("2232.7600", "N").unwrap();
        assert!((lat - 22.546).abs() < 1e-9);
        let lng = nmea_coordinate("11403.4740", "W").unwrap();
        assert!((lng + 114.0579).abs() < 1e-9);
        assert!(nmea_coordinate("2275.0000", "N").is_err());
        assert!(nmea_coordinate("2232.7600", "X").is_err());
    }

    #[test]
    fn datetime_helpers() {
        let ms = yymmdd_hhmmss("240315", "102030.250").unwrap();
        assert_eq!(ms, 1_710_498_030_250);
        assert_eq!(compact_datetime("240315102030").unwrap(), 1_710_498_030_000);
        assert!(compact_datetime("241315102030").is_err());
        assert!(compact_datetime("2403").is_err());
    }
}
