//! Queclink `@Track` 文本协议，帧以 `$` 结尾
//!
//! 位置报告：`+RESP:GTxxx,<ver>,<imei>,<name>,<ext power>,<report type>,<N>,`
//! 后接 N 组 12 字段定位数据，尾部为 `<send time>,<count hex>`。
//! `+BUFF:` 为终端补传的历史数据，格式相同。

use super::{ProtocolDecoder, ascii, digits, field, nth, utc_millis};
use crate::error::DecodeError;
use crate::types::{Decoded, DecoderState, QueclinkState, SessionContext};
use domain::{AckFrame, DecodedFix, ProtocolTag};

/// 每个定位点的字段数
const FIX_FIELDS: usize = 12;
/// 第一个定位点字段的下标
const FIRST_FIX: usize = 7;

pub struct QueclinkDecoder;

impl ProtocolDecoder for QueclinkDecoder {
    fn protocol(&self) -> ProtocolTag {
        ProtocolTag::Queclink
    }

    fn decode(&self, frame: &[u8], _ctx: &SessionContext) -> Result<Decoded, DecodeError> {
        let text = ascii(frame)?;
        let fields: Vec<&str> = text.split(',').collect();
        let (kind, message) = fields[0]
            .split_once(':')
            .ok_or_else(|| DecodeError::malformed("missing queclink header"))?;
        let version = nth(&fields, 1)?;
        let imei = nth(&fields, 2)?.trim();
        if imei.is_empty() {
            return Err(DecodeError::malformed("empty device id"));
        }
        let state = DecoderState::Queclink(QueclinkState {
            protocol_version: Some(version.to_string()),
        });
        let decoded = Decoded::empty().identity(imei).state(state);

        match kind {
            "+ACK" if message == "GTHBD" => {
                let count = nth(&fields, fields.len() - 1)?;
                let ack = format!("+SACK:GTHBD,{version},{count}$");
                Ok(decoded.ack(AckFrame::text(&ack)))
            }
            "+ACK" => Ok(decoded),
            "+RESP" | "+BUFF" => report(decoded, imei, message, &fields),
            other => Err(DecodeError::Unsupported(format!("queclink {other}"))),
        }
    }
}

fn report(
    mut decoded: Decoded,
    imei: &str,
    message: &str,
    fields: &[&str],
) -> Result<Decoded, DecodeError> {
    let count: usize = field(nth(fields, FIRST_FIX - 1)?, "fix count")?;
    // 数量来自终端，先按实际字段数校验再切片
    let available = fields.len().saturating_sub(FIRST_FIX + 2) / FIX_FIELDS;
    if count > available {
        return Err(DecodeError::Truncated);
    }
    let sequence_no = u64::from_str_radix(fields[fields.len() - 1].trim(), 16).ok();

    for index in 0..count {
        let start = FIRST_FIX + index * FIX_FIELDS;
        match fix(imei, &fields[start..start + FIX_FIELDS]) {
            Ok(mut fix) => {
                fix.sequence_no = sequence_no;
                apply_message(&mut fix, message);
                decoded.fixes.push(fix);
            }
            Err(err) => decoded.drop_fix(index, err.to_string()),
        }
    }
    Ok(decoded)
}

/// `<accuracy>,<speed>,<azimuth>,<altitude>,<lng>,<lat>,<YYYYMMDDhhmmss>,<mcc>,<mnc>,<lac>,<cell>,<reserved>`
fn fix(imei: &str, fields: &[&str]) -> Result<DecodedFix, DecodeError> {
    let longitude: f64 = field(fields[4], "longitude")?;
    let latitude: f64 = field(fields[5], "latitude")?;
    let time = fields[6].trim();
    let timestamp_ms = utc_millis(
        digits(time, 0, 4)? as i32,
        digits(time, 4, 2)?,
        digits(time, 6, 2)?,
        digits(time, 8, 2)?,
        digits(time, 10, 2)?,
        digits(time, 12, 2)?,
        0,
    )?;
    let mut fix = DecodedFix::new(imei, ProtocolTag::Queclink, timestamp_ms, latitude, longitude);
    let accuracy: u8 = field(fields[0], "accuracy").unwrap_or(0);
    fix.gps_valid = accuracy > 0;
    if accuracy > 0 {
        fix.hdop = Some(f64::from(accuracy));
    }
    fix.speed_kmh = field(fields[1], "speed").unwrap_or_default();
    fix.heading_deg = field(fields[2], "azimuth").unwrap_or_default();
    fix.altitude_m = field(fields[3], "altitude").ok();
    Ok(fix)
}

fn apply_message(fix: &mut DecodedFix, message: &str) {
    match message {
        "GTSOS" => fix.alarm_code = Some("sos".to_string()),
        "GTSPD" => fix.alarm_code = Some("overspeed".to_string()),
        "GTGEO" => fix.alarm_code = Some("geofence".to_string()),
        "GTPNL" => fix.alarm_code = Some("panic".to_string()),
        "GTIGN" => fix.ignition = Some(true),
        "GTIGF" => fix.ignition = Some(false),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_FIXES: &str = "+RESP:GTFRI,C30203,860599001234567,GL300,0,0,2,1,4.3,92,70.0,121.354335,31.222073,20240315102030,0460,0000,18d8,6141,00,0,4.3,92,70.0,121.354336,31.222074,20240315102040,0460,0000,18d8,6141,00,20240315102045,11F0";

    fn decode(text: &str) -> Result<Decoded, DecodeError> {
        QueclinkDecoder.decode(text.as_bytes(), &SessionContext::default())
    }

    #[test]
    fn multi_fix_report() {
        let decoded = decode(TWO_FIXES).unwrap();
        assert_eq!(decoded.update.identity.as_deref(), Some("860599001234567"));
        assert_eq!(decoded.fixes.len(), 2);
        let first = &decoded.fixes[0];
        assert_eq!(first.timestamp_ms, 1_710_498_030_000);
        assert_eq!(first.latitude, 31.222073);
        assert_eq!(first.longitude, 121.354335);
        assert_eq!(first.speed_kmh, 4.3);
        assert!(first.gps_valid);
        assert_eq!(first.sequence_no, Some(0x11F0));
        assert!(!decoded.fixes[1].gps_valid);
        assert_eq!(decoded.fixes[1].timestamp_ms, 1_710_498_040_000);
    }

    #[test]
    fn one_malformed_fix_keeps_siblings() {
        let broken = TWO_FIXES.replacen("121.354335", "abc", 1);
        let decoded = decode(&broken).unwrap();
        assert_eq!(decoded.fixes.len(), 1);
        assert_eq!(decoded.dropped.len(), 1);
        assert_eq!(decoded.dropped[0].index, 0);
        assert_eq!(decoded.fixes[0].timestamp_ms, 1_710_498_040_000);
    }

    #[test]
    fn sos_and_buffered_reports() {
        let sos = TWO_FIXES.replace("+RESP:GTFRI", "+BUFF:GTSOS");
        let decoded = decode(&sos).unwrap();
        assert!(decoded
            .fixes
            .iter()
            .all(|fix| fix.alarm_code.as_deref() == Some("sos")));
    }

    #[test]
    fn heartbeat_ack() {
        let decoded =
            decode("+ACK:GTHBD,C30203,860599001234567,GL300,20240315102045,0A2F").unwrap();
        assert!(decoded.fixes.is_empty());
        assert_eq!(decoded.ack.unwrap().bytes, b"+SACK:GTHBD,C30203,0A2F$");
    }

    #[test]
    fn truncated_report() {
        assert_eq!(
            decode("+RESP:GTFRI,C30203,860599001234567,GL300,0,0,3,1,4.3").unwrap_err(),
            DecodeError::Truncated
        );
    }

    #[test]
    fn oversized_fix_count_is_truncated() {
        let huge = TWO_FIXES.replacen(",0,0,2,", ",0,0,1537228672809129302,", 1);
        assert_eq!(decode(&huge).unwrap_err(), DecodeError::Truncated);
    }
}
