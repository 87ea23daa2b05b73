//! H02（Sinotrack）文本协议，帧形如 `*HQ,<imei>,<cmd>,...#`，无应答。

use super::{ProtocolDecoder, ascii, field, knots_to_kmh, nmea_coordinate, nth, yymmdd_hhmmss};
use crate::error::DecodeError;
use crate::types::{Decoded, SessionContext};
use domain::{DecodedFix, ProtocolTag};

pub struct H02Decoder;

impl ProtocolDecoder for H02Decoder {
    fn protocol(&self) -> ProtocolTag {
        ProtocolTag::H02
    }

    fn decode(&self, frame: &[u8], _ctx: &SessionContext) -> Result<Decoded, DecodeError> {
        let text = ascii(frame)?;
        let fields: Vec<&str> = text.split(',').collect();
        if fields[0] != "*HQ" {
            return Err(DecodeError::malformed("missing *HQ header"));
        }
        let imei = nth(&fields, 1)?.trim();
        if imei.is_empty() {
            return Err(DecodeError::malformed("empty device id"));
        }
        let decoded = Decoded::empty().identity(imei);

        match nth(&fields, 2)? {
            "V1" => {
                let mut decoded = decoded;
                match position(imei, &fields) {
                    Ok(fix) => decoded.fixes.push(fix),
                    Err(DecodeError::Truncated) => return Err(DecodeError::Truncated),
                    Err(err) => decoded.drop_fix(0, err.to_string()),
                }
                Ok(decoded)
            }
            "HTBT" | "LINK" | "V4" | "NBR" => Ok(decoded),
            other => Err(DecodeError::Unsupported(format!("h02 {other}"))),
        }
    }
}

/// `V1,hhmmss,A|V,lat,N|S,lng,E|W,knots,course,DDMMYY,status`
fn position(imei: &str, fields: &[&str]) -> Result<DecodedFix, DecodeError> {
    let time = nth(fields, 3)?;
    let date = nth(fields, 11)?;
    // DDMMYY → YYMMDD
    let reordered = match (date.get(4..6), date.get(2..4), date.get(0..2)) {
        (Some(yy), Some(mm), Some(dd)) => format!("{yy}{mm}{dd}"),
        _ => return Err(DecodeError::Malformed(format!("invalid date: {date:?}"))),
    };
    let timestamp_ms = yymmdd_hhmmss(&reordered, time)?;
    let latitude = nmea_coordinate(nth(fields, 5)?, nth(fields, 6)?)?;
    let longitude = nmea_coordinate(nth(fields, 7)?, nth(fields, 8)?)?;

    let mut fix = DecodedFix::new(imei, ProtocolTag::H02, timestamp_ms, latitude, longitude);
    fix.gps_valid = nth(fields, 4)? == "A";
    fix.speed_kmh = knots_to_kmh(field(nth(fields, 9)?, "speed")?);
    fix.heading_deg = field(nth(fields, 10)?, "course")?;

    if let Some(status) = fields.get(12) {
        let status = u32::from_str_radix(status.trim(), 16)
            .map_err(|_| DecodeError::Malformed(format!("invalid status: {status:?}")))?;
        apply_status(&mut fix, status);
    }
    Ok(fix)
}

/// 状态位低电平有效；bit 10 置位表示 ACC 开
fn apply_status(fix: &mut DecodedFix, status: u32) {
    let active = |bit: u32| status & (1 << bit) == 0;
    fix.alarm_code = if active(1) {
        Some("sos".to_string())
    } else if active(19) {
        Some("power_cut".to_string())
    } else if active(2) {
        Some("overspeed".to_string())
    } else if active(0) {
        Some("vibration".to_string())
    } else {
        None
    };
    fix.ignition = Some(status & (1 << 10) != 0);
}
