//! TK103（Coban GPS103）文本协议，帧以 `;` 结尾
//!
//! - 登录：`##,imei:<imei>,A` → 应答 `LOAD`
//! - 心跳：`<imei>` → 应答 `ON`
//! - 上报：`imei:<imei>,<keyword>,<YYMMDDhhmm>,<phone>,<F|L>,<hhmmss.sss>,<A|V>,<lat>,<N|S>,<lng>,<E|W>,<knots>,<course>[,<alt>,<acc>,<door>,<fuel%>...]`

use super::{
    ProtocolDecoder, ascii, digits, knots_to_kmh, nmea_coordinate, nth, optional_field, utc_millis,
    yymmdd_hhmmss,
};
use crate::error::DecodeError;
use crate::types::{Decoded, SessionContext};
use domain::{AckFrame, DecodedFix, ProtocolTag};

pub struct Tk103Decoder;

impl ProtocolDecoder for Tk103Decoder {
    fn protocol(&self) -> ProtocolTag {
        ProtocolTag::Tk103
    }

    fn decode(&self, frame: &[u8], _ctx: &SessionContext) -> Result<Decoded, DecodeError> {
        let text = ascii(frame)?;

        if let Some(rest) = text.strip_prefix("##,") {
            let imei = rest
                .split(',')
                .next()
                .and_then(strip_imei)
                .ok_or_else(|| DecodeError::malformed("login without imei"))?;
            return Ok(Decoded::empty()
                .identity(imei)
                .ack(AckFrame::text("LOAD")));
        }

        if !text.is_empty() && text.bytes().all(|byte| byte.is_ascii_digit()) {
            return Ok(Decoded::empty().identity(text).ack(AckFrame::text("ON")));
        }

        let fields: Vec<&str> = text.split(',').collect();
        let imei = strip_imei(fields[0])
            .ok_or_else(|| DecodeError::Unsupported(format!("tk103 {:?}", fields[0])))?;
        let mut decoded = Decoded::empty().identity(imei);
        match report(imei, &fields) {
            Ok(fix) => decoded.fixes.push(fix),
            Err(DecodeError::Truncated) => return Err(DecodeError::Truncated),
            Err(err) => decoded.drop_fix(0, err.to_string()),
        }
        Ok(decoded)
    }
}

fn strip_imei(part: &str) -> Option<&str> {
    let prefix = part.get(..5)?;
    if !prefix.eq_ignore_ascii_case("imei:") {
        return None;
    }
    let imei = part[5..].trim();
    (!imei.is_empty()).then_some(imei)
}

fn report(imei: &str, fields: &[&str]) -> Result<DecodedFix, DecodeError> {
    let keyword = nth(fields, 1)?.trim().to_ascii_lowercase();
    let local_date = nth(fields, 2)?;
    let fix_kind = nth(fields, 4)?;

    let mut fix = if fix_kind == "L" {
        // 无 GPS 的基站上报：只有分钟精度的时间
        let timestamp_ms = utc_millis(
            2000 + digits(local_date, 0, 2)? as i32,
            digits(local_date, 2, 2)?,
            digits(local_date, 4, 2)?,
            digits(local_date, 6, 2)?,
            digits(local_date, 8, 2)?,
            0,
            0,
        )?;
        let mut fix = DecodedFix::new(imei, ProtocolTag::Tk103, timestamp_ms, 0.0, 0.0);
        fix.gps_valid = false;
        fix
    } else {
        let date = local_date.get(..6).unwrap_or(local_date);
        let timestamp_ms = yymmdd_hhmmss(date, nth(fields, 5)?)?;
        let latitude = nmea_coordinate(nth(fields, 7)?, nth(fields, 8)?)?;
        let longitude = nmea_coordinate(nth(fields, 9)?, nth(fields, 10)?)?;
        let mut fix = DecodedFix::new(imei, ProtocolTag::Tk103, timestamp_ms, latitude, longitude);
        fix.gps_valid = nth(fields, 6)? == "A";
        fix.speed_kmh = optional_field::<f64>(fields.get(11).copied())
            .map(knots_to_kmh)
            .unwrap_or_default();
        fix.heading_deg = optional_field(fields.get(12).copied()).unwrap_or_default();
        fix.altitude_m = optional_field(fields.get(13).copied());
        fix.ignition = optional_field::<u8>(fields.get(14).copied()).map(|acc| acc != 0);
        fix.fuel_percent = fields
            .get(16)
            .map(|value| value.trim_end_matches('%'))
            .and_then(|value| optional_field(Some(value)));
        fix
    };

    match keyword.as_str() {
        "tracker" => {}
        "acc on" => fix.ignition = Some(true),
        "acc off" => fix.ignition = Some(false),
        other => fix.alarm_code = Some(alarm_name(other)),
    }
    Ok(fix)
}

fn alarm_name(keyword: &str) -> String {
    match keyword {
        "help me" => "sos".to_string(),
        "low battery" => "low_battery".to_string(),
        "move" => "movement".to_string(),
        "speed" => "overspeed".to_string(),
        "ac alarm" => "power_cut".to_string(),
        "stockade" => "geofence".to_string(),
        other => other.replace(' ', "_"),
    }
}
