//! YTWL 文本协议，无应答
//!
//! `*<imei>,<index>,<type>,<YYMMDDhhmmss>,<A|V>,<lat>,<N|S>,<lng>,<E|W>,<speed>,<course>,<status hex>#`

use super::{ProtocolDecoder, ascii, compact_datetime, field, hemisphere_coordinate, nth};
use crate::error::DecodeError;
use crate::types::{Decoded, SessionContext};
use domain::{DecodedFix, ProtocolTag};

const STATUS_IGNITION: u32 = 0x01;
const STATUS_SOS: u32 = 0x02;

pub struct YtwlDecoder;

impl ProtocolDecoder for YtwlDecoder {
    fn protocol(&self) -> ProtocolTag {
        ProtocolTag::Ytwl
    }

    fn decode(&self, frame: &[u8], _ctx: &SessionContext) -> Result<Decoded, DecodeError> {
        let text = ascii(frame)?;
        let body = text
            .strip_prefix('*')
            .ok_or_else(|| DecodeError::malformed("missing * header"))?;
        let fields: Vec<&str> = body.split(',').collect();
        let imei = fields[0].trim();
        if imei.is_empty() || !imei.bytes().all(|byte| byte.is_ascii_digit()) {
            return Err(DecodeError::malformed("invalid device id"));
        }

        if fields.len() < 12 {
            return Err(DecodeError::Truncated);
        }
        let mut decoded = Decoded::empty().identity(imei);
        match position(imei, &fields) {
            Ok(fix) => decoded.fixes.push(fix),
            Err(err) => decoded.drop_fix(0, err.to_string()),
        }
        Ok(decoded)
    }
}

fn position(imei: &str, fields: &[&str]) -> Result<DecodedFix, DecodeError> {
    let timestamp_ms = compact_datetime(nth(fields, 3)?)?;
    let latitude = hemisphere_coordinate(nth(fields, 5)?, nth(fields, 6)?)?;
    let longitude = hemisphere_coordinate(nth(fields, 7)?, nth(fields, 8)?)?;
    let mut fix = DecodedFix::new(imei, ProtocolTag::Ytwl, timestamp_ms, latitude, longitude);
    fix.gps_valid = nth(fields, 4)? == "A";
    fix.speed_kmh = field(nth(fields, 9)?, "speed")?;
    fix.heading_deg = field(nth(fields, 10)?, "course")?;
    fix.sequence_no = field(nth(fields, 1)?, "index").ok();

    let status = u32::from_str_radix(nth(fields, 11)?.trim(), 16)
        .map_err(|_| DecodeError::Malformed(format!("invalid status: {:?}", fields[11])))?;
    fix.ignition = Some(status & STATUS_IGNITION != 0);
    if status & STATUS_SOS != 0 {
        fix.alarm_code = Some("sos".to_string());
    }
    Ok(fix)
}
