//! GT06（Concox）二进制协议
//!
//! ```text
//! 78 78 | len u8  | proto | content | serial u16 | crc u16 | 0D 0A
//! 79 79 | len u16 | proto | content | serial u16 | crc u16 | 0D 0A
//! ```
//! CRC-16/X-25 覆盖 `len..serial`。

use super::{ProtocolDecoder, utc_millis};
use crate::crc::crc16_x25;
use crate::error::DecodeError;
use crate::types::{Decoded, DecoderState, Gt06State, SessionContext};
use byteorder::{BigEndian, ReadBytesExt};
use domain::{AckFrame, DecodedFix, ProtocolTag};
use std::io::Cursor;

const LOGIN: u8 = 0x01;
const LOCATION: u8 = 0x12;
const HEARTBEAT: u8 = 0x13;
const ALARM: u8 = 0x16;
const LOCATION_EXT: u8 = 0x22;
const ALARM_EXT: u8 = 0x26;

/// 坐标单位：分 × 30000，即度 × 1 800 000
const COORDINATE_SCALE: f64 = 1_800_000.0;
/// 定位块长度：日期 6 + 卫星 1 + 纬度 4 + 经度 4 + 速度 1 + 航向状态 2
const GPS_BLOCK_LEN: usize = 18;
/// 基站块长度：MCC 2 + MNC 1 + LAC 2 + Cell ID 3
const LBS_BLOCK_LEN: usize = 8;

pub struct Gt06Decoder;

impl ProtocolDecoder for Gt06Decoder {
    fn protocol(&self) -> ProtocolTag {
        ProtocolTag::Gt06
    }

    fn decode(&self, frame: &[u8], ctx: &SessionContext) -> Result<Decoded, DecodeError> {
        let packet = Packet::parse(frame)?;
        let mut state = match &ctx.state {
            DecoderState::Gt06(state) => state.clone(),
            _ => Gt06State::default(),
        };
        state.last_serial = Some(packet.serial);
        let ack = ack(packet.protocol, packet.serial);

        let decoded = match packet.protocol {
            LOGIN => {
                if packet.content.len() < 8 {
                    return Err(DecodeError::Truncated);
                }
                let encoded = hex::encode(&packet.content[..8]);
                let imei = encoded.strip_prefix('0').unwrap_or(&encoded);
                Decoded::empty().identity(imei)
            }
            HEARTBEAT => {
                let info = *packet.content.first().ok_or(DecodeError::Truncated)?;
                state.ignition = Some(info & 0x02 != 0);
                Decoded::empty()
            }
            LOCATION | LOCATION_EXT | ALARM | ALARM_EXT => {
                let device_id = ctx.device_id.as_deref().ok_or(DecodeError::Unidentified)?;
                let mut decoded = Decoded::empty();
                match location(device_id, packet.protocol, packet.content, &state) {
                    Ok(mut fix) => {
                        fix.sequence_no = Some(u64::from(packet.serial));
                        decoded.fixes.push(fix);
                    }
                    Err(DecodeError::Truncated) => return Err(DecodeError::Truncated),
                    Err(err) => decoded.drop_fix(0, err.to_string()),
                }
                decoded
            }
            other => return Err(DecodeError::Unsupported(format!("gt06 0x{other:02x}"))),
        };
        Ok(decoded.ack(ack).state(DecoderState::Gt06(state)))
    }
}

struct Packet<'a> {
    protocol: u8,
    content: &'a [u8],
    serial: u16,
}

impl<'a> Packet<'a> {
    fn parse(frame: &'a [u8]) -> Result<Self, DecodeError> {
        let (header, declared) = match frame {
            [0x78, 0x78, len, ..] => (3, usize::from(*len)),
            [0x79, 0x79, hi, lo, ..] => (4, usize::from(u16::from_be_bytes([*hi, *lo]))),
            _ => return Err(DecodeError::malformed("missing gt06 start marker")),
        };
        // len 覆盖 proto..crc，至少 proto + serial + crc
        if declared < 5 || frame.len() != header + declared + 2 {
            return Err(DecodeError::Truncated);
        }
        if frame[frame.len() - 2..] != [0x0D, 0x0A] {
            return Err(DecodeError::malformed("missing gt06 stop marker"));
        }
        let crc_at = frame.len() - 4;
        let expected = u16::from_be_bytes([frame[crc_at], frame[crc_at + 1]]);
        let computed = crc16_x25(&frame[2..crc_at]);
        if expected != computed {
            return Err(DecodeError::Checksum {
                expected: u32::from(expected),
                computed: u32::from(computed),
            });
        }
        let serial_at = crc_at - 2;
        Ok(Self {
            protocol: frame[header],
            content: &frame[header + 1..serial_at],
            serial: u16::from_be_bytes([frame[serial_at], frame[serial_at + 1]]),
        })
    }
}

/// 服务器应答：`78 78 05 proto serial crc 0D 0A`
fn ack(protocol: u8, serial: u16) -> AckFrame {
    let [hi, lo] = serial.to_be_bytes();
    let mut bytes = vec![0x78, 0x78, 0x05, protocol, hi, lo];
    let crc = crc16_x25(&bytes[2..]);
    bytes.extend_from_slice(&crc.to_be_bytes());
    bytes.extend_from_slice(&[0x0D, 0x0A]);
    AckFrame::new(bytes)
}

fn location(
    device_id: &str,
    protocol: u8,
    content: &[u8],
    state: &Gt06State,
) -> Result<DecodedFix, DecodeError> {
    let mut cursor = Cursor::new(content);
    let mut fix = gps_block(device_id, &mut cursor)?;
    fix.ignition = state.ignition;

    match protocol {
        LOCATION_EXT => {
            skip(&mut cursor, LBS_BLOCK_LEN)?;
            fix.ignition = Some(cursor.read_u8()? != 0);
            let _upload_mode = cursor.read_u8()?;
            let _realtime = cursor.read_u8()?;
            if remaining(&cursor) >= 4 {
                fix.odometer_m = Some(f64::from(cursor.read_u32::<BigEndian>()?));
            }
        }
        ALARM | ALARM_EXT => {
            // 基站块长度字节包含自身
            let lbs_len = usize::from(cursor.read_u8()?).max(1);
            skip(&mut cursor, lbs_len - 1)?;
            let info = cursor.read_u8()?;
            let _voltage = cursor.read_u8()?;
            let _gsm = cursor.read_u8()?;
            let alarm = cursor.read_u8()?;
            fix.ignition = Some(info & 0x02 != 0);
            fix.alarm_code = alarm_name(alarm);
        }
        _ => {}
    }
    Ok(fix)
}

fn gps_block(device_id: &str, cursor: &mut Cursor<&[u8]>) -> Result<DecodedFix, DecodeError> {
    if remaining(cursor) < GPS_BLOCK_LEN {
        return Err(DecodeError::Truncated);
    }
    let mut date = [0u8; 6];
    for part in &mut date {
        *part = cursor.read_u8()?;
    }
    let [yy, mm, dd, hh, mi, ss] = date;
    let gps = cursor.read_u8()?;
    let lat_raw = cursor.read_u32::<BigEndian>()?;
    let lng_raw = cursor.read_u32::<BigEndian>()?;
    let speed = cursor.read_u8()?;
    let course_status = cursor.read_u16::<BigEndian>()?;

    let timestamp_ms = utc_millis(
        2000 + i32::from(yy),
        u32::from(mm),
        u32::from(dd),
        u32::from(hh),
        u32::from(mi),
        u32::from(ss),
        0,
    )?;
    let north = course_status & 0x0400 != 0;
    let west = course_status & 0x0800 != 0;
    let mut latitude = f64::from(lat_raw) / COORDINATE_SCALE;
    let mut longitude = f64::from(lng_raw) / COORDINATE_SCALE;
    if !north {
        latitude = -latitude;
    }
    if west {
        longitude = -longitude;
    }

    let mut fix = DecodedFix::new(device_id, ProtocolTag::Gt06, timestamp_ms, latitude, longitude);
    fix.speed_kmh = f64::from(speed);
    fix.heading_deg = f64::from(course_status & 0x03FF);
    fix.gps_valid = course_status & 0x1000 != 0;
    fix.satellites = Some(gps & 0x0F);
    Ok(fix)
}

fn remaining(cursor: &Cursor<&[u8]>) -> usize {
    cursor.get_ref().len().saturating_sub(cursor.position() as usize)
}

fn skip(cursor: &mut Cursor<&[u8]>, count: usize) -> Result<(), DecodeError> {
    if remaining(cursor) < count {
        return Err(DecodeError::Truncated);
    }
    cursor.set_position(cursor.position() + count as u64);
    Ok(())
}

fn alarm_name(code: u8) -> Option<String> {
    let name = match code {
        0x00 => return None,
        0x01 => "sos",
        0x02 => "power_cut",
        0x03 => "vibration",
        0x04 => "geofence_enter",
        0x05 => "geofence_exit",
        0x06 => "overspeed",
        other => return Some(format!("alarm_{other:02x}")),
    };
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOGIN_FRAME: &str = "78780D010864180030000001000102570D0A";
    const LOCATION_FRAME: &str =
        "78781F1218030F0A141EC9026B3E900C3CB19C3C145A01CC00287D001FB800026BD80D0A";
    const LOCATION_EXT_FRAME: &str =
        "7878262218030F0A141EC9026B3E900C3CB19C3C185A01CC00287D001FB80100010001E24000037B030D0A";
    const HEARTBEAT_FRAME: &str = "78780A1346040400020004D5940D0A";
    const ALARM_FRAME: &str =
        "7878251618030F0A141EC9026B3E900C3CB19C3C145A0901CC00287D001FB8020404010200052DCA0D0A";

    fn bytes(hex_str: &str) -> Vec<u8> {
        hex::decode(hex_str).unwrap()
    }

    fn logged_in() -> SessionContext {
        SessionContext::with_device("864180030000001")
    }

    #[test]
    fn login_binds_imei_and_acks() {
        let decoded = Gt06Decoder
            .decode(&bytes(LOGIN_FRAME), &SessionContext::default())
            .unwrap();
        assert!(decoded.fixes.is_empty());
        assert_eq!(decoded.update.identity.as_deref(), Some("864180030000001"));
        assert_eq!(
            decoded.ack.unwrap().bytes,
            bytes("787805010001D9DC0D0A")
        );
    }

    #[test]
    fn location_before_login_is_unidentified() {
        let err = Gt06Decoder
            .decode(&bytes(LOCATION_FRAME), &SessionContext::default())
            .unwrap_err();
        assert_eq!(err, DecodeError::Unidentified);
    }

    #[test]
    fn location_after_login() {
        let decoded = Gt06Decoder
            .decode(&bytes(LOCATION_FRAME), &logged_in())
            .unwrap();
        assert_eq!(decoded.fixes.len(), 1);
        let fix = &decoded.fixes[0];
        assert_eq!(fix.device_id, "864180030000001");
        assert_eq!(fix.timestamp_ms, 1_710_498_030_000);
        assert!((fix.latitude - 22.546).abs() < 1e-6);
        assert!((fix.longitude - 114.0579).abs() < 1e-6);
        assert_eq!(fix.speed_kmh, 60.0);
        assert_eq!(fix.heading_deg, 90.0);
        assert_eq!(fix.satellites, Some(9));
        assert!(fix.gps_valid);
        assert_eq!(fix.sequence_no, Some(2));
        assert!(decoded.ack.is_some());
    }

    #[test]
    fn extended_location_carries_acc_and_mileage() {
        let decoded = Gt06Decoder
            .decode(&bytes(LOCATION_EXT_FRAME), &logged_in())
            .unwrap();
        let fix = &decoded.fixes[0];
        assert!(fix.latitude < 0.0);
        assert!(fix.longitude < 0.0);
        assert_eq!(fix.ignition, Some(true));
        assert_eq!(fix.odometer_m, Some(123_456.0));
    }

    #[test]
    fn heartbeat_ignition_flows_into_next_fix() {
        let mut ctx = logged_in();
        let heartbeat = Gt06Decoder.decode(&bytes(HEARTBEAT_FRAME), &ctx).unwrap();
        assert!(heartbeat.fixes.is_empty());
        assert_eq!(heartbeat.ack.as_ref().map(|ack| ack.bytes[3]), Some(HEARTBEAT));
        ctx.apply(&heartbeat.update);

        let decoded = Gt06Decoder.decode(&bytes(LOCATION_FRAME), &ctx).unwrap();
        assert_eq!(decoded.fixes[0].ignition, Some(true));
    }

    #[test]
    fn alarm_frame() {
        let decoded = Gt06Decoder
            .decode(&bytes(ALARM_FRAME), &logged_in())
            .unwrap();
        let fix = &decoded.fixes[0];
        assert_eq!(fix.alarm_code.as_deref(), Some("sos"));
        assert_eq!(fix.ignition, Some(true));
        assert_eq!(decoded.ack.unwrap().bytes[3], ALARM);
    }

    #[test]
    fn corrupted_crc_yields_no_fix() {
        let mut frame = bytes(LOCATION_FRAME);
        frame[10] ^= 0x01;
        let err = Gt06Decoder.decode(&frame, &logged_in()).unwrap_err();
        assert!(err.is_checksum());
    }

    #[test]
    fn coordinate_round_trip_within_resolution() {
        for (lat, lng) in [(22.546, 114.0579), (0.000_001, 179.999_999), (89.9, 0.5)] {
            let lat_raw = (lat * COORDINATE_SCALE).round() as u32;
            let lng_raw = (lng * COORDINATE_SCALE).round() as u32;
            let mut content = vec![24, 3, 15, 10, 20, 30, 0xC9];
            content.extend_from_slice(&lat_raw.to_be_bytes());
            content.extend_from_slice(&lng_raw.to_be_bytes());
            content.push(0);
            content.extend_from_slice(&0x1400u16.to_be_bytes());
            let mut cursor = Cursor::new(content.as_slice());
            let fix = gps_block("1", &mut cursor).unwrap();
            assert!((fix.latitude - lat).abs() <= 0.5 / COORDINATE_SCALE);
            assert!((fix.longitude - lng).abs() <= 0.5 / COORDINATE_SCALE);
        }
    }
}
