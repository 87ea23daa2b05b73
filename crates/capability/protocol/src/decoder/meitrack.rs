//! Meitrack 协议：`$$<flag><len>,<imei>,<cmd>,<data>*<XX>\r\n`
//!
//! - `len` 从其后的逗号数到 `\r\n`
//! - `XX` 为 `*` 及其之前所有字节的累加和（模 256，大写十六进制）
//! - `AAA` 为文本定位；`CCC` 为二进制（小端）批量缓存记录，需应答以便终端删除已上传批次

use super::{ProtocolDecoder, compact_datetime, field, nth};
use crate::crc::sum8;
use crate::error::DecodeError;
use crate::types::{Decoded, DecoderState, MeitrackState, SessionContext};
use byteorder::{LittleEndian, ReadBytesExt};
use domain::{AckFrame, DecodedFix, ProtocolTag};
use std::io::Cursor;

/// 2000-01-01T00:00:00Z 的 Unix 秒
const EPOCH_2000_SECS: i64 = 946_684_800;
const CCC_HEADER_LEN: usize = 8;
const CCC_RECORD_LEN: usize = 52;
const COORDINATE_SCALE: f64 = 1_000_000.0;
const EVENT_PERIODIC: u8 = 35;

pub struct MeitrackDecoder;

impl ProtocolDecoder for MeitrackDecoder {
    fn protocol(&self) -> ProtocolTag {
        ProtocolTag::Meitrack
    }

    fn decode(&self, frame: &[u8], ctx: &SessionContext) -> Result<Decoded, DecodeError> {
        let packet = Packet::parse(frame)?;
        let mut state = match &ctx.state {
            DecoderState::Meitrack(state) => state.clone(),
            _ => MeitrackState::default(),
        };
        state.last_flag = Some(packet.flag);
        let mut decoded = Decoded::empty().identity(packet.imei.as_str());

        match packet.command.as_str() {
            "AAA" => {
                let text = std::str::from_utf8(packet.data)
                    .map_err(|_| DecodeError::malformed("AAA payload is not text"))?;
                match aaa(&packet.imei, text) {
                    Ok(fix) => decoded.fixes.push(fix),
                    Err(DecodeError::Truncated) => return Err(DecodeError::Truncated),
                    Err(err) => decoded.drop_fix(0, err.to_string()),
                }
            }
            "CCC" => {
                let (remaining, count) = ccc(&packet.imei, packet.data, &mut decoded)?;
                state.remaining_cached = remaining;
                decoded = decoded.ack(ccc_ack(packet.flag, &packet.imei, count));
            }
            _ => {}
        }
        Ok(decoded.state(DecoderState::Meitrack(state)))
    }
}

struct Packet<'a> {
    flag: u8,
    imei: String,
    command: String,
    data: &'a [u8],
}

impl<'a> Packet<'a> {
    fn parse(frame: &'a [u8]) -> Result<Self, DecodeError> {
        if frame.len() < 10 || !frame.starts_with(b"$$") || !frame.ends_with(b"\r\n") {
            return Err(DecodeError::malformed("not a meitrack frame"));
        }
        let star = frame.len() - 5;
        if frame[star] != b'*' {
            return Err(DecodeError::malformed("missing checksum marker"));
        }
        let declared = std::str::from_utf8(&frame[star + 1..star + 3])
            .ok()
            .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            .ok_or_else(|| DecodeError::malformed("invalid checksum digits"))?;
        let computed = sum8(&frame[..=star]);
        if declared != computed {
            return Err(DecodeError::Checksum {
                expected: u32::from(declared),
                computed: u32::from(computed),
            });
        }

        let flag = frame[2];
        let body = &frame[3..star];
        let mut parts = body.splitn(4, |byte| *byte == b',');
        let _len = parts.next();
        let imei = parts
            .next()
            .map(|part| String::from_utf8_lossy(part).trim().to_string())
            .filter(|imei| !imei.is_empty())
            .ok_or_else(|| DecodeError::malformed("missing imei"))?;
        let command = parts
            .next()
            .map(|part| String::from_utf8_lossy(part).into_owned())
            .ok_or(DecodeError::Truncated)?;
        let data = parts.next().unwrap_or_default();
        Ok(Self {
            flag,
            imei,
            command,
            data,
        })
    }
}

/// `event,lat,lng,yymmddHHMMSS,A|V,sats,gsm,speed,course,hdop,altitude,mileage,runtime,base,io,...`
fn aaa(imei: &str, text: &str) -> Result<DecodedFix, DecodeError> {
    let fields: Vec<&str> = text.split(',').collect();
    let event: u8 = field(nth(&fields, 0)?, "event")?;
    let latitude: f64 = field(nth(&fields, 1)?, "latitude")?;
    let longitude: f64 = field(nth(&fields, 2)?, "longitude")?;
    let timestamp_ms = compact_datetime(nth(&fields, 3)?)?;

    let mut fix = DecodedFix::new(imei, ProtocolTag::Meitrack, timestamp_ms, latitude, longitude);
    fix.gps_valid = nth(&fields, 4)? == "A";
    fix.satellites = field(nth(&fields, 5)?, "satellites").ok();
    fix.speed_kmh = field(nth(&fields, 7)?, "speed").unwrap_or_default();
    fix.heading_deg = field(nth(&fields, 8)?, "course").unwrap_or_default();
    fix.hdop = field(nth(&fields, 9)?, "hdop").ok();
    fix.altitude_m = field(nth(&fields, 10)?, "altitude").ok();
    fix.odometer_m = field(nth(&fields, 11)?, "mileage").ok();
    if let Some(io) = fields
        .get(14)
        .and_then(|io| u16::from_str_radix(io.trim(), 16).ok())
    {
        apply_io(&mut fix, io);
    }
    fix.alarm_code = event_name(event);
    Ok(fix)
}

/// 返回（终端剩余缓存数，本批记录数）
fn ccc(imei: &str, data: &[u8], decoded: &mut Decoded) -> Result<(u32, u16), DecodeError> {
    let mut cursor = Cursor::new(data);
    let _protocol = cursor.read_u16::<LittleEndian>()?;
    let remaining = cursor.read_u32::<LittleEndian>()?;
    let count = cursor.read_u16::<LittleEndian>()?;
    if data.len() < CCC_HEADER_LEN + usize::from(count) * CCC_RECORD_LEN {
        return Err(DecodeError::Truncated);
    }
    for index in 0..usize::from(count) {
        let start = CCC_HEADER_LEN + index * CCC_RECORD_LEN;
        let record = &data[start..start + CCC_RECORD_LEN];
        match ccc_record(imei, record) {
            Ok(fix) => decoded.fixes.push(fix),
            Err(err) => decoded.drop_fix(index, err.to_string()),
        }
    }
    Ok((remaining, count))
}

fn ccc_record(imei: &str, record: &[u8]) -> Result<DecodedFix, DecodeError> {
    let mut cursor = Cursor::new(record);
    let event = cursor.read_u8()?;
    let latitude = f64::from(cursor.read_i32::<LittleEndian>()?) / COORDINATE_SCALE;
    let longitude = f64::from(cursor.read_i32::<LittleEndian>()?) / COORDINATE_SCALE;
    let seconds = cursor.read_u32::<LittleEndian>()?;
    let valid = cursor.read_u8()?;
    let satellites = cursor.read_u8()?;
    let _gsm = cursor.read_u8()?;
    let speed = cursor.read_u16::<LittleEndian>()?;
    let course = cursor.read_u16::<LittleEndian>()?;
    let hdop = cursor.read_u16::<LittleEndian>()?;
    let altitude = cursor.read_u16::<LittleEndian>()?;
    let odometer = cursor.read_u32::<LittleEndian>()?;
    let _runtime = cursor.read_u32::<LittleEndian>()?;
    for _ in 0..4 {
        let _cell = cursor.read_u16::<LittleEndian>()?;
    }
    let io = cursor.read_u16::<LittleEndian>()?;

    if seconds == 0 {
        return Err(DecodeError::malformed("zero timestamp"));
    }
    let timestamp_ms = (EPOCH_2000_SECS + i64::from(seconds)) * 1000;
    let mut fix = DecodedFix::new(imei, ProtocolTag::Meitrack, timestamp_ms, latitude, longitude);
    fix.gps_valid = valid != 0;
    fix.satellites = Some(satellites);
    fix.speed_kmh = f64::from(speed);
    fix.heading_deg = f64::from(course);
    fix.hdop = Some(f64::from(hdop) / 10.0);
    fix.altitude_m = Some(f64::from(altitude));
    fix.odometer_m = Some(f64::from(odometer));
    apply_io(&mut fix, io);
    fix.alarm_code = event_name(event);
    Ok(fix)
}

/// 低字节为数字输入，输入 1 为 ACC
fn apply_io(fix: &mut DecodedFix, io: u16) {
    let inputs = u32::from(io & 0x00FF);
    fix.digital_inputs = Some(inputs);
    fix.ignition = Some(inputs & 0x01 != 0);
}

fn event_name(event: u8) -> Option<String> {
    let name = match event {
        EVENT_PERIODIC => return None,
        1 => "sos",
        17 => "low_battery",
        19 => "overspeed",
        20 => "geofence_enter",
        21 => "geofence_exit",
        other => return Some(format!("event_{other}")),
    };
    Some(name.to_string())
}

/// `@@<flag><len>,<imei>,CCC,<count>*XX\r\n`
fn ccc_ack(flag: u8, imei: &str, count: u16) -> AckFrame {
    let body = format!(",{imei},CCC,{count}*");
    let len = body.len() + 4;
    let mut bytes = format!("@@{}{len}{body}", char::from(flag)).into_bytes();
    let checksum = sum8(&bytes);
    bytes.extend_from_slice(format!("{checksum:02X}\r\n").as_bytes());
    AckFrame::new(bytes)
}
