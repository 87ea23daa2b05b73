//! Teltonika 二进制协议（Codec 8 / 8 Extended / 16）
//!
//! ```text
//! 握手：  len u16 | IMEI ASCII                      → 应答 01
//! AVL 包：00000000 | data_len u32 | codec | n1 | records | n2 | crc u32
//! ```
//! CRC-16/ARC 覆盖 `codec..n2`，应答为记录数（u32 大端）。

use super::ProtocolDecoder;
use crate::crc::crc16_arc;
use crate::error::DecodeError;
use crate::types::{Decoded, DecoderState, SessionContext, TeltonikaState};
use byteorder::{BigEndian, ReadBytesExt};
use domain::{AckFrame, DecodedFix, ProtocolTag};
use std::io::{Cursor, Read};

const CODEC_8: u8 = 0x08;
const CODEC_8_EXTENDED: u8 = 0x8E;
const CODEC_16: u8 = 0x10;

const COORDINATE_SCALE: f64 = 10_000_000.0;
const PRIORITY_PANIC: u8 = 2;

const IO_DIN1: u16 = 1;
const IO_DIN2: u16 = 2;
const IO_DIN3: u16 = 3;
const IO_DIN4: u16 = 4;
const IO_ODOMETER: u16 = 16;
const IO_FUEL_PERCENT: u16 = 48;
const IO_FUEL_LEVEL: u16 = 89;
const IO_HDOP: u16 = 182;
const IO_IGNITION: u16 = 239;
const IO_TOWING: u16 = 246;
const IO_CRASH: u16 = 247;
const IO_UNPLUG: u16 = 252;

pub struct TeltonikaDecoder;

impl ProtocolDecoder for TeltonikaDecoder {
    fn protocol(&self) -> ProtocolTag {
        ProtocolTag::Teltonika
    }

    fn decode(&self, frame: &[u8], ctx: &SessionContext) -> Result<Decoded, DecodeError> {
        let mut state = match &ctx.state {
            DecoderState::Teltonika(state) => state.clone(),
            _ => TeltonikaState::default(),
        };

        if frame.len() >= 4 && frame[..4] != [0, 0, 0, 0] {
            let imei = handshake(frame)?;
            state.handshake_done = true;
            return Ok(Decoded::empty()
                .identity(imei)
                .ack(AckFrame::new(vec![0x01]))
                .state(DecoderState::Teltonika(state)));
        }

        let data = avl_data(frame)?;
        let device_id = ctx.device_id.as_deref().ok_or(DecodeError::Unidentified)?;
        let codec = data[0];
        let declared = data[1];
        let trailer = data[data.len() - 1];
        if declared != trailer {
            return Err(DecodeError::CountMismatch { declared, trailer });
        }

        if !matches!(codec, CODEC_8 | CODEC_8_EXTENDED | CODEC_16) {
            return Err(DecodeError::Unsupported(format!("teltonika codec 0x{codec:02x}")));
        }

        let mut decoded = Decoded::empty();
        let mut cursor = Cursor::new(&data[2..data.len() - 1]);
        for index in 0..usize::from(declared) {
            let record = read_record(&mut cursor, codec)?;
            match record.into_fix(device_id) {
                Ok(fix) => decoded.fixes.push(fix),
                Err(err) => decoded.drop_fix(index, err.to_string()),
            }
        }

        state.last_codec = Some(codec);
        state.last_record_count = declared;
        Ok(decoded
            .ack(AckFrame::new(u32::from(declared).to_be_bytes().to_vec()))
            .state(DecoderState::Teltonika(state)))
    }
}

fn handshake(frame: &[u8]) -> Result<String, DecodeError> {
    let len = usize::from(u16::from_be_bytes([frame[0], frame[1]]));
    if frame.len() != len + 2 {
        return Err(DecodeError::Truncated);
    }
    let imei = &frame[2..];
    if imei.is_empty() || !imei.iter().all(u8::is_ascii_digit) {
        return Err(DecodeError::malformed("handshake imei is not numeric"));
    }
    Ok(String::from_utf8_lossy(imei).into_owned())
}

/// 校验长度与 CRC，返回 `codec..n2`
fn avl_data(frame: &[u8]) -> Result<&[u8], DecodeError> {
    if frame.len() < 12 {
        return Err(DecodeError::Truncated);
    }
    let data_len = u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]) as usize;
    if data_len < 3 || frame.len() != data_len + 12 {
        return Err(DecodeError::Truncated);
    }
    let data = &frame[8..8 + data_len];
    let tail = &frame[8 + data_len..];
    let expected = u32::from_be_bytes([tail[0], tail[1], tail[2], tail[3]]);
    let computed = u32::from(crc16_arc(data));
    if expected != computed {
        return Err(DecodeError::Checksum { expected, computed });
    }
    Ok(data)
}

struct AvlRecord {
    timestamp_ms: u64,
    priority: u8,
    latitude: f64,
    longitude: f64,
    altitude: i16,
    angle: u16,
    satellites: u8,
    speed: u16,
    io: Vec<(u16, u64)>,
}

impl AvlRecord {
    fn into_fix(self, device_id: &str) -> Result<DecodedFix, DecodeError> {
        let timestamp_ms = i64::try_from(self.timestamp_ms)
            .map_err(|_| DecodeError::Malformed(format!("invalid timestamp {}", self.timestamp_ms)))?;
        let mut fix = DecodedFix::new(
            device_id,
            ProtocolTag::Teltonika,
            timestamp_ms,
            self.latitude,
            self.longitude,
        );
        fix.altitude_m = Some(f64::from(self.altitude));
        fix.heading_deg = f64::from(self.angle);
        fix.satellites = Some(self.satellites);
        fix.speed_kmh = f64::from(self.speed);
        fix.gps_valid = self.satellites > 0;
        if self.priority == PRIORITY_PANIC {
            fix.alarm_code = Some("panic".to_string());
        }

        let mut inputs: Option<u32> = None;
        for (id, value) in self.io {
            match id {
                IO_IGNITION => fix.ignition = Some(value != 0),
                IO_DIN1 | IO_DIN2 | IO_DIN3 | IO_DIN4 => {
                    let bit = 1u32 << (id - IO_DIN1);
                    let current = inputs.unwrap_or_default();
                    inputs = Some(if value != 0 { current | bit } else { current & !bit });
                }
                IO_ODOMETER => fix.odometer_m = Some(value as f64),
                IO_HDOP => fix.hdop = Some(value as f64 / 10.0),
                IO_FUEL_LEVEL | IO_FUEL_PERCENT => fix.fuel_percent = Some(value as f64),
                IO_CRASH | IO_TOWING | IO_UNPLUG if value != 0 && fix.alarm_code.is_none() => {
                    fix.alarm_code = Some(
                        match id {
                            IO_CRASH => "crash",
                            IO_TOWING => "towing",
                            _ => "unplug",
                        }
                        .to_string(),
                    );
                }
                _ => {}
            }
        }
        fix.digital_inputs = inputs;
        Ok(fix)
    }
}

fn read_record(cursor: &mut Cursor<&[u8]>, codec: u8) -> Result<AvlRecord, DecodeError> {
    let timestamp_ms = cursor.read_u64::<BigEndian>()?;
    let priority = cursor.read_u8()?;
    let longitude = f64::from(cursor.read_i32::<BigEndian>()?) / COORDINATE_SCALE;
    let latitude = f64::from(cursor.read_i32::<BigEndian>()?) / COORDINATE_SCALE;
    let altitude = cursor.read_i16::<BigEndian>()?;
    let angle = cursor.read_u16::<BigEndian>()?;
    let satellites = cursor.read_u8()?;
    let speed = cursor.read_u16::<BigEndian>()?;
    let io = match codec {
        CODEC_8 => read_io_codec8(cursor)?,
        CODEC_8_EXTENDED => read_io_codec8e(cursor)?,
        _ => read_io_codec16(cursor)?,
    };
    Ok(AvlRecord {
        timestamp_ms,
        priority,
        latitude,
        longitude,
        altitude,
        angle,
        satellites,
        speed,
        io,
    })
}

fn read_value(cursor: &mut Cursor<&[u8]>, width: usize) -> Result<u64, DecodeError> {
    Ok(match width {
        1 => u64::from(cursor.read_u8()?),
        2 => u64::from(cursor.read_u16::<BigEndian>()?),
        4 => u64::from(cursor.read_u32::<BigEndian>()?),
        _ => cursor.read_u64::<BigEndian>()?,
    })
}

/// 事件 id u8 | 总数 u8 | 各宽度组：数量 u8 × (id u8, 值)
fn read_io_codec8(cursor: &mut Cursor<&[u8]>) -> Result<Vec<(u16, u64)>, DecodeError> {
    let _event_id = cursor.read_u8()?;
    let _total = cursor.read_u8()?;
    let mut io = Vec::new();
    for width in [1, 2, 4, 8] {
        for _ in 0..cursor.read_u8()? {
            let id = u16::from(cursor.read_u8()?);
            io.push((id, read_value(cursor, width)?));
        }
    }
    Ok(io)
}

/// 事件 id u16 | 总数 u16 | 各宽度组：数量 u16 × (id u16, 值) | 变长组
fn read_io_codec8e(cursor: &mut Cursor<&[u8]>) -> Result<Vec<(u16, u64)>, DecodeError> {
    let _event_id = cursor.read_u16::<BigEndian>()?;
    let _total = cursor.read_u16::<BigEndian>()?;
    let mut io = Vec::new();
    for width in [1, 2, 4, 8] {
        for _ in 0..cursor.read_u16::<BigEndian>()? {
            let id = cursor.read_u16::<BigEndian>()?;
            io.push((id, read_value(cursor, width)?));
        }
    }
    for _ in 0..cursor.read_u16::<BigEndian>()? {
        let _id = cursor.read_u16::<BigEndian>()?;
        let len = cursor.read_u16::<BigEndian>()?;
        let mut skipped = vec![0u8; usize::from(len)];
        cursor.read_exact(&mut skipped)?;
    }
    Ok(io)
}

/// 事件 id u16 | 生成类型 u8 | 总数 u8 | 各宽度组：数量 u8 × (id u16, 值)
fn read_io_codec16(cursor: &mut Cursor<&[u8]>) -> Result<Vec<(u16, u64)>, DecodeError> {
    let _event_id = cursor.read_u16::<BigEndian>()?;
    let _generation = cursor.read_u8()?;
    let _total = cursor.read_u8()?;
    let mut io = Vec::new();
    for width in [1, 2, 4, 8] {
        for _ in 0..cursor.read_u8()? {
            let id = cursor.read_u16::<BigEndian>()?;
            io.push((id, read_value(cursor, width)?));
        }
    }
    Ok(io)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HANDSHAKE: &str = "000F333536333037303432343431303133";
    const CODEC8_TWO_RECORDS: &str = "000000000000004B08020000018E41A0A1B0000F11604820989AC00078010E090030EF0302EF01010101B6000C01100000D431000000018E41A0C8C0020F11643020989EA80079011300000000000000000002000076CE";
    const CODEC8_DOC_SAMPLE: &str = "000000000000003608010000016B40D8EA30010000000000000000000000000000000105021503010101425E0F01F10000601A014E0000000000000000010000C7CF";
    const CODEC8E: &str = "00000000000000308E010000018E41A0EFD0005A20B548EBD00800003A000A07002300EF0002000100EF00000100590037000000000000010000487F";
    const CODEC16: &str = "000000000000002610010000018E41A116E000D3E394A0184447C0000A00B40B001400EF01010100EF01000000010000C477";

    fn bytes(hex_str: &str) -> Vec<u8> {
        hex::decode(hex_str).unwrap()
    }

    fn identified() -> SessionContext {
        SessionContext::with_device("356307042441013")
    }

    #[test]
    fn handshake_binds_imei() {
        let decoded = TeltonikaDecoder
            .decode(&bytes(HANDSHAKE), &SessionContext::default())
            .unwrap();
        assert_eq!(decoded.update.identity.as_deref(), Some("356307042441013"));
        assert_eq!(decoded.ack.unwrap().bytes, vec![0x01]);
        assert!(matches!(
            decoded.update.state,
            Some(DecoderState::Teltonika(TeltonikaState {
                handshake_done: true,
                ..
            }))
        ));
    }

    #[test]
    fn codec8_batch_in_transmission_order() {
        let decoded = TeltonikaDecoder
            .decode(&bytes(CODEC8_TWO_RECORDS), &identified())
            .unwrap();
        assert_eq!(decoded.fixes.len(), 2);
        let first = &decoded.fixes[0];
        assert_eq!(first.timestamp_ms, 1_710_498_030_000);
        assert!((first.latitude - 54.6872).abs() < 1e-7);
        assert!((first.longitude - 25.2797).abs() < 1e-7);
        assert_eq!(first.altitude_m, Some(120.0));
        assert_eq!(first.heading_deg, 270.0);
        assert_eq!(first.speed_kmh, 48.0);
        assert_eq!(first.ignition, Some(true));
        assert_eq!(first.digital_inputs, Some(1));
        assert_eq!(first.hdop, Some(1.2));
        assert_eq!(first.odometer_m, Some(54_321.0));
        assert!(first.gps_valid);

        let second = &decoded.fixes[1];
        assert_eq!(second.timestamp_ms, 1_710_498_040_000);
        assert!(!second.gps_valid);
        assert_eq!(second.alarm_code.as_deref(), Some("panic"));

        assert_eq!(decoded.ack.unwrap().bytes, vec![0, 0, 0, 2]);
    }

    #[test]
    fn codec8_reference_packet() {
        let decoded = TeltonikaDecoder
            .decode(&bytes(CODEC8_DOC_SAMPLE), &identified())
            .unwrap();
        assert_eq!(decoded.fixes.len(), 1);
        assert_eq!(decoded.fixes[0].timestamp_ms, 1_560_161_086_000);
        assert_eq!(decoded.fixes[0].digital_inputs, Some(1));
        assert_eq!(decoded.ack.unwrap().bytes, vec![0, 0, 0, 1]);
    }

    #[test]
    fn codec8_extended_and_16() {
        let extended = TeltonikaDecoder
            .decode(&bytes(CODEC8E), &identified())
            .unwrap();
        let fix = &extended.fixes[0];
        assert!((fix.latitude + 33.8688).abs() < 1e-7);
        assert_eq!(fix.ignition, Some(false));
        assert_eq!(fix.fuel_percent, Some(55.0));

        let codec16 = TeltonikaDecoder
            .decode(&bytes(CODEC16), &identified())
            .unwrap();
        let fix = &codec16.fixes[0];
        assert!((fix.longitude + 74.006).abs() < 1e-7);
        assert_eq!(fix.ignition, Some(true));
        assert_eq!(
            codec16.update.state,
            Some(DecoderState::Teltonika(TeltonikaState {
                handshake_done: false,
                last_codec: Some(CODEC_16),
                last_record_count: 1,
            }))
        );
    }

    #[test]
    fn avl_before_handshake_is_unidentified() {
        let err = TeltonikaDecoder
            .decode(&bytes(CODEC8_DOC_SAMPLE), &SessionContext::default())
            .unwrap_err();
        assert_eq!(err, DecodeError::Unidentified);
    }

    #[test]
    fn crc_mismatch_rejects_whole_packet() {
        let mut frame = bytes(CODEC8_TWO_RECORDS);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        let err = TeltonikaDecoder.decode(&frame, &identified()).unwrap_err();
        assert!(err.is_checksum());
    }

    #[test]
    fn record_count_mismatch_is_integrity_failure() {
        let mut frame = bytes(CODEC8_TWO_RECORDS);
        let crc_at = frame.len() - 4;
        frame[crc_at - 1] = 3;
        let crc = u32::from(crc16_arc(&frame[8..crc_at])).to_be_bytes();
        frame[crc_at..].copy_from_slice(&crc);
        let err = TeltonikaDecoder.decode(&frame, &identified()).unwrap_err();
        assert_eq!(
            err,
            DecodeError::CountMismatch {
                declared: 2,
                trailer: 3
            }
        );
        assert!(err.is_integrity());
        assert!(!err.is_checksum());
    }
}
