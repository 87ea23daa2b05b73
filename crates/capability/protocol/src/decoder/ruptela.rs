//! Ruptela 二进制协议
//!
//! `len u16 | imei u64 | command u8 | payload | crc u16`，
//! CRC-16/KERMIT 覆盖 `imei..payload`。命令 1 为定位记录。

use super::ProtocolDecoder;
use crate::crc::crc16_kermit;
use crate::error::DecodeError;
use crate::types::{Decoded, DecoderState, RuptelaState, SessionContext};
use byteorder::{BigEndian, ReadBytesExt};
use domain::{AckFrame, DecodedFix, ProtocolTag};
use std::io::Cursor;

const COMMAND_RECORDS: u8 = 1;
const ACK_COMMAND: u8 = 0x64;
const ACK_ACCEPTED: u8 = 0x01;

const COORDINATE_SCALE: f64 = 10_000_000.0;
const PRIORITY_PANIC: u8 = 2;

const IO_IGNITION: u8 = 5;
const IO_ODOMETER: u8 = 65;
const IO_FUEL_PERCENT: u8 = 207;

pub struct RuptelaDecoder;

impl ProtocolDecoder for RuptelaDecoder {
    fn protocol(&self) -> ProtocolTag {
        ProtocolTag::Ruptela
    }

    fn decode(&self, frame: &[u8], _ctx: &SessionContext) -> Result<Decoded, DecodeError> {
        if frame.len() < 13 {
            return Err(DecodeError::Truncated);
        }
        let len = usize::from(u16::from_be_bytes([frame[0], frame[1]]));
        if frame.len() != len + 4 {
            return Err(DecodeError::Truncated);
        }
        let body = &frame[2..2 + len];
        let expected = u16::from_be_bytes([frame[2 + len], frame[3 + len]]);
        let computed = crc16_kermit(body);
        if expected != computed {
            return Err(DecodeError::Checksum {
                expected: u32::from(expected),
                computed: u32::from(computed),
            });
        }

        let mut cursor = Cursor::new(body);
        let imei = cursor.read_u64::<BigEndian>()?.to_string();
        let command = cursor.read_u8()?;
        let decoded = Decoded::empty().identity(imei.clone());
        if command != COMMAND_RECORDS {
            return Ok(decoded);
        }

        let records_left = cursor.read_u8()?;
        let count = cursor.read_u8()?;
        let mut decoded = decoded;
        for index in 0..usize::from(count) {
            let record = read_record(&mut cursor)?;
            match record.into_fix(&imei) {
                Ok(fix) => decoded.fixes.push(fix),
                Err(err) => decoded.drop_fix(index, err.to_string()),
            }
        }
        Ok(decoded
            .ack(ack())
            .state(DecoderState::Ruptela(RuptelaState { records_left })))
    }
}

/// `00 02 64 01 crc`
fn ack() -> AckFrame {
    let payload = [ACK_COMMAND, ACK_ACCEPTED];
    let mut bytes = vec![0x00, 0x02];
    bytes.extend_from_slice(&payload);
    bytes.extend_from_slice(&crc16_kermit(&payload).to_be_bytes());
    AckFrame::new(bytes)
}

struct Record {
    timestamp: u32,
    timestamp_ext: u8,
    priority: u8,
    longitude: i32,
    latitude: i32,
    altitude_dm: u16,
    angle: u16,
    satellites: u8,
    speed: u16,
    hdop: u8,
    io: Vec<(u8, u64)>,
}

impl Record {
    fn into_fix(self, imei: &str) -> Result<DecodedFix, DecodeError> {
        if self.timestamp == 0 {
            return Err(DecodeError::malformed("zero timestamp"));
        }
        let mut fix = DecodedFix::new(
            imei,
            ProtocolTag::Ruptela,
            i64::from(self.timestamp) * 1000,
            f64::from(self.latitude) / COORDINATE_SCALE,
            f64::from(self.longitude) / COORDINATE_SCALE,
        );
        fix.altitude_m = Some(f64::from(self.altitude_dm) / 10.0);
        fix.heading_deg = f64::from(self.angle) / 100.0;
        fix.satellites = Some(self.satellites);
        fix.speed_kmh = f64::from(self.speed);
        fix.hdop = Some(f64::from(self.hdop) / 10.0);
        fix.gps_valid = self.satellites > 0;
        fix.sequence_no = Some(u64::from(self.timestamp_ext));
        if self.priority == PRIORITY_PANIC {
            fix.alarm_code = Some("panic".to_string());
        }
        for (id, value) in self.io {
            match id {
                IO_IGNITION => fix.ignition = Some(value != 0),
                IO_ODOMETER => fix.odometer_m = Some(value as f64),
                IO_FUEL_PERCENT => fix.fuel_percent = Some(value as f64),
                _ => {}
            }
        }
        Ok(fix)
    }
}

fn read_record(cursor: &mut Cursor<&[u8]>) -> Result<Record, DecodeError> {
    let timestamp = cursor.read_u32::<BigEndian>()?;
    let timestamp_ext = cursor.read_u8()?;
    let priority = cursor.read_u8()?;
    let longitude = cursor.read_i32::<BigEndian>()?;
    let latitude = cursor.read_i32::<BigEndian>()?;
    let altitude_dm = cursor.read_u16::<BigEndian>()?;
    let angle = cursor.read_u16::<BigEndian>()?;
    let satellites = cursor.read_u8()?;
    let speed = cursor.read_u16::<BigEndian>()?;
    let hdop = cursor.read_u8()?;
    let _event = cursor.read_u8()?;

    let mut io = Vec::new();
    for width in [1usize, 2, 4, 8] {
        for _ in 0..cursor.read_u8()? {
            let id = cursor.read_u8()?;
            let value = match width {
                1 => u64::from(cursor.read_u8()?),
                2 => u64::from(cursor.read_u16::<BigEndian>()?),
                4 => u64::from(cursor.read_u32::<BigEndian>()?),
                _ => cursor.read_u64::<BigEndian>()?,
            };
            io.push((id, value));
        }
    }
    Ok(Record {
        timestamp,
        timestamp_ext,
        priority,
        longitude,
        latitude,
        altitude_dm,
        angle,
        satellites,
        speed,
        hdop,
        io,
    })
}
