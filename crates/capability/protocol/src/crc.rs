//! 终端协议使用的 CRC-16 变体（反射多项式，查表计算）
//!
//! | 变体 | 多项式(反射) | 初值 | 输出异或 | 使用方 |
//! |------|-------------|------|---------|--------|
//! | X-25 | 0x8408 | 0xFFFF | 0xFFFF | GT06 |
//! | ARC | 0xA001 | 0x0000 | 0x0000 | Teltonika |
//! | KERMIT | 0x8408 | 0x0000 | 0x0000 | Ruptela |

const POLY_CCITT_REFLECTED: u16 = 0x8408;
const POLY_IBM_REFLECTED: u16 = 0xA001;

const fn reflected_table(poly: u16) -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ poly;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

const CCITT_TABLE: [u16; 256] = reflected_table(POLY_CCITT_REFLECTED);
const IBM_TABLE: [u16; 256] = reflected_table(POLY_IBM_REFLECTED);

#[inline]
fn update(table: &[u16; 256], init: u16, data: &[u8]) -> u16 {
    let mut crc = init;
    for &byte in data {
        let index = ((crc ^ u16::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ table[index];
    }
    crc
}

/// CRC-16/X-25
#[must_use]
pub fn crc16_x25(data: &[u8]) -> u16 {
    update(&CCITT_TABLE, 0xFFFF, data) ^ 0xFFFF
}

/// CRC-16/ARC（又称 CRC-16/IBM）
#[must_use]
pub fn crc16_arc(data: &[u8]) -> u16 {
    update(&IBM_TABLE, 0x0000, data)
}

/// CRC-16/KERMIT
#[must_use]
pub fn crc16_kermit(data: &[u8]) -> u16 {
    update(&CCITT_TABLE, 0x0000, data)
}

/// 逐字节累加（模 256），Meitrack 文本帧校验
#[must_use]
pub fn sum8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, byte| acc.wrapping_add(*byte))
}
