//! 连接级分帧
//!
//! 协议未确定前只累积字节供识别器查看；确定后按协议边界规则切出完整帧：
//! - 长度前缀：Teltonika、Ruptela、Meitrack
//! - 起止标记 + 长度：GT06（`78 78`/`79 79` … `0D 0A`）
//! - 分隔符：TK103 `;`、H02 `#`、Queclink `$`、YTWL `#`、OsmAnd 换行
//!
//! 未消费字节超过上限即返回 [`FrameError::Overflow`]，由连接任务关闭连接。

use crate::error::FrameError;
use crate::types::Frame;
use bytes::{Buf, BytesMut};
use domain::ProtocolTag;

/// Teltonika 握手包 IMEI 长度上限
const TELTONIKA_MAX_HANDSHAKE: usize = 64;
/// Teltonika 心跳字节
const TELTONIKA_PING: u8 = 0xFF;
/// Ruptela 长度字段下限（IMEI 8 字节 + 命令 1 字节）
const RUPTELA_MIN_LEN: usize = 9;
/// Meitrack 长度字段最多位数
const MEITRACK_MAX_LEN_DIGITS: usize = 5;

pub struct FrameAssembler {
    buffer: BytesMut,
    protocol: Option<ProtocolTag>,
    max_buffer: usize,
    discarded: u64,
}

impl FrameAssembler {
    pub fn new(max_buffer: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(max_buffer.min(4096)),
            protocol: None,
            max_buffer,
            discarded: 0,
        }
    }

    pub fn protocol(&self) -> Option<ProtocolTag> {
        self.protocol
    }

    /// 当前未消费的字节数
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// 重新同步时丢弃的字节总数
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// 供识别器查看的首批字节
    pub fn probe(&self, max: usize) -> &[u8] {
        &self.buffer[..self.buffer.len().min(max)]
    }

    /// 绑定协议；只有第一次生效，返回是否生效
    pub fn assign(&mut self, tag: ProtocolTag) -> bool {
        if self.protocol.is_some() || tag == ProtocolTag::Unknown {
            return false;
        }
        self.protocol = Some(tag);
        true
    }

    /// 追加字节并切出所有完整帧
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Frame>, FrameError> {
        self.buffer.extend_from_slice(data);
        self.drain()
    }

    /// 从已缓冲字节中切出完整帧（协议刚确定时调用）
    pub fn drain(&mut self) -> Result<Vec<Frame>, FrameError> {
        let mut frames = Vec::new();
        if let Some(tag) = self.protocol {
            while let Some(bytes) = self.next_frame(tag)? {
                frames.push(Frame::new(tag, bytes));
            }
        }
        if self.buffer.len() > self.max_buffer {
            return Err(FrameError::Overflow {
                buffered: self.buffer.len(),
                limit: self.max_buffer,
            });
        }
        Ok(frames)
    }

    fn next_frame(&mut self, tag: ProtocolTag) -> Result<Option<BytesMut>, FrameError> {
        match tag {
            ProtocolTag::Tk103 => Ok(self.delimited(b';')),
            ProtocolTag::H02 | ProtocolTag::Ytwl => Ok(self.delimited(b'#')),
            ProtocolTag::Queclink => Ok(self.delimited(b'$')),
            ProtocolTag::Osmand => Ok(self.delimited(b'\n')),
            ProtocolTag::Gt06 => self.gt06(),
            ProtocolTag::Teltonika => self.teltonika(),
            ProtocolTag::Ruptela => self.ruptela(),
            ProtocolTag::Meitrack => self.meitrack(),
            ProtocolTag::Unknown => Ok(None),
        }
    }

    fn skip(&mut self, count: usize) {
        self.buffer.advance(count);
        self.discarded += count as u64;
    }

    fn check_declared(&self, declared: usize) -> Result<(), FrameError> {
        if declared > self.max_buffer {
            return Err(FrameError::Oversized {
                declared,
                limit: self.max_buffer,
            });
        }
        Ok(())
    }

    /// 分隔符帧：不含分隔符，去掉首尾空白，空帧跳过
    fn delimited(&mut self, delimiter: u8) -> Option<BytesMut> {
        loop {
            let position = self.buffer.iter().position(|byte| *byte == delimiter)?;
            let mut chunk = self.buffer.split_to(position + 1);
            chunk.truncate(position);
            let start = chunk
                .iter()
                .position(|byte| !byte.is_ascii_whitespace())
                .unwrap_or(chunk.len());
            let end = chunk
                .iter()
                .rposition(|byte| !byte.is_ascii_whitespace())
                .map_or(start, |index| index + 1);
            if start < end {
                chunk.truncate(end);
                chunk.advance(start);
                return Some(chunk);
            }
        }
    }

    fn gt06(&mut self) -> Result<Option<BytesMut>, FrameError> {
        loop {
            let start = self
                .buffer
                .windows(2)
                .position(|pair| pair == [0x78, 0x78] || pair == [0x79, 0x79]);
            match start {
                Some(0) => {}
                Some(offset) => self.skip(offset),
                None => {
                    // 保留末字节，它可能是下一个起始标记的前半
                    let keep = matches!(self.buffer.last(), Some(0x78 | 0x79)) as usize;
                    let drop = self.buffer.len().saturating_sub(keep);
                    self.skip(drop);
                    return Ok(None);
                }
            }
            let total = if self.buffer[0] == 0x78 {
                match self.buffer.get(2) {
                    Some(len) => usize::from(*len) + 5,
                    None => return Ok(None),
                }
            } else {
                if self.buffer.len() < 4 {
                    return Ok(None);
                }
                usize::from(u16::from_be_bytes([self.buffer[2], self.buffer[3]])) + 6
            };
            self.check_declared(total)?;
            if self.buffer.len() < total {
                return Ok(None);
            }
            if self.buffer[total - 2..total] != [0x0D, 0x0A] {
                self.skip(1);
                continue;
            }
            return Ok(Some(self.buffer.split_to(total)));
        }
    }

    fn teltonika(&mut self) -> Result<Option<BytesMut>, FrameError> {
        loop {
            let pings = self
                .buffer
                .iter()
                .take_while(|byte| **byte == TELTONIKA_PING)
                .count();
            if pings > 0 {
                self.buffer.advance(pings);
            }
            if self.buffer.len() < 2 {
                return Ok(None);
            }
            if self.buffer[0] == 0 && self.buffer[1] == 0 {
                if self.buffer.len() < 8 {
                    return Ok(None);
                }
                if self.buffer[2] != 0 || self.buffer[3] != 0 {
                    self.skip(1);
                    continue;
                }
                let data_len = u32::from_be_bytes([
                    self.buffer[4],
                    self.buffer[5],
                    self.buffer[6],
                    self.buffer[7],
                ]) as usize;
                let total = data_len.saturating_add(12);
                self.check_declared(total)?;
                if self.buffer.len() < total {
                    return Ok(None);
                }
                return Ok(Some(self.buffer.split_to(total)));
            }
            let len = usize::from(u16::from_be_bytes([self.buffer[0], self.buffer[1]]));
            if !(1..=TELTONIKA_MAX_HANDSHAKE).contains(&len) {
                self.skip(1);
                continue;
            }
            if self.buffer.len() < len + 2 {
                return Ok(None);
            }
            return Ok(Some(self.buffer.split_to(len + 2)));
        }
    }

    fn ruptela(&mut self) -> Result<Option<BytesMut>, FrameError> {
        loop {
            if self.buffer.len() < 2 {
                return Ok(None);
            }
            let len = usize::from(u16::from_be_bytes([self.buffer[0], self.buffer[1]]));
            if len < RUPTELA_MIN_LEN {
                self.skip(1);
                continue;
            }
            let total = len + 4;
            self.check_declared(total)?;
            if self.buffer.len() < total {
                return Ok(None);
            }
            return Ok(Some(self.buffer.split_to(total)));
        }
    }

    fn meitrack(&mut self) -> Result<Option<BytesMut>, FrameError> {
        loop {
            match self.buffer.windows(2).position(|pair| pair == b"$$") {
                Some(0) => {}
                Some(offset) => self.skip(offset),
                None => {
                    let keep = (self.buffer.last() == Some(&b'$')) as usize;
                    let drop = self.buffer.len().saturating_sub(keep);
                    self.skip(drop);
                    return Ok(None);
                }
            }
            // `$$` + 标志位 + 长度数字 + `,`
            let digits = self
                .buffer
                .iter()
                .skip(3)
                .take_while(|byte| byte.is_ascii_digit())
                .count();
            let Some(next) = self.buffer.get(3 + digits) else {
                if digits > MEITRACK_MAX_LEN_DIGITS {
                    self.skip(1);
                    continue;
                }
                return Ok(None);
            };
            if *next != b',' || digits == 0 || digits > MEITRACK_MAX_LEN_DIGITS {
                self.skip(1);
                continue;
            }
            let declared = self.buffer[3..3 + digits]
                .iter()
                .fold(0usize, |acc, byte| acc * 10 + usize::from(byte - b'0'));
            let total = 3 + digits + declared;
            self.check_declared(total)?;
            if self.buffer.len() < total {
                return Ok(None);
            }
            if declared < 2 || self.buffer[total - 2..total] != *b"\r\n" {
                self.skip(1);
                continue;
            }
            return Ok(Some(self.buffer.split_to(total)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GT06_LOGIN: &str = "78780D010864180030000001000102570D0A";

    fn assembler(tag: ProtocolTag) -> FrameAssembler {
        let mut assembler = FrameAssembler::new(1024);
        assert!(assembler.assign(tag));
        assembler
    }

    #[test]
    fn protocol_is_assigned_once() {
        let mut assembler = FrameAssembler::new(1024);
        assert!(!assembler.assign(ProtocolTag::Unknown));
        assert!(assembler.assign(ProtocolTag::Gt06));
        assert!(!assembler.assign(ProtocolTag::H02));
        assert_eq!(assembler.protocol(), Some(ProtocolTag::Gt06));
    }

    #[test]
    fn undetected_bytes_are_kept_for_probe() {
        let mut assembler = FrameAssembler::new(1024);
        let frames = assembler.feed(b"*HQ,42").unwrap();
        assert!(frames.is_empty());
        assert_eq!(assembler.probe(3), b"*HQ");
        assert_eq!(assembler.buffered(), 6);
    }

    #[test]
    fn gt06_split_across_reads() {
        let login = hex::decode(GT06_LOGIN).unwrap();
        let mut assembler = assembler(ProtocolTag::Gt06);
        assert!(assembler.feed(&login[..5]).unwrap().is_empty());
        let frames = assembler.feed(&login[5..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_bytes(), login.as_slice());
        assert_eq!(assembler.buffered(), 0);
    }

    #[test]
    fn gt06_resyncs_after_garbage() {
        let login = hex::decode(GT06_LOGIN).unwrap();
        let mut data = vec![0x01, 0x02, 0x03];
        data.extend_from_slice(&login);
        data.extend_from_slice(&login);
        let mut assembler = assembler(ProtocolTag::Gt06);
        let frames = assembler.feed(&data).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(assembler.discarded(), 3);
    }

    #[test]
    fn text_frames_trim_and_skip_empty() {
        let mut assembler = assembler(ProtocolTag::Tk103);
        let frames = assembler.feed(b"359586015829802;\r\n;imei:1,").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_bytes(), b"359586015829802");
        assert_eq!(assembler.buffered(), 7);
    }

    #[test]
    fn teltonika_handshake_then_avl() {
        let mut data = hex::decode("000F333536333037303432343431303133").unwrap();
        data.push(0xFF);
        data.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 3, 0x08, 0x00, 0x00, 0, 0, 0, 0]);
        let mut assembler = assembler(ProtocolTag::Teltonika);
        let frames = assembler.feed(&data).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].bytes.len(), 17);
        assert_eq!(frames[1].bytes.len(), 15);
    }

    #[test]
    fn teltonika_oversized_declaration_fails() {
        let mut assembler = assembler(ProtocolTag::Teltonika);
        let err = assembler
            .feed(&[0, 0, 0, 0, 0x00, 0x10, 0x00, 0x00])
            .unwrap_err();
        assert!(matches!(err, FrameError::Oversized { .. }));
    }

    #[test]
    fn meitrack_length_framing_allows_binary_payload() {
        let frame = b"$$A10,1,CCC\r*\r\n";
        // ",1,CCC\r*\r\n" 恰好 10 字节
        let mut assembler = assembler(ProtocolTag::Meitrack);
        let frames = assembler.feed(frame).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_bytes(), frame);
    }

    #[test]
    fn overflow_without_delimiter() {
        let mut assembler = FrameAssembler::new(16);
        assembler.assign(ProtocolTag::H02);
        assert!(assembler.feed(b"*HQ,0123456789").unwrap().is_empty());
        let err = assembler.feed(b"ABCDEFGH").unwrap_err();
        assert_eq!(
            err,
            FrameError::Overflow {
                buffered: 22,
                limit: 16
            }
        );
    }

    #[test]
    fn overflow_before_detection() {
        let mut assembler = FrameAssembler::new(4);
        assert!(assembler.feed(b"abcdef").is_err());
    }
}
