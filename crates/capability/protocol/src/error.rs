//! 协议错误类型定义

/// 分帧错误（连接级，发生即关闭连接）
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// 缓冲超过上限仍未拼出完整帧
    #[error("frame buffer overflow: {buffered} bytes buffered, limit {limit}")]
    Overflow { buffered: usize, limit: usize },

    /// 帧头声明的长度超过缓冲上限
    #[error("declared frame length {declared} exceeds limit {limit}")]
    Oversized { declared: usize, limit: usize },
}

/// 解码错误（帧级，丢弃该帧但保持连接）
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// 校验和 / CRC 不匹配，整帧作废
    #[error("checksum mismatch: expected {expected:#06x}, computed {computed:#06x}")]
    Checksum { expected: u32, computed: u32 },

    /// 帧头与帧尾声明的记录数不一致，整帧作废
    #[error("record count mismatch: header {declared}, trailer {trailer}")]
    CountMismatch { declared: u8, trailer: u8 },

    /// 帧长度不足以容纳声明的字段
    #[error("truncated frame")]
    Truncated,

    /// 字段格式错误
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// 协议内未支持的消息类型
    #[error("unsupported message: {0}")]
    Unsupported(String),

    /// 定位帧先于登录帧到达，无法确定设备身份
    #[error("device identity not established")]
    Unidentified,
}

impl DecodeError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    pub fn is_checksum(&self) -> bool {
        matches!(self, Self::Checksum { .. })
    }

    /// 帧完整性失败（校验和或记录数不一致），计入数据质量指标
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Checksum { .. } | Self::CountMismatch { .. })
    }
}

impl From<std::io::Error> for DecodeError {
    fn from(_: std::io::Error) -> Self {
        Self::Truncated
    }
}
