//! 协议相关类型定义

use bytes::Bytes;
use domain::{AckFrame, DecodedFix, ProtocolTag};

/// 分帧器输出的一帧完整报文
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub protocol: ProtocolTag,
    pub bytes: Bytes,
}

impl Frame {
    pub fn new(protocol: ProtocolTag, bytes: impl Into<Bytes>) -> Self {
        Self {
            protocol,
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// 解码器可见的会话上下文
///
/// 由会话登记表按连接保存，解码器只读；状态变更通过 [`SessionUpdate`] 回写。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionContext {
    /// 已绑定的设备身份（登录帧之后才有）
    pub device_id: Option<String>,
    /// 协议私有的连续状态
    pub state: DecoderState,
}

impl SessionContext {
    pub fn with_device(device_id: impl Into<String>) -> Self {
        Self {
            device_id: Some(device_id.into()),
            state: DecoderState::Empty,
        }
    }

    /// 应用解码器返回的状态变更
    pub fn apply(&mut self, update: &SessionUpdate) {
        if let Some(identity) = &update.identity {
            self.device_id = Some(identity.clone());
        }
        if let Some(state) = &update.state {
            self.state = state.clone();
        }
    }
}

/// 协议私有的会话状态
#[derive(Debug, Clone, Default, PartialEq)]
pub enum DecoderState {
    #[default]
    Empty,
    Gt06(Gt06State),
    Teltonika(TeltonikaState),
    Ruptela(RuptelaState),
    Meitrack(MeitrackState),
    Queclink(QueclinkState),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Gt06State {
    pub last_serial: Option<u16>,
    /// 最近一次心跳报告的 ACC 状态
    pub ignition: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeltonikaState {
    pub handshake_done: bool,
    pub last_codec: Option<u8>,
    pub last_record_count: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuptelaState {
    /// 终端声明的剩余待传记录数
    pub records_left: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeitrackState {
    /// 终端缓存中尚未上传的记录数
    pub remaining_cached: u32,
    pub last_flag: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueclinkState {
    pub protocol_version: Option<String>,
}

/// 解码器对会话的变更请求
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionUpdate {
    /// 本帧确立的设备身份
    pub identity: Option<String>,
    /// 替换后的协议状态
    pub state: Option<DecoderState>,
}

impl SessionUpdate {
    pub fn is_empty(&self) -> bool {
        self.identity.is_none() && self.state.is_none()
    }
}

/// 帧内单点解析失败的记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixDrop {
    /// 该点在帧内的序号（从 0 开始）
    pub index: usize,
    pub reason: String,
}

/// 单帧解码结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decoded {
    pub fixes: Vec<DecodedFix>,
    pub dropped: Vec<FixDrop>,
    pub ack: Option<AckFrame>,
    pub update: SessionUpdate,
}

impl Decoded {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_fixes(fixes: Vec<DecodedFix>) -> Self {
        Self {
            fixes,
            ..Self::default()
        }
    }

    pub fn ack(mut self, ack: AckFrame) -> Self {
        self.ack = Some(ack);
        self
    }

    pub fn identity(mut self, device_id: impl Into<String>) -> Self {
        self.update.identity = Some(device_id.into());
        self
    }

    pub fn state(mut self, state: DecoderState) -> Self {
        self.update.state = Some(state);
        self
    }

    pub fn drop_fix(&mut self, index: usize, reason: impl Into<String>) {
        self.dropped.push(FixDrop {
            index,
            reason: reason.into(),
        });
    }
}
