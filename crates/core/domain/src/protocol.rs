use serde::{Deserialize, Serialize};
use std::fmt;

/// 终端协议族标签。
///
/// 连接一旦识别出协议即不再变更；`Unknown` 仅用于统计与日志。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolTag {
    Gt06,
    Tk103,
    H02,
    Osmand,
    Teltonika,
    Queclink,
    Ruptela,
    Meitrack,
    Ytwl,
    Unknown,
}

impl ProtocolTag {
    /// 全部标签（含 Unknown），顺序与 `index()` 一致。
    pub const ALL: [ProtocolTag; 10] = [
        ProtocolTag::Gt06,
        ProtocolTag::Tk103,
        ProtocolTag::H02,
        ProtocolTag::Osmand,
        ProtocolTag::Teltonika,
        ProtocolTag::Queclink,
        ProtocolTag::Ruptela,
        ProtocolTag::Meitrack,
        ProtocolTag::Ytwl,
        ProtocolTag::Unknown,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolTag::Gt06 => "gt06",
            ProtocolTag::Tk103 => "tk103",
            ProtocolTag::H02 => "h02",
            ProtocolTag::Osmand => "osmand",
            ProtocolTag::Teltonika => "teltonika",
            ProtocolTag::Queclink => "queclink",
            ProtocolTag::Ruptela => "ruptela",
            ProtocolTag::Meitrack => "meitrack",
            ProtocolTag::Ytwl => "ytwl",
            ProtocolTag::Unknown => "unknown",
        }
    }

    /// 指标数组下标。
    pub fn index(&self) -> usize {
        match self {
            ProtocolTag::Gt06 => 0,
            ProtocolTag::Tk103 => 1,
            ProtocolTag::H02 => 2,
            ProtocolTag::Osmand => 3,
            ProtocolTag::Teltonika => 4,
            ProtocolTag::Queclink => 5,
            ProtocolTag::Ruptela => 6,
            ProtocolTag::Meitrack => 7,
            ProtocolTag::Ytwl => 8,
            ProtocolTag::Unknown => 9,
        }
    }

    /// 协议是否带周期心跳帧（决定空闲回收超时的长短）。
    pub fn has_heartbeat(&self) -> bool {
        matches!(
            self,
            ProtocolTag::Gt06 | ProtocolTag::Tk103 | ProtocolTag::H02 | ProtocolTag::Queclink
        )
    }
}

impl fmt::Display for ProtocolTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_matches_all_order() {
        for (position, tag) in ProtocolTag::ALL.iter().enumerate() {
            assert_eq!(tag.index(), position);
        }
    }

    #[test]
    fn heartbeat_classes() {
        assert!(ProtocolTag::Gt06.has_heartbeat());
        assert!(!ProtocolTag::Teltonika.has_heartbeat());
        assert!(!ProtocolTag::Osmand.has_heartbeat());
    }
}
