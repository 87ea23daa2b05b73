//! 协议识别
//!
//! 按固定顺序逐条匹配连接的首批字节。每条规则返回 Match / Partial / NoMatch，
//! 前面的规则仍处于 Partial 时不会让后面的 Match 生效，而是要求更多字节。

use domain::ProtocolTag;

/// 默认最多观察的字节数，超过仍无法判定即视为未知协议
pub const DEFAULT_MAX_PROBE: usize = 64;

/// 识别结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    Detected(ProtocolTag),
    NeedMore,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleMatch {
    Match,
    Partial,
    NoMatch,
}

type Rule = fn(&[u8]) -> RuleMatch;

/// 规则顺序即优先级
const RULES: [(ProtocolTag, Rule); 9] = [
    (ProtocolTag::Gt06, gt06),
    (ProtocolTag::Tk103, tk103),
    (ProtocolTag::H02, h02),
    (ProtocolTag::Osmand, osmand),
    (ProtocolTag::Teltonika, teltonika),
    (ProtocolTag::Queclink, queclink),
    (ProtocolTag::Ruptela, ruptela),
    (ProtocolTag::Meitrack, meitrack),
    (ProtocolTag::Ytwl, ytwl),
];

/// 协议识别器
#[derive(Debug, Clone, Copy)]
pub struct ProtocolDetector {
    max_probe: usize,
}

impl Default for ProtocolDetector {
    fn default() -> Self {
        Self {
            max_probe: DEFAULT_MAX_PROBE,
        }
    }
}

impl ProtocolDetector {
    pub fn new(max_probe: usize) -> Self {
        Self { max_probe }
    }

    pub fn max_probe(&self) -> usize {
        self.max_probe
    }

    /// 识别协议；字节不足以消除歧义时返回 `NeedMore`
    pub fn detect(&self, bytes: &[u8]) -> Detection {
        if bytes.is_empty() {
            return Detection::NeedMore;
        }
        let probe = &bytes[..bytes.len().min(self.max_probe)];
        let mut pending = false;
        for (tag, rule) in RULES {
            match rule(probe) {
                RuleMatch::Match if !pending => return Detection::Detected(tag),
                RuleMatch::Match | RuleMatch::Partial => pending = true,
                RuleMatch::NoMatch => {}
            }
        }
        if pending && bytes.len() < self.max_probe {
            Detection::NeedMore
        } else {
            Detection::Unknown
        }
    }
}

/// 字面量前缀匹配
fn literal(input: &[u8], pattern: &[u8], ignore_case: bool) -> RuleMatch {
    let n = input.len().min(pattern.len());
    let same = if ignore_case {
        input[..n].eq_ignore_ascii_case(&pattern[..n])
    } else {
        input[..n] == pattern[..n]
    };
    match (same, input.len() >= pattern.len()) {
        (false, _) => RuleMatch::NoMatch,
        (true, true) => RuleMatch::Match,
        (true, false) => RuleMatch::Partial,
    }
}

/// 多个候选前缀取最优结果（Match > Partial > NoMatch）
fn any_literal(input: &[u8], patterns: &[&[u8]], ignore_case: bool) -> RuleMatch {
    let mut best = RuleMatch::NoMatch;
    for pattern in patterns {
        match literal(input, pattern, ignore_case) {
            RuleMatch::Match => return RuleMatch::Match,
            RuleMatch::Partial => best = RuleMatch::Partial,
            RuleMatch::NoMatch => {}
        }
    }
    best
}

fn gt06(input: &[u8]) -> RuleMatch {
    any_literal(input, &[&[0x78, 0x78], &[0x79, 0x79]], false)
}

fn tk103(input: &[u8]) -> RuleMatch {
    any_literal(input, &[b"imei:", b"##,imei:"], true)
}

fn h02(input: &[u8]) -> RuleMatch {
    literal(input, b"*HQ", false)
}

fn osmand(input: &[u8]) -> RuleMatch {
    any_literal(input, &[b"id=", b"deviceid="], false)
}

/// 四字节零前导（AVL 包）或 `00 len(15..=17)` + 纯数字 IMEI（握手包）
fn teltonika(input: &[u8]) -> RuleMatch {
    let zeros = literal(input, &[0, 0, 0, 0], false);
    if zeros != RuleMatch::NoMatch {
        return zeros;
    }
    if input[0] != 0 {
        return RuleMatch::NoMatch;
    }
    if input.len() < 2 {
        return RuleMatch::Partial;
    }
    let len = usize::from(input[1]);
    if !(15..=17).contains(&len) {
        return RuleMatch::NoMatch;
    }
    let imei = &input[2..input.len().min(2 + len)];
    if !imei.iter().all(u8::is_ascii_digit) {
        return RuleMatch::NoMatch;
    }
    if imei.len() == len {
        RuleMatch::Match
    } else {
        RuleMatch::Partial
    }
}

fn queclink(input: &[u8]) -> RuleMatch {
    any_literal(input, &[b"+RESP:", b"+BUFF:", b"+ACK:"], false)
}

/// 两字节长度（9..=2048）后紧跟 0x00（IMEI 的最高字节）
fn ruptela(input: &[u8]) -> RuleMatch {
    match input.len() {
        1 => {
            if input[0] <= 0x08 {
                RuleMatch::Partial
            } else {
                RuleMatch::NoMatch
            }
        }
        _ => {
            let len = u16::from_be_bytes([input[0], input[1]]);
            if !(9..=2048).contains(&len) {
                RuleMatch::NoMatch
            } else if input.len() == 2 {
                RuleMatch::Partial
            } else if input[2] == 0x00 {
                RuleMatch::Match
            } else {
                RuleMatch::NoMatch
            }
        }
    }
}

fn meitrack(input: &[u8]) -> RuleMatch {
    literal(input, b"$$", false)
}

/// `*` + 1..=20 位数字 + `,`
fn ytwl(input: &[u8]) -> RuleMatch {
    if input[0] != b'*' {
        return RuleMatch::NoMatch;
    }
    let digits = input[1..]
        .iter()
        .take_while(|byte| byte.is_ascii_digit())
        .count();
    if digits > 20 {
        return RuleMatch::NoMatch;
    }
    match input.get(1 + digits) {
        None => RuleMatch::Partial,
        Some(b',') if digits > 0 => RuleMatch::Match,
        Some(_) => RuleMatch::NoMatch,
    }
}
