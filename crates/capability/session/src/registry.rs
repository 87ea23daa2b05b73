//! 会话登记表

use crate::error::SessionError;
use dashmap::DashMap;
use domain::ProtocolTag;
use fleet_protocol::{SessionContext, SessionUpdate};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub type ConnectionId = u64;

/// 空闲超时策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdlePolicy {
    /// 尚未识别协议的连接
    pub detect_timeout: Duration,
    /// 有心跳帧的协议（GT06 / TK103 / H02 / Queclink）
    pub heartbeat_idle: Duration,
    /// 无心跳帧的协议
    pub silent_idle: Duration,
}

impl Default for IdlePolicy {
    fn default() -> Self {
        Self {
            detect_timeout: Duration::from_secs(5),
            heartbeat_idle: Duration::from_secs(600),
            silent_idle: Duration::from_secs(300),
        }
    }
}

impl IdlePolicy {
    pub fn timeout_for(&self, protocol: Option<ProtocolTag>) -> Duration {
        match protocol {
            None => self.detect_timeout,
            Some(tag) if tag.has_heartbeat() => self.heartbeat_idle,
            Some(_) => self.silent_idle,
        }
    }
}

/// 会话快照（对外只读视图）
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub connection_id: ConnectionId,
    pub remote_addr: SocketAddr,
    pub protocol: Option<ProtocolTag>,
    pub device_id: Option<String>,
    pub connected_at_ms: i64,
    pub last_activity_ms: i64,
}

struct Entry {
    remote_addr: SocketAddr,
    protocol: Option<ProtocolTag>,
    context: SessionContext,
    connected_at_ms: i64,
    last_activity_ms: i64,
    cancel: CancellationToken,
}

impl Entry {
    fn snapshot(&self, connection_id: ConnectionId) -> Session {
        Session {
            connection_id,
            remote_addr: self.remote_addr,
            protocol: self.protocol,
            device_id: self.context.device_id.clone(),
            connected_at_ms: self.connected_at_ms,
            last_activity_ms: self.last_activity_ms,
        }
    }
}

/// 存活连接登记表
///
/// 以连接 ID 为主键，另维护设备 ID → 连接 ID 的索引。两张表都是 `DashMap`，
/// 按 key 哈希分片加锁。
pub struct SessionRegistry {
    next_id: AtomicU64,
    entries: DashMap<ConnectionId, Entry>,
    devices: DashMap<String, ConnectionId>,
    policy: IdlePolicy,
}

impl SessionRegistry {
    pub fn new(policy: IdlePolicy) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: DashMap::new(),
            devices: DashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> IdlePolicy {
        self.policy
    }

    /// 登记新连接，返回连接 ID
    pub fn register(
        &self,
        remote_addr: SocketAddr,
        cancel: CancellationToken,
        now_ms: i64,
    ) -> ConnectionId {
        let connection_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            connection_id,
            Entry {
                remote_addr,
                protocol: None,
                context: SessionContext::default(),
                connected_at_ms: now_ms,
                last_activity_ms: now_ms,
                cancel,
            },
        );
        connection_id
    }

    /// 记录识别出的协议；已有协议时不覆盖
    pub fn set_protocol(&self, connection_id: ConnectionId, protocol: ProtocolTag) {
        if let Some(mut entry) = self.entries.get_mut(&connection_id)
            && entry.protocol.is_none()
        {
            entry.protocol = Some(protocol);
        }
    }

    /// 绑定设备身份
    pub fn bind(
        &self,
        connection_id: ConnectionId,
        identity: &str,
    ) -> Result<Session, SessionError> {
        let identity = identity.trim();
        if identity.is_empty() {
            return Err(SessionError::EmptyIdentity);
        }
        let session = {
            let mut entry = self
                .entries
                .get_mut(&connection_id)
                .ok_or(SessionError::NotRegistered(connection_id))?;
            match entry.context.device_id.as_deref() {
                Some(bound) if bound == identity => return Ok(entry.snapshot(connection_id)),
                Some(bound) => {
                    return Err(SessionError::IdentityConflict {
                        connection: connection_id,
                        bound: bound.to_string(),
                        attempted: identity.to_string(),
                    });
                }
                None => {}
            }
            entry.context.device_id = Some(identity.to_string());
            entry.snapshot(connection_id)
        };

        if let Some(previous) = self.devices.insert(identity.to_string(), connection_id)
            && previous != connection_id
        {
            debug!(
                target: "fleet.session",
                device_id = %identity,
                previous_connection = previous,
                connection_id,
                "device_rebound"
            );
        }
        info!(
            target: "fleet.session",
            device_id = %identity,
            connection_id,
            protocol = ?session.protocol,
            "session_bound"
        );
        Ok(session)
    }

    /// 查询会话；未绑定身份的连接返回 `None`
    pub fn lookup(&self, connection_id: ConnectionId) -> Option<Session> {
        let entry = self.entries.get(&connection_id)?;
        entry.context.device_id.as_ref()?;
        Some(entry.snapshot(connection_id))
    }

    /// 按设备 ID 查询其当前连接的会话
    pub fn lookup_device(&self, device_id: &str) -> Option<Session> {
        let connection_id = *self.devices.get(device_id)?;
        self.lookup(connection_id)
    }

    /// 解码器上下文副本
    pub fn context(&self, connection_id: ConnectionId) -> Option<SessionContext> {
        self.entries
            .get(&connection_id)
            .map(|entry| entry.context.clone())
    }

    /// 应用解码结果中的会话变更：先绑定身份，再替换协议状态
    pub fn apply_update(
        &self,
        connection_id: ConnectionId,
        update: &SessionUpdate,
    ) -> Result<(), SessionError> {
        if let Some(identity) = update.identity.as_deref() {
            self.bind(connection_id, identity)?;
        }
        if let Some(state) = &update.state {
            let mut entry = self
                .entries
                .get_mut(&connection_id)
                .ok_or(SessionError::NotRegistered(connection_id))?;
            entry.context.state = state.clone();
        }
        Ok(())
    }

    /// 刷新最近活动时间
    pub fn touch(&self, connection_id: ConnectionId, now_ms: i64) {
        if let Some(mut entry) = self.entries.get_mut(&connection_id) {
            entry.last_activity_ms = entry.last_activity_ms.max(now_ms);
        }
    }

    /// 连接关闭时移除会话
    pub fn remove(&self, connection_id: ConnectionId) -> Option<Session> {
        let (_, entry) = self.entries.remove(&connection_id)?;
        if let Some(device_id) = entry.context.device_id.as_deref() {
            self.devices
                .remove_if(device_id, |_, owner| *owner == connection_id);
        }
        Some(entry.snapshot(connection_id))
    }

    /// 回收空闲超时的会话并取消其连接任务
    pub fn evict_idle(&self, now_ms: i64) -> Vec<Session> {
        let expired: Vec<ConnectionId> = self
            .entries
            .iter()
            .filter(|item| {
                let timeout = self.policy.timeout_for(item.protocol);
                let limit = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
                now_ms.saturating_sub(item.last_activity_ms) > limit
            })
            .map(|item| *item.key())
            .collect();

        let mut evicted = Vec::with_capacity(expired.len());
        for connection_id in expired {
            let cancel = self
                .entries
                .get(&connection_id)
                .map(|entry| entry.cancel.clone());
            if let Some(session) = self.remove(connection_id) {
                if let Some(cancel) = cancel {
                    cancel.cancel();
                }
                warn!(
                    target: "fleet.session",
                    connection_id,
                    protocol = ?session.protocol,
                    device_id = session.device_id.as_deref().unwrap_or("-"),
                    idle_ms = now_ms.saturating_sub(session.last_activity_ms),
                    reason = "idle_timeout",
                    "session_evicted"
                );
                evicted.push(session);
            }
        }
        evicted
    }

    /// 当前全部会话（含未识别/未绑定的连接）
    pub fn sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .entries
            .iter()
            .map(|item| item.snapshot(*item.key()))
            .collect();
        sessions.sort_by_key(|session| session.connection_id);
        sessions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(IdlePolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_protocol::{DecoderState, RuptelaState};

    fn addr() -> SocketAddr {
        "10.0.0.7:40100".parse().unwrap()
    }

    #[test]
    fn lookup_requires_binding() {
        let registry = SessionRegistry::default();
        let id = registry.register(addr(), CancellationToken::new(), 0);
        assert!(registry.lookup(id).is_none());
        assert_eq!(registry.sessions().len(), 1);

        registry.set_protocol(id, ProtocolTag::Gt06);
        let session = registry.bind(id, "864180030000001").unwrap();
        assert_eq!(session.protocol, Some(ProtocolTag::Gt06));
        assert_eq!(
            registry.lookup(id).unwrap().device_id.as_deref(),
            Some("864180030000001")
        );
        assert_eq!(
            registry.lookup_device("864180030000001").unwrap().connection_id,
            id
        );
    }

    #[test]
    fn protocol_is_assigned_once() {
        let registry = SessionRegistry::default();
        let id = registry.register(addr(), CancellationToken::new(), 0);
        registry.set_protocol(id, ProtocolTag::H02);
        registry.set_protocol(id, ProtocolTag::Ytwl);
        assert_eq!(registry.sessions()[0].protocol, Some(ProtocolTag::H02));
    }

    #[test]
    fn rebinding_same_identity_is_noop() {
        let registry = SessionRegistry::default();
        let id = registry.register(addr(), CancellationToken::new(), 0);
        let first = registry.bind(id, "123").unwrap();
        let second = registry.bind(id, "123").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn different_identity_conflicts() {
        let registry = SessionRegistry::default();
        let id = registry.register(addr(), CancellationToken::new(), 0);
        registry.bind(id, "123").unwrap();
        assert_eq!(
            registry.bind(id, "456").unwrap_err(),
            SessionError::IdentityConflict {
                connection: id,
                bound: "123".to_string(),
                attempted: "456".to_string(),
            }
        );
        assert_eq!(registry.lookup(id).unwrap().device_id.as_deref(), Some("123"));
    }

    #[test]
    fn bind_unknown_connection_or_empty_identity() {
        let registry = SessionRegistry::default();
        assert_eq!(
            registry.bind(99, "123").unwrap_err(),
            SessionError::NotRegistered(99)
        );
        let id = registry.register(addr(), CancellationToken::new(), 0);
        assert_eq!(registry.bind(id, "  ").unwrap_err(), SessionError::EmptyIdentity);
    }

    #[test]
    fn apply_update_binds_and_stores_state() {
        let registry = SessionRegistry::default();
        let id = registry.register(addr(), CancellationToken::new(), 0);
        let update = SessionUpdate {
            identity: Some("863071014445404".to_string()),
            state: Some(DecoderState::Ruptela(RuptelaState { records_left: 3 })),
        };
        registry.apply_update(id, &update).unwrap();
        let context = registry.context(id).unwrap();
        assert_eq!(context.device_id.as_deref(), Some("863071014445404"));
        assert_eq!(
            context.state,
            DecoderState::Ruptela(RuptelaState { records_left: 3 })
        );
    }

    #[test]
    fn remove_keeps_newer_device_mapping() {
        let registry = SessionRegistry::default();
        let old = registry.register(addr(), CancellationToken::new(), 0);
        let new = registry.register(addr(), CancellationToken::new(), 0);
        registry.bind(old, "123").unwrap();
        registry.bind(new, "123").unwrap();
        registry.remove(old);
        assert_eq!(registry.lookup_device("123").unwrap().connection_id, new);
        registry.remove(new);
        assert!(registry.lookup_device("123").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn idle_timeouts_depend_on_protocol() {
        let policy = IdlePolicy {
            detect_timeout: Duration::from_secs(5),
            heartbeat_idle: Duration::from_secs(600),
            silent_idle: Duration::from_secs(300),
        };
        let registry = SessionRegistry::new(policy);
        let undetected_token = CancellationToken::new();
        let undetected = registry.register(addr(), undetected_token.clone(), 0);
        let gt06 = registry.register(addr(), CancellationToken::new(), 0);
        registry.set_protocol(gt06, ProtocolTag::Gt06);
        let teltonika_token = CancellationToken::new();
        let teltonika = registry.register(addr(), teltonika_token.clone(), 0);
        registry.set_protocol(teltonika, ProtocolTag::Teltonika);

        let evicted = registry.evict_idle(6_000);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].connection_id, undetected);
        assert!(undetected_token.is_cancelled());

        registry.touch(gt06, 200_000);
        let evicted = registry.evict_idle(301_000);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].connection_id, teltonika);
        assert!(teltonika_token.is_cancelled());

        assert!(registry.evict_idle(700_000).is_empty());
        assert_eq!(registry.evict_idle(800_001).len(), 1);
        assert!(registry.is_empty());
    }
}
