use crate::registry::ConnectionId;

/// 会话操作错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("connection {0} is not registered")]
    NotRegistered(ConnectionId),
    #[error("connection {connection} already bound to {bound}, refused {attempted}")]
    IdentityConflict {
        connection: ConnectionId,
        bound: String,
        attempted: String,
    },
    #[error("empty device identity")]
    EmptyIdentity,
}
