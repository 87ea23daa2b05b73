//! 存储层错误类型

/// 设备绑定查询与轨迹写入的失败原因。
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("record encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    /// 后端暂不可用（内存实现的故障注入也走这里）
    #[error("{0} unavailable")]
    Unavailable(&'static str),
    #[error("{0} lock poisoned")]
    Poisoned(&'static str),
}
