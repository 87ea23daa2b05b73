/// Pipeline 提交错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("pipeline closed")]
    Closed,
}

/// 下游写入错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("publish error: {0}")]
    Publish(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("write timed out after {0} ms")]
    Timeout(u64),
}
