//! 会话能力模块
//!
//! 每个存活的 TCP 连接在 [`SessionRegistry`] 中有且只有一条记录：
//! 识别出的协议、绑定的设备身份、解码器连续状态与最近活动时间。
//!
//! - 身份绑定幂等：同一身份重复绑定无副作用，不同身份返回
//!   [`SessionError::IdentityConflict`]，由连接任务关闭连接。
//! - 空闲回收由单个周期任务（[`spawn_sweeper`]）完成，不为每个连接设定时器；
//!   被回收的连接通过其 `CancellationToken` 通知连接任务退出。

mod error;
mod registry;
mod sweeper;

pub use error::SessionError;
pub use registry::{ConnectionId, IdlePolicy, Session, SessionRegistry};
pub use sweeper::spawn_sweeper;
