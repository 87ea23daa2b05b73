//! TCP 监听
//!
//! 接受连接前先拿并发许可，达到上限时 accept 等待而不是拒绝。
//! 每个连接持有根取消令牌的子令牌：空闲回收或进程退出都会让连接任务退出。

use crate::connection::{ConnectionShared, serve_connection};
use crate::{FixHandler, IngestError};
use fleet_protocol::{DEFAULT_MAX_PROBE, ProtocolDetector};
use fleet_session::SessionRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 连接排空的最长等待
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// TCP 监听配置
#[derive(Debug, Clone)]
pub struct TcpListenerConfig {
    pub addr: String,
    pub max_connections: usize,
    pub max_frame_buffer_bytes: usize,
    pub max_probe_bytes: usize,
    pub detect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for TcpListenerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:5023".to_string(),
            max_connections: 20_000,
            max_frame_buffer_bytes: 64 * 1024,
            max_probe_bytes: DEFAULT_MAX_PROBE,
            detect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(900),
            write_timeout: Duration::from_secs(3),
        }
    }
}

/// TCP 接入源
pub struct TcpListenerSource {
    listener: TcpListener,
    config: TcpListenerConfig,
    registry: Arc<SessionRegistry>,
}

impl TcpListenerSource {
    pub async fn bind(
        config: TcpListenerConfig,
        registry: Arc<SessionRegistry>,
    ) -> Result<Self, IngestError> {
        let listener = TcpListener::bind(&config.addr).await?;
        Ok(Self {
            listener,
            config,
            registry,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, IngestError> {
        Ok(self.listener.local_addr()?)
    }

    /// 运行接受循环，直到 `shutdown` 被取消
    pub async fn run(
        self,
        handler: Arc<dyn FixHandler>,
        shutdown: CancellationToken,
    ) -> Result<(), IngestError> {
        let max_connections = self.config.max_connections.max(1);
        let permits = Arc::new(Semaphore::new(max_connections));
        let shared = Arc::new(ConnectionShared {
            detector: ProtocolDetector::new(self.config.max_probe_bytes),
            max_frame_buffer_bytes: self.config.max_frame_buffer_bytes,
            detect_timeout: self.config.detect_timeout,
            read_timeout: self.config.read_timeout,
            write_timeout: self.config.write_timeout,
            registry: self.registry.clone(),
            handler,
        });
        info!(
            target: "fleet.ingest",
            addr = %self.listener.local_addr()?,
            max_connections,
            "tcp_listener_started"
        );

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let (stream, remote_addr) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        error!(target: "fleet.ingest", error = %err, "tcp_accept_failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                },
            };
            let shared = shared.clone();
            let cancel = shutdown.child_token();
            tokio::spawn(async move {
                serve_connection(stream, remote_addr, shared, cancel).await;
                drop(permit);
            });
        }

        info!(target: "fleet.ingest", "tcp_listener_stopping");
        let all = u32::try_from(max_connections).unwrap_or(u32::MAX);
        match tokio::time::timeout(DRAIN_TIMEOUT, permits.acquire_many(all)).await {
            Ok(_) => info!(target: "fleet.ingest", "tcp_listener_stopped"),
            Err(_) => warn!(
                target: "fleet.ingest",
                remaining = max_connections - permits.available_permits(),
                "tcp_connections_not_drained"
            ),
        }
        Ok(())
    }
}
