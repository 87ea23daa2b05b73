use crate::registry::SessionRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// 启动空闲会话回收任务，`shutdown` 取消后退出
pub fn spawn_sweeper(
    registry: Arc<SessionRegistry>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let evicted = registry.evict_idle(domain::now_epoch_ms());
            if !evicted.is_empty() {
                fleet_telemetry::record_sessions_evicted(evicted.len() as u64);
            }
            fleet_telemetry::set_active_sessions(registry.len() as u64);
        }
        info!(target: "fleet.session", "session_sweeper_stopped");
    })
}
