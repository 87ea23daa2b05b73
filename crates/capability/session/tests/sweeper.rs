use domain::now_epoch_ms;
use fleet_session::{IdlePolicy, SessionRegistry, spawn_sweeper};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn sweeper_evicts_idle_connection_and_cancels_it() {
    let registry = Arc::new(SessionRegistry::new(IdlePolicy {
        detect_timeout: Duration::from_millis(50),
        heartbeat_idle: Duration::from_secs(600),
        silent_idle: Duration::from_secs(300),
    }));
    let connection = CancellationToken::new();
    let id = registry.register(
        "127.0.0.1:9000".parse().unwrap(),
        connection.clone(),
        now_epoch_ms(),
    );
    let shutdown = CancellationToken::new();
    let handle = spawn_sweeper(registry.clone(), Duration::from_millis(20), shutdown.clone());

    tokio::time::timeout(Duration::from_secs(2), connection.cancelled())
        .await
        .expect("idle connection cancelled");
    assert!(registry.context(id).is_none());
    assert!(registry.is_empty());

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn sweeper_keeps_active_connection() {
    let registry = Arc::new(SessionRegistry::new(IdlePolicy {
        detect_timeout: Duration::from_secs(60),
        heartbeat_idle: Duration::from_secs(600),
        silent_idle: Duration::from_secs(300),
    }));
    let connection = CancellationToken::new();
    registry.register(
        "127.0.0.1:9001".parse().unwrap(),
        connection.clone(),
        now_epoch_ms(),
    );
    let shutdown = CancellationToken::new();
    let handle = spawn_sweeper(registry.clone(), Duration::from_millis(10), shutdown.clone());
    tokio::time::sleep(Duration::from_millis(60)).await;
    shutdown.cancel();
    handle.await.unwrap();
    assert!(!connection.is_cancelled());
    assert_eq!(registry.len(), 1);
}
