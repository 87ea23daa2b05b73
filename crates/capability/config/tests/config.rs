use fleet_config::{AppConfig, ConfigError};

#[test]
fn load_config_from_env() {
    // Rust 2024 中 set_var 需要显式标注 unsafe（测试进程内可控）。
    unsafe {
        std::env::set_var("FLEET_TCP_ADDR", "127.0.0.1:6023");
        std::env::set_var("FLEET_PIPELINE_SHARDS", "4");
        std::env::set_var("FLEET_MAX_SPEED_KMH", "250");
        std::env::set_var("FLEET_MQTT_PUBLISH", "on");
    }

    let config = AppConfig::from_env().expect("config");
    assert_eq!(config.tcp_addr, "127.0.0.1:6023");
    assert_eq!(config.http_addr, "0.0.0.0:5055");
    assert_eq!(config.pipeline_shards, 4);
    assert_eq!(config.max_frame_buffer_bytes, 64 * 1024);
    assert_eq!(config.dedup_window_secs, 900);
    assert_eq!(config.sink_write_timeout(), std::time::Duration::from_secs(10));
    assert_eq!(config.directory_timeout(), std::time::Duration::from_secs(2));
    assert!((config.max_speed_kmh - 250.0).abs() < f64::EPSILON);
    assert!(config.mqtt_publish_enabled);
    assert!(config.redis_url.is_none());

    // 非法值与 0 分片均拒绝。
    unsafe {
        std::env::set_var("FLEET_PIPELINE_SHARDS", "0");
    }
    match AppConfig::from_env() {
        Err(ConfigError::Invalid(key, value)) => {
            assert_eq!(key, "FLEET_PIPELINE_SHARDS");
            assert_eq!(value, "0");
        }
        other => panic!("unexpected result: {other:?}"),
    }

    unsafe {
        std::env::set_var("FLEET_PIPELINE_SHARDS", "4");
        std::env::set_var("FLEET_MQTT_QOS", "3");
    }
    assert!(matches!(
        AppConfig::from_env(),
        Err(ConfigError::Invalid(key, _)) if key == "FLEET_MQTT_QOS"
    ));
}
