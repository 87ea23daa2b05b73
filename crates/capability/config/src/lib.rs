//! 网关运行配置加载。

use std::env;
use std::time::Duration;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 网关运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub tcp_addr: String,
    pub http_addr: String,
    pub max_connections: usize,
    pub max_frame_buffer_bytes: usize,
    pub detect_timeout_ms: u64,
    pub read_timeout_secs: u64,
    pub write_timeout_ms: u64,
    pub heartbeat_idle_secs: u64,
    pub silent_idle_secs: u64,
    pub sweep_interval_secs: u64,
    pub pipeline_shards: usize,
    pub pipeline_queue_capacity: usize,
    pub pipeline_batch_size: usize,
    pub submit_wait_ms: u64,
    pub sink_write_timeout_ms: u64,
    pub dedup_window_secs: u64,
    pub dedup_max_per_device: usize,
    pub max_speed_kmh: f64,
    pub max_future_skew_secs: u64,
    pub directory_cache_ttl_secs: u64,
    /// 设备目录单次查询的超时
    pub directory_timeout_ms: u64,
    pub redis_url: Option<String>,
    pub redis_key_prefix: String,
    pub redis_last_record_ttl_secs: u64,
    pub mqtt_publish_enabled: bool,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_topic_prefix: String,
    pub mqtt_qos: u8,
}

impl AppConfig {
    /// 从环境变量读取配置（全部带默认值）。
    pub fn from_env() -> Result<Self, ConfigError> {
        let tcp_addr = env::var("FLEET_TCP_ADDR").unwrap_or_else(|_| "0.0.0.0:5023".to_string());
        let http_addr = env::var("FLEET_HTTP_ADDR").unwrap_or_else(|_| "0.0.0.0:5055".to_string());
        let max_connections = read_usize_with_default("FLEET_MAX_CONNECTIONS", 20_000)?;
        let max_frame_buffer_bytes =
            read_usize_with_default("FLEET_MAX_FRAME_BUFFER_BYTES", 64 * 1024)?;
        let detect_timeout_ms = read_u64_with_default("FLEET_DETECT_TIMEOUT_MS", 5_000)?;
        let read_timeout_secs = read_u64_with_default("FLEET_READ_TIMEOUT_SECS", 900)?;
        let write_timeout_ms = read_u64_with_default("FLEET_WRITE_TIMEOUT_MS", 3_000)?;
        let heartbeat_idle_secs = read_u64_with_default("FLEET_HEARTBEAT_IDLE_SECS", 600)?;
        let silent_idle_secs = read_u64_with_default("FLEET_SILENT_IDLE_SECS", 300)?;
        let sweep_interval_secs = read_u64_with_default("FLEET_SWEEP_INTERVAL_SECS", 15)?;
        let pipeline_shards = read_usize_with_default("FLEET_PIPELINE_SHARDS", 8)?;
        let pipeline_queue_capacity =
            read_usize_with_default("FLEET_PIPELINE_QUEUE_CAPACITY", 4_096)?;
        let pipeline_batch_size = read_usize_with_default("FLEET_PIPELINE_BATCH_SIZE", 100)?;
        let submit_wait_ms = read_u64_with_default("FLEET_SUBMIT_WAIT_MS", 50)?;
        let sink_write_timeout_ms = read_u64_with_default("FLEET_SINK_WRITE_TIMEOUT_MS", 10_000)?;
        let dedup_window_secs = read_u64_with_default("FLEET_DEDUP_WINDOW_SECS", 900)?;
        let dedup_max_per_device = read_usize_with_default("FLEET_DEDUP_MAX_PER_DEVICE", 512)?;
        let max_speed_kmh = read_f64_with_default("FLEET_MAX_SPEED_KMH", 300.0)?;
        let max_future_skew_secs = read_u64_with_default("FLEET_MAX_FUTURE_SKEW_SECS", 86_400)?;
        let directory_cache_ttl_secs =
            read_u64_with_default("FLEET_DIRECTORY_CACHE_TTL_SECS", 300)?;
        let directory_timeout_ms = read_u64_with_default("FLEET_DIRECTORY_TIMEOUT_MS", 2_000)?;
        let redis_url = read_optional("FLEET_REDIS_URL");
        let redis_key_prefix =
            env::var("FLEET_REDIS_KEY_PREFIX").unwrap_or_else(|_| "fleet".to_string());
        let redis_last_record_ttl_secs = read_u64_with_default("FLEET_REDIS_LAST_TTL_SECS", 0)?;
        let mqtt_publish_enabled = read_bool_with_default("FLEET_MQTT_PUBLISH", false);
        let mqtt_host = env::var("FLEET_MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let mqtt_port = read_u16_with_default("FLEET_MQTT_PORT", 1883)?;
        let mqtt_username = read_optional("FLEET_MQTT_USERNAME");
        let mqtt_password = read_optional("FLEET_MQTT_PASSWORD");
        let mqtt_topic_prefix =
            env::var("FLEET_MQTT_TOPIC_PREFIX").unwrap_or_else(|_| "fleet/telemetry".to_string());
        let mqtt_qos = read_u8_with_default("FLEET_MQTT_QOS", 0)?;
        if mqtt_qos > 2 {
            return Err(ConfigError::Invalid(
                "FLEET_MQTT_QOS".to_string(),
                mqtt_qos.to_string(),
            ));
        }

        Ok(Self {
            tcp_addr,
            http_addr,
            max_connections,
            max_frame_buffer_bytes,
            detect_timeout_ms,
            read_timeout_secs,
            write_timeout_ms,
            heartbeat_idle_secs,
            silent_idle_secs,
            sweep_interval_secs,
            pipeline_shards,
            pipeline_queue_capacity,
            pipeline_batch_size,
            submit_wait_ms,
            sink_write_timeout_ms,
            dedup_window_secs,
            dedup_max_per_device,
            max_speed_kmh,
            max_future_skew_secs,
            directory_cache_ttl_secs,
            directory_timeout_ms,
            redis_url,
            redis_key_prefix,
            redis_last_record_ttl_secs,
            mqtt_publish_enabled,
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_topic_prefix,
            mqtt_qos,
        })
    }

    pub fn detect_timeout(&self) -> Duration {
        Duration::from_millis(self.detect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn submit_wait(&self) -> Duration {
        Duration::from_millis(self.submit_wait_ms)
    }

    pub fn sink_write_timeout(&self) -> Duration {
        Duration::from_millis(self.sink_write_timeout_ms.max(1))
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    pub fn heartbeat_idle(&self) -> Duration {
        Duration::from_secs(self.heartbeat_idle_secs)
    }

    pub fn silent_idle(&self) -> Duration {
        Duration::from_secs(self.silent_idle_secs)
    }

    pub fn directory_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.directory_cache_ttl_secs)
    }

    pub fn directory_timeout(&self) -> Duration {
        Duration::from_millis(self.directory_timeout_ms.max(1))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

fn read_u16_with_default(key: &str, default: u16) -> Result<u16, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u8_with_default(key: &str, default: u8) -> Result<u8, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u8>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_usize_with_default(key: &str, default: usize) -> Result<usize, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    match value.parse::<usize>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(ConfigError::Invalid(key.to_string(), value)),
    }
}

fn read_f64_with_default(key: &str, default: f64) -> Result<f64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    match value.parse::<f64>() {
        Ok(parsed) if parsed.is_finite() && parsed > 0.0 => Ok(parsed),
        _ => Err(ConfigError::Invalid(key.to_string(), value)),
    }
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        Err(_) => default,
    }
}
