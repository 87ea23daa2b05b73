//! MQTT 发布下游（围栏、告警等消费者订阅）

use crate::error::SinkError;
use crate::sink::TelemetrySink;
use async_trait::async_trait;
use domain::TelemetryRecord;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use std::time::Duration;
use tracing::warn;

/// MQTT 发布配置。
#[derive(Debug, Clone)]
pub struct MqttSinkConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// topic = `{prefix}/{device_id}`
    pub topic_prefix: String,
    pub qos: u8,
}

#[derive(Clone)]
pub struct MqttTelemetrySink {
    client: AsyncClient,
    topic_prefix: String,
    qos: QoS,
}

impl MqttTelemetrySink {
    pub fn connect(
        config: MqttSinkConfig,
    ) -> Result<(Self, tokio::task::JoinHandle<()>), SinkError> {
        if config.host.trim().is_empty() {
            return Err(SinkError::Publish("mqtt host is empty".to_string()));
        }
        let client_id = format!("fleet-gateway-publish-{}", uuid::Uuid::new_v4());
        let mut options = MqttOptions::new(client_id, config.host, config.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) = (config.username, config.password) {
            options.set_credentials(username, password);
        }
        let (client, mut eventloop) = AsyncClient::new(options, 1024);
        let handle = tokio::spawn(async move {
            loop {
                if let Err(err) = eventloop.poll().await {
                    warn!(target: "fleet.pipeline", error = %err, "mqtt_eventloop_error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        });
        Ok((
            Self {
                client,
                topic_prefix: config.topic_prefix,
                qos: qos_from_u8(config.qos),
            },
            handle,
        ))
    }

    fn topic_for(&self, device_id: &str) -> String {
        topic(&self.topic_prefix, device_id)
    }
}

#[async_trait]
impl TelemetrySink for MqttTelemetrySink {
    async fn write(&self, record: &TelemetryRecord) -> Result<(), SinkError> {
        let payload =
            serde_json::to_vec(record).map_err(|err| SinkError::Encode(err.to_string()))?;
        self.client
            .publish(self.topic_for(&record.device_id), self.qos, false, payload)
            .await
            .map_err(|err| SinkError::Publish(err.to_string()))
    }
}

fn topic(prefix: &str, device_id: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), device_id)
}

fn qos_from_u8(value: u8) -> QoS {
    match value {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}
