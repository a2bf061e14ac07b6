//! Result publisher — fire-and-forget MQTT delivery.
//!
//! Verification results go to the configured topic; `<topic>/status`
//! carries a retained online/offline presence record with the offline
//! record doubling as the broker-side last will. Publish failures are
//! logged and swallowed, never surfaced to the verification path.

use facegate_core::VerificationOutcome;
use rumqttc::{AsyncClient, LastWill, MqttOptions, QoS};
use serde::Serialize;
use std::time::Duration;

const MQTT_CHANNEL_CAPACITY: usize = 16;
const MQTT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct StatusRecord {
    status: &'static str,
    timestamp: String,
}

pub struct Publisher {
    client: AsyncClient,
    topic: String,
}

impl Publisher {
    /// Create the client and spawn its event-loop driver task.
    ///
    /// Connection establishment is lazy; the driver reconnects forever and
    /// only logs failures.
    pub fn connect(host: &str, port: u16, topic: &str) -> Self {
        let client_id = format!("facegate-{}", uuid::Uuid::new_v4().simple());
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_last_will(LastWill::new(
            format!("{topic}/status"),
            br#"{"status":"offline"}"#.to_vec(),
            QoS::AtLeastOnce,
            true,
        ));

        let (client, mut eventloop) = AsyncClient::new(options, MQTT_CHANNEL_CAPACITY);

        let broker = format!("{host}:{port}");
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(event) => tracing::trace!(?event, "mqtt event"),
                    Err(error) => {
                        tracing::warn!(broker = %broker, %error, "mqtt connection error");
                        tokio::time::sleep(MQTT_RECONNECT_DELAY).await;
                    }
                }
            }
        });

        Self {
            client,
            topic: topic.to_string(),
        }
    }

    /// Publish a verification result. Errors are logged and swallowed.
    pub async fn publish_outcome(&self, outcome: &VerificationOutcome) {
        let payload = match serde_json::to_vec(outcome) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(%error, "failed to serialize verification outcome");
                return;
            }
        };
        if let Err(error) = self
            .client
            .publish(&self.topic, QoS::AtMostOnce, false, payload)
            .await
        {
            tracing::warn!(%error, topic = %self.topic, "failed to publish verification outcome");
        } else {
            tracing::debug!(
                user = %outcome.user,
                verified = outcome.verified,
                "published verification outcome"
            );
        }
    }

    /// Flush pending messages and disconnect from the broker.
    pub async fn disconnect(&self) {
        if let Err(error) = self.client.disconnect().await {
            tracing::warn!(%error, "mqtt disconnect failed");
        }
    }

    /// Publish a retained online/offline presence record on `<topic>/status`.
    pub async fn publish_status(&self, online: bool) {
        let record = StatusRecord {
            status: if online { "online" } else { "offline" },
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        let payload = match serde_json::to_vec(&record) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(%error, "failed to serialize status record");
                return;
            }
        };
        let status_topic = format!("{}/status", self.topic);
        if let Err(error) = self
            .client
            .publish(&status_topic, QoS::AtLeastOnce, true, payload)
            .await
        {
            tracing::warn!(%error, topic = %status_topic, "failed to publish status record");
        }
    }
}
