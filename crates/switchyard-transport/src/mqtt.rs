// [crates/switchyard-transport/src/mqtt.rs]
/*!
 * Real broker client built on `rumqttc`. The teacher's own
 * `prospector-infra-transport` crate turned out to be local Bincode framing,
 * not a broker client, so this module is the one deliberate new dependency
 * this workspace adds (see DESIGN.md) — `rumqttc` is the standard,
 * widely-used async MQTT client in the Rust ecosystem.
 */

use crate::errors::TransportError;
use crate::{InboundMessage, PublishOptions, Qos, TransportAdapter};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, instrument, warn};

fn to_rumqttc_qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

/// Matches a concrete topic (`device/AA:BB/telemetry`) against an MQTT
/// subscription pattern that may use `+` (single level) or `#` (trailing
/// multi-level) wildcards.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let pattern_parts: Vec<&str> = pattern.split('/').collect();
    let topic_parts: Vec<&str> = topic.split('/').collect();

    let mut pi = 0;
    let mut ti = 0;
    while pi < pattern_parts.len() {
        match pattern_parts[pi] {
            "#" => return true,
            "+" => {
                if ti >= topic_parts.len() {
                    return false;
                }
                pi += 1;
                ti += 1;
            }
            literal => {
                if ti >= topic_parts.len() || topic_parts[ti] != literal {
                    return false;
                }
                pi += 1;
                ti += 1;
            }
        }
    }
    ti == topic_parts.len()
}

struct Subscription {
    pattern: String,
    sender: mpsc::Sender<InboundMessage>,
}

pub struct MqttTransport {
    client: AsyncClient,
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
}

impl MqttTransport {
    /// Connects to `broker_url` (`mqtt://host:port`) and registers a
    /// last-will on `device/<client_id>/status` — real device LWT topics
    /// are set by the devices themselves; this LWT covers the control
    /// plane's own liveness signal on the same broker.
    #[instrument(skip(broker_url))]
    pub async fn connect(broker_url: &str, client_id: &str) -> Result<Self, TransportError> {
        let (host, port) = parse_broker_url(broker_url);
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(20));
        options.set_last_will(LastWill::new(
            format!("controlplane/{}/status", client_id),
            b"offline".to_vec(),
            QoS::AtLeastOnce,
            true,
        ));

        let (client, mut event_loop) = AsyncClient::new(options, 256);
        let subscriptions: Arc<Mutex<Vec<Subscription>>> = Arc::new(Mutex::new(Vec::new()));
        let routing_table = subscriptions.clone();

        tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let message = InboundMessage {
                            topic: publish.topic.clone(),
                            payload: publish.payload.to_vec(),
                            retained: publish.retain,
                        };
                        let subs = routing_table.lock().await;
                        for sub in subs.iter() {
                            if topic_matches(&sub.pattern, &message.topic) {
                                if sub.sender.send(message.clone()).await.is_err() {
                                    debug!("dropping closed mqtt subscription for pattern {}", sub.pattern);
                                }
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(error) => {
                        warn!("mqtt event loop error: {}; retrying", error);
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                }
            }
        });

        info!("mqtt transport connected to {}", broker_url);
        Ok(Self { client, subscriptions })
    }
}

#[async_trait]
impl TransportAdapter for MqttTransport {
    #[instrument(skip(self, payload))]
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        options: PublishOptions,
    ) -> Result<(), TransportError> {
        const MAX_RETRIES: u32 = 3;
        let mut attempt = 0;
        loop {
            let result = self
                .client
                .publish(topic, to_rumqttc_qos(options.qos), options.retained, payload.to_vec())
                .await;
            match result {
                Ok(()) => return Ok(()),
                Err(error) if attempt < MAX_RETRIES => {
                    attempt += 1;
                    let backoff = Duration::from_millis(100 * 2u64.pow(attempt));
                    warn!("publish to {} failed ({}); retry {}/{}", topic, error, attempt, MAX_RETRIES);
                    tokio::time::sleep(backoff).await;
                }
                Err(error) => {
                    error!("publish to {} failed after {} retries: {}", topic, MAX_RETRIES, error);
                    return Err(TransportError::PublishFailed(error.to_string()));
                }
            }
        }
    }

    async fn subscribe(&self, pattern: &str) -> Result<mpsc::Receiver<InboundMessage>, TransportError> {
        self.client
            .subscribe(pattern, QoS::AtLeastOnce)
            .await
            .map_err(|error| TransportError::SubscribeFailed(error.to_string()))?;

        let (sender, receiver) = mpsc::channel(1024);
        self.subscriptions.lock().await.push(Subscription {
            pattern: pattern.to_string(),
            sender,
        });
        Ok(receiver)
    }
}

fn parse_broker_url(url: &str) -> (String, u16) {
    let without_scheme = url.split("://").last().unwrap_or(url);
    let mut parts = without_scheme.splitn(2, ':');
    let host = parts.next().unwrap_or("localhost").to_string();
    let port = parts.next().and_then(|p| p.parse().ok()).unwrap_or(1883);
    (host, port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_level_wildcard_matches_one_segment() {
        assert!(topic_matches("device/+/telemetry", "device/AA:BB/telemetry"));
        assert!(!topic_matches("device/+/telemetry", "device/AA/BB/telemetry"));
    }

    #[test]
    fn hash_wildcard_matches_remainder() {
        assert!(topic_matches("device/#", "device/AA/telemetry"));
        assert!(topic_matches("device/#", "device/AA"));
    }

    #[test]
    fn parses_host_and_port() {
        assert_eq!(parse_broker_url("mqtt://broker.local:1884"), ("broker.local".to_string(), 1884));
        assert_eq!(parse_broker_url("mqtt://broker.local"), ("broker.local".to_string(), 1883));
    }
}
