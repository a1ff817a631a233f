// [crates/switchyard-transport/src/lib.rs]
/*!
 * Pub/sub transport adapter abstraction (spec §4.3): an MQTT-style broker
 * client capable of publish-with-QoS, subscribe, and last-will. Two
 * implementations are provided — `MqttTransport` over a real broker via
 * `rumqttc`, and `InMemoryTransport`, a loopback used by unit tests and the
 * command pipeline's own test suite so it never needs a running broker.
 */

pub mod errors;
pub mod memory;
pub mod mqtt;
pub mod topics;

use async_trait::async_trait;
use errors::TransportError;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub qos: Qos,
    pub retained: bool,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self { qos: Qos::AtLeastOnce, retained: false }
    }
}

#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retained: bool,
}

/// An MQTT-style broker client. Implementations must preserve per-topic
/// message order for a single device and deliver at-least-once; consumers
/// (C6 in particular) are responsible for idempotence.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        options: PublishOptions,
    ) -> Result<(), TransportError>;

    /// Subscribes to a topic pattern (may contain `+`/`#` wildcards for the
    /// MQTT implementation). Returns a channel of matching inbound messages;
    /// the receiver end is owned by the caller and closes when the
    /// adapter is dropped or the subscription is cancelled.
    async fn subscribe(&self, pattern: &str) -> Result<mpsc::Receiver<InboundMessage>, TransportError>;
}

/// Serializes `value` as JSON and publishes it, matching the wire format
/// of every topic in spec §6.3.
pub async fn publish_json<T: serde::Serialize + Sync>(
    adapter: &dyn TransportAdapter,
    topic: &str,
    value: &T,
    options: PublishOptions,
) -> Result<(), TransportError> {
    let payload = serde_json::to_vec(value)?;
    adapter.publish(topic, &payload, options).await
}
