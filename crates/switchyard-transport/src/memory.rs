// [crates/switchyard-transport/src/memory.rs]
//! In-process loopback transport adapted from the orchestrator's
//! `services/event_bus.rs` broadcast idiom: a single `tokio::sync::broadcast`
//! channel fans every publish out to every subscriber, which then filters by
//! pattern match. Exercises the command pipeline and telemetry ingestion in
//! tests without a running broker.

use crate::errors::TransportError;
use crate::mqtt::topic_matches;
use crate::{InboundMessage, PublishOptions, TransportAdapter};
use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::instrument;

const LOOPBACK_CHANNEL_CAPACITY: usize = 4096;

#[derive(Clone)]
pub struct InMemoryTransport {
    sender: broadcast::Sender<InboundMessage>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(LOOPBACK_CHANNEL_CAPACITY);
        Self { sender }
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportAdapter for InMemoryTransport {
    #[instrument(skip(self, payload))]
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        options: PublishOptions,
    ) -> Result<(), TransportError> {
        let _ = self.sender.send(InboundMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            retained: options.retained,
        });
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<mpsc::Receiver<InboundMessage>, TransportError> {
        let mut broadcast_receiver = self.sender.subscribe();
        let (forward_sender, forward_receiver) = mpsc::channel(1024);
        let pattern = pattern.to_string();

        tokio::spawn(async move {
            loop {
                match broadcast_receiver.recv().await {
                    Ok(message) if topic_matches(&pattern, &message.topic) => {
                        if forward_sender.send(message).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(forward_receiver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topics::{device_topic, device_topic_wildcard, DeviceTopicKind};

    #[tokio::test]
    async fn subscriber_receives_matching_publish() {
        let transport = InMemoryTransport::new();
        let mut receiver = transport
            .subscribe(&device_topic_wildcard(DeviceTopicKind::Telemetry))
            .await
            .unwrap();

        transport
            .publish(
                &device_topic("AA:BB", DeviceTopicKind::Telemetry),
                b"{}",
                PublishOptions::default(),
            )
            .await
            .unwrap();

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.topic, "device/AA:BB/telemetry");
    }

    #[tokio::test]
    async fn subscriber_ignores_unrelated_topic() {
        let transport = InMemoryTransport::new();
        let mut receiver = transport
            .subscribe(&device_topic_wildcard(DeviceTopicKind::Control))
            .await
            .unwrap();

        transport
            .publish(
                &device_topic("AA:BB", DeviceTopicKind::Telemetry),
                b"{}",
                PublishOptions::default(),
            )
            .await
            .unwrap();

        let outcome = tokio::time::timeout(std::time::Duration::from_millis(50), receiver.recv()).await;
        assert!(outcome.is_err(), "expected no message to arrive on an unrelated pattern");
    }
}
