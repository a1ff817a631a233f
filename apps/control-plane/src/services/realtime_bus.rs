// [apps/control-plane/src/services/realtime_bus.rs]
//! Real-time fan-out (C9, spec §4.9). Generalizes the teacher's
//! `event_bus.rs` broadcast-to-everyone idiom into room-scoped delivery:
//! a `/realtime` subscriber only receives events for the `user:<id>` room
//! it authenticated into and the `device:<id>` rooms it subscribed to,
//! rather than every event in the system.
//!
//! Internally this still rides on a single `tokio::sync::broadcast`
//! channel (same backbone as the teacher's bus and `switchyard_transport`'s
//! in-memory adapter) — every event carries its target room, and each
//! subscriber task filters on receipt. A dedicated channel per room would
//! avoid the filter pass but multiplies join/leave bookkeeping for a fleet
//! this small (classroom/building scale).

use switchyard_core::event::{RealtimeEvent, SubscriptionRoom};
use tokio::sync::broadcast;
use tracing::{instrument, trace, warn};

const CHANNEL_CAPACITY: usize = 4096;

#[derive(Debug, Clone)]
pub struct RoutedEvent {
    pub room: SubscriptionRoom,
    pub event: RealtimeEvent,
}

pub struct RealtimeBus {
    sender: broadcast::Sender<RoutedEvent>,
}

impl Default for RealtimeBus {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeBus {
    pub fn new() -> Self {
        let (sender, _receiver) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoutedEvent> {
        self.sender.subscribe()
    }

    #[instrument(skip(self, event))]
    pub fn publish(&self, room: SubscriptionRoom, event: RealtimeEvent) {
        let subscriber_count = self.sender.receiver_count();
        if subscriber_count == 0 {
            trace!("no realtime subscribers, dropping event for {:?}", room);
            return;
        }
        if let Err(error) = self.sender.send(RoutedEvent { room, event }) {
            warn!("realtime bus has no receivers despite count > 0: {error}");
        }
    }

    pub fn publish_device(&self, device_id: &switchyard_core::ids::DeviceId, event: RealtimeEvent) {
        self.publish(SubscriptionRoom::Device(device_id.clone()), event);
    }

    pub fn publish_user(&self, user_id: &switchyard_core::ids::UserId, event: RealtimeEvent) {
        self.publish(SubscriptionRoom::User(user_id.clone()), event);
    }
}
