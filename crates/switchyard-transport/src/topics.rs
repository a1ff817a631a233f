// [crates/switchyard-transport/src/topics.rs]
//! Topic string construction/parsing for the `/`-delimited device topic
//! family (spec §4.3, §6.3). Kept centralized so the MQTT and in-memory
//! adapters, and the subscribers that pattern-match incoming topics, never
//! hand-roll a format string.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceTopicKind {
    Control,
    State,
    Telemetry,
    Heartbeat,
    Status,
}

impl DeviceTopicKind {
    fn segment(&self) -> &'static str {
        match self {
            DeviceTopicKind::Control => "control",
            DeviceTopicKind::State => "state",
            DeviceTopicKind::Telemetry => "telemetry",
            DeviceTopicKind::Heartbeat => "heartbeat",
            DeviceTopicKind::Status => "status",
        }
    }

    /// State/status are broker-retained last-value topics (spec §4.3).
    pub fn is_retained(&self) -> bool {
        matches!(self, DeviceTopicKind::State | DeviceTopicKind::Status)
    }
}

pub fn device_topic(hardware_id: &str, kind: DeviceTopicKind) -> String {
    format!("device/{}/{}", hardware_id, kind.segment())
}

/// Subscription pattern matching every topic of `kind` across all devices.
pub fn device_topic_wildcard(kind: DeviceTopicKind) -> String {
    format!("device/+/{}", kind.segment())
}

/// Splits an incoming topic like `device/AA:BB/telemetry` into
/// `(hardware_id, kind)`. Returns `None` for anything outside the device
/// topic family; the caller should ignore such messages.
pub fn parse_device_topic(topic: &str) -> Option<(&str, DeviceTopicKind)> {
    let mut parts = topic.splitn(3, '/');
    let prefix = parts.next()?;
    let hardware_id = parts.next()?;
    let leaf = parts.next()?;
    if prefix != "device" {
        return None;
    }
    let kind = match leaf {
        "control" => DeviceTopicKind::Control,
        "state" => DeviceTopicKind::State,
        "telemetry" => DeviceTopicKind::Telemetry,
        "heartbeat" => DeviceTopicKind::Heartbeat,
        "status" => DeviceTopicKind::Status,
        _ => return None,
    };
    Some((hardware_id, kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_control_topic() {
        let topic = device_topic("AA:BB:CC", DeviceTopicKind::Control);
        assert_eq!(topic, "device/AA:BB:CC/control");
        let (hwid, kind) = parse_device_topic(&topic).unwrap();
        assert_eq!(hwid, "AA:BB:CC");
        assert_eq!(kind, DeviceTopicKind::Control);
    }

    #[test]
    fn ignores_unrelated_topics() {
        assert!(parse_device_topic("other/thing").is_none());
        assert!(parse_device_topic("device/AA/unknown-leaf").is_none());
    }
}
