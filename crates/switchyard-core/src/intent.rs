// [crates/switchyard-core/src/intent.rs]
//! Closed sum types for intents and per-target outcomes (design note §9:
//! "Dynamic/duck-typed handlers → tagged variants"). Parsers at the REST
//! and scheduler boundaries produce these; the command pipeline never
//! inspects an untyped shape.

use crate::ids::{CorrelationId, DeviceId, RoomId, SwitchId, UserId};
use serde::{Deserialize, Serialize};

/// How a bulk intent resolves to concrete `(deviceId, switchId)` pairs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Selector {
    Single { device_id: DeviceId, switch_id: SwitchId },
    DeviceList { device_ids: Vec<DeviceId>, switch_selector: SwitchSelector },
    AllInRoom { room_id: RoomId, switch_selector: SwitchSelector },
    Broadcast { switch_selector: SwitchSelector },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SwitchSelector {
    /// Every switch on the resolved devices.
    All,
    /// Only switches whose `kind` matches.
    OfType { switch_type: crate::device::SwitchType },
    ById { switch_id: SwitchId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentOrigin {
    User,
    Scheduler,
    Voice,
}

/// Ephemeral — never persisted past the pipeline run, per spec §3.1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub id: crate::ids::IntentId,
    pub issuer_user_id: UserId,
    pub origin: IntentOrigin,
    pub selector: Selector,
    pub desired_state: bool,
    pub issued_instant: chrono::DateTime<chrono::Utc>,
    pub requires_confirmation: bool,
    pub correlation_id: CorrelationId,
    /// Present when this intent is itself the confirmation of a previously
    /// deferred bulk intent (spec §4.5 stage 3).
    pub confirms_correlation_id: Option<CorrelationId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TargetOutcome {
    Ok,
    NoOpAlreadyPending,
    Forbidden,
    UnknownTarget,
    CommandTimeout,
    TransportUnavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerTargetOutcome {
    pub device_id: DeviceId,
    pub switch_id: SwitchId,
    pub outcome: TargetOutcome,
    pub observed_state: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentResult {
    pub correlation_id: CorrelationId,
    pub per_target: Vec<PerTargetOutcome>,
    pub requires_confirmation: bool,
}
