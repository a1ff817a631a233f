// [crates/switchyard-core/src/schedule.rs]
//! Scheduled/recurring intent definitions (C10, spec §4.10). A `Schedule` is
//! the durable record an operator creates through the REST surface; the
//! scheduler service turns each fire into an `Intent` at trigger time,
//! resolving the owner's *current* effective capabilities rather than
//! freezing them at creation (spec: "permissions are re-resolved per fire").

use crate::ids::{RoomId, ScheduleId, UserId};
use crate::intent::Selector;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Trigger {
    /// Standard five-field cron expression, evaluated in the building's
    /// configured timezone.
    Cron { expression: String },
    /// Fires exactly once at `at`, then is considered spent.
    Once { at: chrono::DateTime<chrono::Utc> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub owner_user_id: UserId,
    pub trigger: Trigger,
    pub selector: Selector,
    pub desired_state: bool,
    pub enabled: bool,
    /// Room scope the schedule is considered to act within, for
    /// `restrict-to-assigned` authorization at fire time.
    pub room_id: Option<RoomId>,
    pub last_fired_instant: Option<chrono::DateTime<chrono::Utc>>,
    /// When true, a missed fire (process was down across the trigger
    /// instant) is replayed once on the next tick rather than silently
    /// skipped (spec §4.10 "catch-up semantics").
    pub catch_up: bool,
}
