// [apps/control-plane/src/services/scheduler.rs]
//! Scheduler (C10, spec §4.10). Ticks on a fixed cadence, evaluates every
//! enabled `Schedule` against the current instant, and submits a fresh
//! `Intent` through the command pipeline on each fire. Capabilities are
//! re-resolved per fire through `AuthService::session_for_user` rather than
//! frozen at schedule-creation time, so a revoked capability takes effect on
//! the very next tick without needing to touch the schedule record.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use croner::Cron;
use switchyard_core::errors::CoreError;
use switchyard_core::intent::IntentOrigin;
use switchyard_core::schedule::{Schedule, Trigger};
use switchyard_core::user::well_known;
use switchyard_db::repositories::schedule_repository::ScheduleRepository;
use tracing::{info, instrument, warn};

use crate::auth::AuthService;
use crate::services::command_pipeline::CommandPipeline;

/// Tick cadence. A minute-grained cron expression never needs finer
/// resolution than this to fire reliably within the minute it names.
const TICK_INTERVAL: Duration = Duration::from_secs(20);

/// Bounds how many missed occurrences a `catch_up` schedule replays in a
/// single tick (spec §4.10: "up to the last N missed fires ... within a
/// bounded window").
const MAX_CATCHUP_REPLAYS: usize = 10;

pub struct Scheduler {
    schedules: Arc<ScheduleRepository>,
    pipeline: Arc<CommandPipeline>,
    auth: Arc<AuthService>,
}

impl Scheduler {
    pub fn new(schedules: Arc<ScheduleRepository>, pipeline: Arc<CommandPipeline>, auth: Arc<AuthService>) -> Self {
        Self { schedules, pipeline, auth }
    }

    /// Runs forever on `TICK_INTERVAL`. Intended to be spawned once at
    /// startup and left to run for the process lifetime.
    #[instrument(skip(self))]
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(error) = self.tick().await {
                warn!("scheduler tick failed: {error}");
            }
        }
    }

    #[instrument(skip(self))]
    async fn tick(&self) -> Result<(), CoreError> {
        let now = Utc::now();
        let due = self.schedules.list_enabled().await?;
        for schedule in due {
            for fire_instant in Self::due_fires(&schedule, now) {
                if let Err(error) = self.fire(&schedule, fire_instant).await {
                    warn!("schedule {} failed to fire: {error}", schedule.id);
                    break;
                }
            }
        }
        Ok(())
    }

    /// Decides whether `schedule` is due, and returns every occurrence it is
    /// due *for*, oldest first. A `catch_up` schedule replays each missed
    /// occurrence since its last fire (bounded by `MAX_CATCHUP_REPLAYS`); a
    /// non-`catch_up` schedule only ever replays the single most recent due
    /// occurrence, skipping whatever was missed in between.
    fn due_fires(schedule: &Schedule, now: chrono::DateTime<Utc>) -> Vec<chrono::DateTime<Utc>> {
        match &schedule.trigger {
            Trigger::Once { at } => {
                if schedule.last_fired_instant.is_some() {
                    return Vec::new();
                }
                if *at <= now {
                    vec![*at]
                } else {
                    Vec::new()
                }
            }
            Trigger::Cron { expression } => {
                let cron = match parse_cron(expression) {
                    Ok(cron) => cron,
                    Err(error) => {
                        warn!("schedule {} has an unparseable cron expression: {error}", schedule.id);
                        return Vec::new();
                    }
                };
                let since = schedule.last_fired_instant.unwrap_or(now - chrono::Duration::days(1));

                if !schedule.catch_up {
                    let Some(next) = cron.find_next_occurrence(&since, false).ok() else { return Vec::new() };
                    if next > now {
                        return Vec::new();
                    }
                    // Skip straight to the most recent due occurrence rather
                    // than replaying every one missed while down.
                    let mut candidate = next;
                    while let Ok(later) = cron.find_next_occurrence(&candidate, false) {
                        if later > now {
                            break;
                        }
                        candidate = later;
                    }
                    return vec![candidate];
                }

                let mut occurrences = Vec::new();
                let mut cursor = since;
                while occurrences.len() < MAX_CATCHUP_REPLAYS {
                    match cron.find_next_occurrence(&cursor, false) {
                        Ok(next) if next <= now => {
                            occurrences.push(next);
                            cursor = next;
                        }
                        _ => break,
                    }
                }
                occurrences
            }
        }
    }

    #[instrument(skip(self, schedule))]
    async fn fire(&self, schedule: &Schedule, fire_instant: chrono::DateTime<Utc>) -> Result<(), CoreError> {
        let session = self.auth.session_for_user(&schedule.owner_user_id).await?;
        if !session.has(well_known::DEVICE_CONTROL) {
            info!("schedule {} owner no longer holds device.control, skipping fire", schedule.id);
            self.schedules.mark_fired(schedule.id.as_str(), fire_instant).await?;
            if matches!(schedule.trigger, Trigger::Once { .. }) {
                self.schedules.set_enabled(schedule.id.as_str(), false).await?;
            }
            return Ok(());
        }

        let result = self
            .pipeline
            .submit(&self.auth, &session, IntentOrigin::Scheduler, schedule.selector.clone(), schedule.desired_state, None)
            .await?;
        info!("schedule {} fired, {} targets resolved", schedule.id, result.per_target.len());

        self.schedules.mark_fired(schedule.id.as_str(), fire_instant).await?;
        if matches!(schedule.trigger, Trigger::Once { .. }) {
            self.schedules.set_enabled(schedule.id.as_str(), false).await?;
        }
        Ok(())
    }
}

fn parse_cron(expression: &str) -> Result<Cron, CoreError> {
    Cron::new(expression)
        .with_seconds_optional()
        .parse()
        .map_err(|error| CoreError::InvalidInput(format!("invalid cron expression '{expression}': {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_core::ids::{DeviceId, ScheduleId, SwitchId, UserId};
    use switchyard_core::intent::Selector;

    fn schedule(trigger: Trigger, last_fired_instant: Option<chrono::DateTime<Utc>>, catch_up: bool) -> Schedule {
        Schedule {
            id: ScheduleId::new(),
            owner_user_id: UserId::new(),
            trigger,
            selector: Selector::Single { device_id: DeviceId::new(), switch_id: SwitchId::new() },
            desired_state: false,
            enabled: true,
            room_id: None,
            last_fired_instant,
            catch_up,
        }
    }

    #[test]
    fn once_trigger_fires_exactly_one_time() {
        let now = Utc::now();
        let at = now - chrono::Duration::minutes(1);
        let pending = schedule(Trigger::Once { at }, None, false);
        assert_eq!(Scheduler::due_fires(&pending, now), vec![at]);

        let already_fired = schedule(Trigger::Once { at }, Some(at), false);
        assert!(Scheduler::due_fires(&already_fired, now).is_empty());
    }

    #[test]
    fn once_trigger_in_the_future_does_not_fire() {
        let now = Utc::now();
        let at = now + chrono::Duration::minutes(5);
        let pending = schedule(Trigger::Once { at }, None, false);
        assert!(Scheduler::due_fires(&pending, now).is_empty());
    }

    #[test]
    fn cron_trigger_fires_when_occurrence_has_passed() {
        let now = Utc::now();
        let last_fired = now - chrono::Duration::minutes(10);
        let every_minute = schedule(Trigger::Cron { expression: "* * * * *".into() }, Some(last_fired), true);
        assert!(!Scheduler::due_fires(&every_minute, now).is_empty());
    }

    #[test]
    fn cron_trigger_skips_replay_when_catch_up_disabled_and_far_behind() {
        let now = Utc::now();
        let last_fired = now - chrono::Duration::hours(5);
        let every_minute = schedule(Trigger::Cron { expression: "* * * * *".into() }, Some(last_fired), false);
        let due = Scheduler::due_fires(&every_minute, now);
        assert_eq!(due.len(), 1, "non-catch-up schedule should replay only the latest due occurrence");
        assert!(now - due[0] < chrono::Duration::minutes(2), "non-catch-up schedule should jump to the latest due occurrence");
    }

    #[test]
    fn cron_trigger_with_catch_up_enabled_replays_every_missed_occurrence_up_to_the_bound() {
        let now = Utc::now();
        let last_fired = now - chrono::Duration::minutes(15);
        let every_minute = schedule(Trigger::Cron { expression: "* * * * *".into() }, Some(last_fired), true);
        let due = Scheduler::due_fires(&every_minute, now);
        assert!(due.len() >= 10, "catch-up schedule should replay every missed minute, got {}", due.len());
        assert!(due.windows(2).all(|pair| pair[0] < pair[1]), "occurrences must be in issuance order");
    }

    #[test]
    fn cron_trigger_with_catch_up_enabled_bounds_replay_count() {
        let now = Utc::now();
        let last_fired = now - chrono::Duration::days(2);
        let every_minute = schedule(Trigger::Cron { expression: "* * * * *".into() }, Some(last_fired), true);
        let due = Scheduler::due_fires(&every_minute, now);
        assert_eq!(due.len(), MAX_CATCHUP_REPLAYS, "replay count must be bounded even when far more was missed");
    }

    #[test]
    fn cron_trigger_with_unparseable_expression_never_fires() {
        let now = Utc::now();
        let bad = schedule(Trigger::Cron { expression: "not a cron expression".into() }, None, true);
        assert!(Scheduler::due_fires(&bad, now).is_empty());
    }
}
