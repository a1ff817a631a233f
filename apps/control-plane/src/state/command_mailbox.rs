// [apps/control-plane/src/state/command_mailbox.rs]
//! Per-`(deviceId, switchId)` serialization and debounce-window dedupe for
//! the Command Pipeline (C5, spec §4.5 step 4 and the ordering guarantee:
//! "for any single (deviceId, switchId), intents are serialized").
//!
//! A real per-pair lock would need to be reclaimed once idle; instead this
//! holds one `tokio::sync::Mutex` per pair for the process lifetime. Device
//! and switch counts in this domain are small (classroom/building scale),
//! so the unbounded map is the right tradeoff over a reclaiming structure.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use switchyard_core::ids::{DeviceId, SwitchId};
use tokio::sync::{Mutex, OwnedMutexGuard};

type PairKey = (DeviceId, SwitchId);

pub struct CommandMailbox {
    locks: RwLock<HashMap<PairKey, Arc<Mutex<()>>>>,
    last_issued: RwLock<HashMap<PairKey, (bool, DateTime<Utc>)>>,
    debounce_window: ChronoDuration,
}

impl CommandMailbox {
    pub fn new(debounce_window_ms: u64) -> Self {
        Self {
            locks: RwLock::new(HashMap::new()),
            last_issued: RwLock::new(HashMap::new()),
            debounce_window: ChronoDuration::milliseconds(debounce_window_ms as i64),
        }
    }

    /// Acquires exclusive processing rights for a `(device, switch)` pair.
    /// Holding the guard for the full publish/await-ack cycle is what gives
    /// C5 its serialization guarantee.
    pub async fn acquire(&self, device_id: &DeviceId, switch_id: &SwitchId) -> OwnedMutexGuard<()> {
        let key = (device_id.clone(), switch_id.clone());
        let lock = {
            let mut locks = self.locks.write().expect("command mailbox lock poisoned");
            locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        lock.lock_owned().await
    }

    /// True if the last issued desired state for this pair equals
    /// `desired_state` and was set within the debounce window, meaning this
    /// intent should be reported `no-op-already-pending` rather than
    /// republished (spec §4.5 step 4).
    pub fn is_duplicate(&self, device_id: &DeviceId, switch_id: &SwitchId, desired_state: bool, now: DateTime<Utc>) -> bool {
        let key = (device_id.clone(), switch_id.clone());
        self.last_issued
            .read()
            .expect("command mailbox lock poisoned")
            .get(&key)
            .is_some_and(|(state, at)| *state == desired_state && now.signed_duration_since(*at) <= self.debounce_window)
    }

    pub fn record_issued(&self, device_id: &DeviceId, switch_id: &SwitchId, desired_state: bool, now: DateTime<Utc>) {
        let key = (device_id.clone(), switch_id.clone());
        self.last_issued.write().expect("command mailbox lock poisoned").insert(key, (desired_state, now));
    }
}
