// [apps/control-plane/src/state/confirmation_store.rs]
//! Bulk-operation confirmation store for the Command Pipeline (C5). A bulk
//! intent (resolving to more than `bulkThreshold` targets) is held rather
//! than dispatched; the caller must resubmit with `confirm=<correlationId>`
//! within `confirmationTtlMs` (spec §4.5, scenario 2: "60s").
//!
//! Kept in-process rather than persisted (see DESIGN.md open question):
//! losing a pending confirmation on restart just means the caller resubmits,
//! and a control-plane restart is already disruptive to in-flight commands.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use switchyard_core::ids::{CorrelationId, DeviceId, SwitchId, UserId};
use switchyard_core::intent::Selector;

#[derive(Debug, Clone)]
pub struct PendingBulkIntent {
    pub issuer_user_id: UserId,
    pub selector: Selector,
    pub desired_state: bool,
    pub resolved_targets: Vec<(DeviceId, SwitchId)>,
}

struct Entry {
    pending: PendingBulkIntent,
    created_at: Instant,
}

pub struct ConfirmationStore {
    entries: RwLock<HashMap<CorrelationId, Entry>>,
    ttl: Duration,
}

impl ConfirmationStore {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: RwLock::new(HashMap::new()), ttl }
    }

    pub fn hold(&self, correlation_id: CorrelationId, pending: PendingBulkIntent) {
        self.entries
            .write()
            .expect("confirmation store lock poisoned")
            .insert(correlation_id, Entry { pending, created_at: Instant::now() });
    }

    /// Consumes a pending confirmation if present, unexpired, and issued by
    /// the same user. Returns `None` for any other case, which the pipeline
    /// maps to `CoreError::PreconditionFailed` (spec §4.5 step 7: confirm
    /// must reference an outstanding, non-expired correlation).
    pub fn consume(&self, correlation_id: &CorrelationId, requesting_user: &UserId) -> Option<PendingBulkIntent> {
        let mut entries = self.entries.write().expect("confirmation store lock poisoned");
        let entry = entries.get(correlation_id)?;
        if entry.created_at.elapsed() > self.ttl || entry.pending.issuer_user_id != *requesting_user {
            return None;
        }
        entries.remove(correlation_id).map(|entry| entry.pending)
    }

    pub fn sweep_expired(&self) -> usize {
        let mut entries = self.entries.write().expect("confirmation store lock poisoned");
        let before = entries.len();
        entries.retain(|_, entry| entry.created_at.elapsed() <= self.ttl);
        before - entries.len()
    }
}
