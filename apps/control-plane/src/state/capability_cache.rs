// [apps/control-plane/src/state/capability_cache.rs]
//! Capability cache for the Identity & Authorization service (C1). Resolving
//! a user's effective capability set requires joining `User` against its
//! `RoleDefinition`; caching that join for a short TTL keeps the authorize
//! step off the hot path of every intent without risking a stale grant for
//! longer than `capabilityCacheTtlMs` (spec §4.1, default 5s).
//!
//! Invalidated eagerly by the Permission Broadcast service (C11) whenever a
//! role or user's grants change, so the TTL is a ceiling, not the normal
//! invalidation path.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use switchyard_core::ids::UserId;
use switchyard_core::user::Capability;

struct CachedEntry {
    capabilities: BTreeSet<Capability>,
    cached_at: Instant,
}

pub struct CapabilityCache {
    entries: RwLock<HashMap<UserId, CachedEntry>>,
    ttl: Duration,
}

impl CapabilityCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: RwLock::new(HashMap::new()), ttl }
    }

    pub fn get(&self, user_id: &UserId) -> Option<BTreeSet<Capability>> {
        let entries = self.entries.read().expect("capability cache lock poisoned");
        let entry = entries.get(user_id)?;
        if entry.cached_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.capabilities.clone())
    }

    pub fn put(&self, user_id: UserId, capabilities: BTreeSet<Capability>) {
        self.entries
            .write()
            .expect("capability cache lock poisoned")
            .insert(user_id, CachedEntry { capabilities, cached_at: Instant::now() });
    }

    pub fn invalidate(&self, user_id: &UserId) {
        self.entries.write().expect("capability cache lock poisoned").remove(user_id);
    }

    /// Used when a role definition changes: every cached user might hold
    /// that role, and re-deriving the affected subset isn't worth it.
    pub fn invalidate_all(&self) {
        self.entries.write().expect("capability cache lock poisoned").clear();
    }
}
