// [apps/control-plane/src/state/device_sessions.rs]
//! Device Session Manager (C4, spec §4.4). The in-memory source of truth
//! for every device's online/offline lifecycle; `switchyard_db`'s
//! `SessionRepository` only ever sees periodic snapshots for restart
//! recovery, never drives a decision.
//!
//! ```text
//!       ┌──────────(heartbeat or telemetry)──────────┐
//!       │                                             │
//!  [offline] ──(status=online OR first sequence)──► [online]
//!       ▲                                             │
//!       └──(status=offline OR heartbeat gap > T_off)──┘
//!                                              [online] ──(sequence regression,
//!                                                          or telemetry without
//!                                                          fresh heartbeat)──► [degraded]
//! ```

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use switchyard_core::ids::DeviceId;
use switchyard_core::session::{DeviceSession, SessionStatus};
use tracing::{debug, warn};

pub struct DeviceSessionStore {
    sessions: RwLock<HashMap<DeviceId, DeviceSession>>,
    offline_after: ChronoDuration,
}

/// What changed as a result of applying an event, so the caller can decide
/// whether to emit `device.online.changed` downstream (C9) without the
/// store itself depending on the realtime bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTransition {
    pub previous: SessionStatus,
    pub current: SessionStatus,
    pub session_sequence: u64,
}

impl SessionTransition {
    fn changed(&self) -> bool {
        self.previous != self.current
    }
}

impl DeviceSessionStore {
    pub fn new(offline_after_ms: u64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            offline_after: ChronoDuration::milliseconds(offline_after_ms as i64),
        }
    }

    fn entry(&self, device_id: &DeviceId) -> DeviceSession {
        self.sessions
            .read()
            .expect("session store lock poisoned")
            .get(device_id)
            .cloned()
            .unwrap_or_else(|| DeviceSession::initial(device_id.clone()))
    }

    pub fn get(&self, device_id: &DeviceId) -> Option<DeviceSession> {
        self.sessions.read().expect("session store lock poisoned").get(device_id).cloned()
    }

    pub fn snapshot_all(&self) -> Vec<DeviceSession> {
        self.sessions.read().expect("session store lock poisoned").values().cloned().collect()
    }

    /// Assigns the next strictly-increasing sequence number for a device
    /// without otherwise touching its lifecycle status, for events the
    /// Command Pipeline emits outside the heartbeat/telemetry/status path
    /// (spec §4.4: "every outgoing state change carries" this sequence).
    pub fn next_sequence(&self, device_id: &DeviceId) -> u64 {
        let mut session = self.entry(device_id);
        let sequence = session.next_session_sequence();
        self.sessions.write().expect("session store lock poisoned").insert(device_id.clone(), session);
        sequence
    }

    /// Explicit `status` message from the device-status topic, including
    /// the broker-delivered LWT `offline` payload.
    pub fn apply_status(&self, device_id: &DeviceId, online: bool, at: DateTime<Utc>) -> SessionTransition {
        let mut session = self.entry(device_id);
        let previous = session.status;
        session.last_seen_instant = at;
        session.status = if online {
            if previous != SessionStatus::Online {
                session.session_start_instant = Some(at);
            }
            SessionStatus::Online
        } else {
            session.session_start_instant = None;
            SessionStatus::Offline
        };
        let session_sequence = session.next_session_sequence();
        self.sessions.write().expect("session store lock poisoned").insert(device_id.clone(), session);
        SessionTransition { previous, current: if online { SessionStatus::Online } else { SessionStatus::Offline }, session_sequence }
    }

    /// Periodic heartbeat. Brings an offline device back online; does not
    /// itself clear a degraded flag (that requires a fresh, non-regressed
    /// telemetry sequence).
    pub fn apply_heartbeat(&self, device_id: &DeviceId, at: DateTime<Utc>) -> SessionTransition {
        let mut session = self.entry(device_id);
        let previous = session.status;
        session.last_seen_instant = at;
        session.last_heartbeat_instant = Some(at);
        if previous == SessionStatus::Offline {
            session.session_start_instant = Some(at);
            session.status = SessionStatus::Online;
        }
        let session_sequence = session.next_session_sequence();
        self.sessions.write().expect("session store lock poisoned").insert(device_id.clone(), session.clone());
        SessionTransition { previous, current: session.status, session_sequence }
    }

    /// Telemetry arrival. Detects sequence regression (possible restart
    /// without a reset marker) and stale-heartbeat-with-fresh-telemetry,
    /// both of which land the device in `degraded` rather than `online`
    /// (spec §4.4).
    pub fn apply_telemetry_sequence(&self, device_id: &DeviceId, device_sequence: i64, at: DateTime<Utc>) -> SessionTransition {
        let mut session = self.entry(device_id);
        let previous = session.status;
        let regressed = session.last_device_sequence.is_some_and(|last| device_sequence < last);
        // No heartbeat ever observed (first contact) doesn't count as stale:
        // a brand-new device's first telemetry lands online, per a fresh
        // session rather than a gap since a heartbeat that never happened.
        let heartbeat_stale = session
            .last_heartbeat_instant
            .is_some_and(|last| at.signed_duration_since(last) > self.offline_after);

        session.last_seen_instant = at;
        session.last_device_sequence = Some(device_sequence);
        if previous == SessionStatus::Offline {
            session.session_start_instant = Some(at);
        }
        session.status = if regressed || heartbeat_stale { SessionStatus::Degraded } else { SessionStatus::Online };
        if regressed {
            warn!("device {} telemetry sequence regressed ({} after {:?})", device_id, device_sequence, session.last_device_sequence);
        }
        let session_sequence = session.next_session_sequence();
        self.sessions.write().expect("session store lock poisoned").insert(device_id.clone(), session.clone());
        SessionTransition { previous, current: session.status, session_sequence }
    }

    /// Sweeps every tracked device for a heartbeat gap exceeding `T_off`,
    /// transitioning it to offline. Called from a periodic daemon; returns
    /// only the sessions that actually flipped so the caller can fan out
    /// `device.online.changed` just for those.
    pub fn sweep_stale(&self, now: DateTime<Utc>) -> Vec<(DeviceId, SessionTransition)> {
        let mut flipped = Vec::new();
        let mut sessions = self.sessions.write().expect("session store lock poisoned");
        for (device_id, session) in sessions.iter_mut() {
            if session.status == SessionStatus::Offline {
                continue;
            }
            let last_signal = session.last_heartbeat_instant.unwrap_or(session.last_seen_instant);
            if now.signed_duration_since(last_signal) > self.offline_after {
                let previous = session.status;
                session.status = SessionStatus::Offline;
                session.session_start_instant = None;
                let session_sequence = session.next_session_sequence();
                debug!("device {} marked offline after heartbeat gap", device_id);
                flipped.push((device_id.clone(), SessionTransition { previous, current: SessionStatus::Offline, session_sequence }));
            }
        }
        flipped
    }
}

impl SessionTransition {
    pub fn should_notify(&self) -> bool {
        self.changed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_core::ids::DeviceId;

    #[test]
    fn first_ever_telemetry_lands_online_not_degraded() {
        let store = DeviceSessionStore::new(60_000);
        let device_id = DeviceId::new();
        let transition = store.apply_telemetry_sequence(&device_id, 1, Utc::now());
        assert_eq!(transition.current, SessionStatus::Online);
    }

    #[test]
    fn telemetry_without_a_fresh_heartbeat_after_one_was_seen_is_degraded() {
        let store = DeviceSessionStore::new(1_000);
        let device_id = DeviceId::new();
        let start = Utc::now();
        store.apply_heartbeat(&device_id, start);
        let transition = store.apply_telemetry_sequence(&device_id, 1, start + ChronoDuration::seconds(5));
        assert_eq!(transition.current, SessionStatus::Degraded);
    }

    #[test]
    fn regressed_sequence_is_degraded() {
        let store = DeviceSessionStore::new(60_000);
        let device_id = DeviceId::new();
        let now = Utc::now();
        store.apply_telemetry_sequence(&device_id, 5, now);
        let transition = store.apply_telemetry_sequence(&device_id, 3, now);
        assert_eq!(transition.current, SessionStatus::Degraded);
    }
}
