// [crates/switchyard-core/src/ids.rs]
//! Opaque entity identifiers. Every id is a ULID-like string; we do not
//! interpret its internal structure, only generate and compare it.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

opaque_id!(UserId);
opaque_id!(DeviceId);
opaque_id!(SwitchId);
opaque_id!(RoomId);
opaque_id!(TelemetryEventId);
opaque_id!(LedgerEntryId);
opaque_id!(TariffVersionId);
opaque_id!(ReviewTicketId);
opaque_id!(IntentId);
opaque_id!(ScheduleId);
opaque_id!(CorrelationId);
