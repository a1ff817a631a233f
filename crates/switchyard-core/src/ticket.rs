// [crates/switchyard-core/src/ticket.rs]
use crate::ids::{DeviceId, ReviewTicketId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketKind {
    Gap,
    Duplicate,
    Reset,
    NegativeDelta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewTicket {
    pub id: ReviewTicketId,
    pub kind: TicketKind,
    pub device_id: DeviceId,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub detail: String,
    pub created_instant: DateTime<Utc>,
    pub resolved_instant: Option<DateTime<Utc>>,
}

impl ReviewTicket {
    pub fn open(
        kind: TicketKind,
        device_id: DeviceId,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            id: ReviewTicketId::new(),
            kind,
            device_id,
            window_start,
            window_end,
            detail: detail.into(),
            created_instant: Utc::now(),
            resolved_instant: None,
        }
    }
}
