// [crates/switchyard-db/src/repositories/session_repository.rs]
//! Periodic persistence of `DeviceSession`. The Session Manager (C4) owns
//! the authoritative in-memory copy; this repository exists only so a
//! restarted process can seed its session map instead of starting every
//! device at the "unknown" end of offline (spec §4.4: "Initial state on
//! process start: offline for every device" still applies — persistence
//! here is advisory, read at bootstrap for diagnostics only).

use crate::client::StoreClient;
use crate::errors::DbError;
use chrono::{DateTime, Utc};
use libsql::{params, Row};
use switchyard_core::ids::DeviceId;
use switchyard_core::session::{DeviceSession, SessionStatus};
use tracing::instrument;

pub struct SessionRepository {
    database_client: StoreClient,
}

impl SessionRepository {
    pub fn new(database_client: StoreClient) -> Self {
        Self { database_client }
    }

    #[instrument(skip(self, session))]
    pub async fn upsert(&self, session: &DeviceSession) -> Result<(), DbError> {
        let connection = self.database_client.connection()?;
        connection
            .execute(
                "INSERT INTO device_sessions (device_id, status, last_seen_instant, last_heartbeat_instant,
                    last_device_sequence, last_session_sequence, session_start_instant)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(device_id) DO UPDATE SET
                    status = excluded.status,
                    last_seen_instant = excluded.last_seen_instant,
                    last_heartbeat_instant = excluded.last_heartbeat_instant,
                    last_device_sequence = excluded.last_device_sequence,
                    last_session_sequence = excluded.last_session_sequence,
                    session_start_instant = excluded.session_start_instant",
                params![
                    session.device_id.as_str(),
                    status_label(session.status),
                    session.last_seen_instant.to_rfc3339(),
                    session.last_heartbeat_instant.map(|i| i.to_rfc3339()),
                    session.last_device_sequence,
                    session.last_session_sequence as i64,
                    session.session_start_instant.map(|i| i.to_rfc3339()),
                ],
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn find(&self, device_id: &DeviceId) -> Result<Option<DeviceSession>, DbError> {
        let connection = self.database_client.connection()?;
        let mut results = connection
            .query("SELECT * FROM device_sessions WHERE device_id = ?1", params![device_id.as_str()])
            .await?;
        match results.next().await? {
            Some(row) => Ok(Some(map_row(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    pub async fn list_all(&self) -> Result<Vec<DeviceSession>, DbError> {
        let connection = self.database_client.connection()?;
        let mut results = connection.query("SELECT * FROM device_sessions", ()).await?;
        let mut sessions = Vec::new();
        while let Some(row) = results.next().await? {
            sessions.push(map_row(&row)?);
        }
        Ok(sessions)
    }
}

fn status_label(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Online => "online",
        SessionStatus::Offline => "offline",
        SessionStatus::Degraded => "degraded",
    }
}

fn parse_status(label: &str) -> SessionStatus {
    match label {
        "online" => SessionStatus::Online,
        "degraded" => SessionStatus::Degraded,
        _ => SessionStatus::Offline,
    }
}

fn parse_instant(raw: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::MappingError(e.to_string()))
}

fn map_row(row: &Row) -> Result<DeviceSession, DbError> {
    let status_label: String = row.get(1)?;
    let last_seen: String = row.get(2)?;
    let last_heartbeat: Option<String> = row.get(3)?;
    let session_start: Option<String> = row.get(6)?;

    Ok(DeviceSession {
        device_id: row.get::<String>(0)?.into(),
        status: parse_status(&status_label),
        last_seen_instant: parse_instant(&last_seen)?,
        last_heartbeat_instant: last_heartbeat.map(|raw| parse_instant(&raw)).transpose()?,
        last_device_sequence: row.get(4)?,
        last_session_sequence: row.get::<i64>(5)? as u64,
        session_start_instant: session_start.map(|raw| parse_instant(&raw)).transpose()?,
    })
}
