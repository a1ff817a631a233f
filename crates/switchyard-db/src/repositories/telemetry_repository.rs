// [crates/switchyard-db/src/repositories/telemetry_repository.rs]
use crate::client::StoreClient;
use crate::errors::DbError;
use chrono::{DateTime, Utc};
use libsql::{params, Row};
use switchyard_core::ids::DeviceId;
use switchyard_core::telemetry::{IngestOutcome, SwitchStateSample, TelemetryEvent};
use tracing::{debug, instrument};

pub struct TelemetryRepository {
    database_client: StoreClient,
}

impl TelemetryRepository {
    pub fn new(database_client: StoreClient) -> Self {
        Self { database_client }
    }

    /// Relies on the `UNIQUE(device_id, source_fingerprint)` index to make
    /// this idempotent: a duplicate insert is a silent success, never an
    /// error surfaced to the caller (spec §4.6, §7).
    #[instrument(skip(self, event))]
    pub async fn insert(&self, event: &TelemetryEvent) -> Result<IngestOutcome, DbError> {
        let connection = self.database_client.connection()?;
        let result = connection
            .execute(
                "INSERT INTO telemetry_events (id, device_id, device_sequence, received_instant,
                    device_instant, energy_counter_wh, switch_states_json, source_fingerprint)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    event.id.as_str(),
                    event.device_id.as_str(),
                    event.device_sequence,
                    event.received_instant.to_rfc3339(),
                    event.device_instant.to_rfc3339(),
                    event.energy_counter_wh,
                    serde_json::to_string(&event.switch_states).map_err(|e| DbError::MappingError(e.to_string()))?,
                    event.source_fingerprint.as_str(),
                ],
            )
            .await;

        match result {
            Ok(_) => Ok(IngestOutcome::Accepted),
            Err(libsql::Error::SqliteFailure(_, message)) if message.contains("UNIQUE") => {
                debug!("duplicate telemetry event for device {} ignored", event.device_id);
                Ok(IngestOutcome::Duplicate)
            }
            Err(other) => Err(DbError::QueryError(other)),
        }
    }

    #[instrument(skip(self))]
    pub async fn list_for_device_since(
        &self,
        device_id: &DeviceId,
        since: DateTime<Utc>,
    ) -> Result<Vec<TelemetryEvent>, DbError> {
        let connection = self.database_client.connection()?;
        let mut results = connection
            .query(
                "SELECT * FROM telemetry_events WHERE device_id = ?1 AND device_instant >= ?2
                 ORDER BY device_instant ASC, device_sequence ASC",
                params![device_id.as_str(), since.to_rfc3339()],
            )
            .await?;
        let mut events = Vec::new();
        while let Some(row) = results.next().await? {
            events.push(map_row(&row)?);
        }
        Ok(events)
    }

    #[instrument(skip(self))]
    pub async fn list_for_device_window(
        &self,
        device_id: &DeviceId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TelemetryEvent>, DbError> {
        let connection = self.database_client.connection()?;
        let mut results = connection
            .query(
                "SELECT * FROM telemetry_events WHERE device_id = ?1
                 AND device_instant >= ?2 AND device_instant < ?3
                 ORDER BY device_instant ASC, device_sequence ASC",
                params![device_id.as_str(), from.to_rfc3339(), to.to_rfc3339()],
            )
            .await?;
        let mut events = Vec::new();
        while let Some(row) = results.next().await? {
            events.push(map_row(&row)?);
        }
        Ok(events)
    }
}

fn parse_instant(raw: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::MappingError(e.to_string()))
}

fn map_row(row: &Row) -> Result<TelemetryEvent, DbError> {
    let received: String = row.get(3)?;
    let device_instant: String = row.get(4)?;
    let switch_states_json: String = row.get(6)?;
    let switch_states: Vec<SwitchStateSample> =
        serde_json::from_str(&switch_states_json).map_err(|e| DbError::MappingError(e.to_string()))?;

    Ok(TelemetryEvent {
        id: row.get::<String>(0)?.into(),
        device_id: row.get::<String>(1)?.into(),
        device_sequence: row.get(2)?,
        received_instant: parse_instant(&received)?,
        device_instant: parse_instant(&device_instant)?,
        energy_counter_wh: row.get(5)?,
        switch_states,
        source_fingerprint: row.get(7)?,
    })
}
