// [crates/switchyard-db/src/repositories/ledger_repository.rs]
use crate::client::StoreClient;
use crate::errors::DbError;
use chrono::{DateTime, Utc};
use libsql::{params, Row};
use switchyard_core::ids::DeviceId;
use switchyard_core::ledger::{Confidence, LedgerEntry};
use tracing::instrument;

pub struct LedgerRepository {
    database_client: StoreClient,
}

impl LedgerRepository {
    pub fn new(database_client: StoreClient) -> Self {
        Self { database_client }
    }

    #[instrument(skip(self, entry))]
    pub async fn insert(&self, entry: &LedgerEntry) -> Result<(), DbError> {
        let connection = self.database_client.connection()?;
        connection
            .execute(
                "INSERT INTO ledger_entries (id, device_id, switch_id, start_instant, end_instant,
                    duration_sec, energy_wh, average_power_w, tariff_version_id, cost_minor,
                    confidence, is_reset_marker)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    entry.id.as_str(),
                    entry.device_id.as_str(),
                    entry.switch_id.as_ref().map(|s| s.as_str().to_string()),
                    entry.start_instant.to_rfc3339(),
                    entry.end_instant.to_rfc3339(),
                    entry.duration_sec,
                    entry.energy_wh,
                    entry.average_power_w,
                    entry.tariff_version_id.as_ref().map(|t| t.as_str().to_string()),
                    entry.cost_minor,
                    confidence_label(entry.confidence),
                    entry.is_reset_marker as i64,
                ],
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn list_for_device_window(
        &self,
        device_id: &DeviceId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>, DbError> {
        let connection = self.database_client.connection()?;
        let mut results = connection
            .query(
                "SELECT * FROM ledger_entries WHERE device_id = ?1
                 AND start_instant < ?3 AND end_instant > ?2
                 ORDER BY start_instant ASC",
                params![device_id.as_str(), from.to_rfc3339(), to.to_rfc3339()],
            )
            .await?;
        let mut entries = Vec::new();
        while let Some(row) = results.next().await? {
            entries.push(map_row(&row)?);
        }
        Ok(entries)
    }

    /// Used by the reconciliation job to compute aggregate-vs-ledger
    /// divergence per device for a given day.
    #[instrument(skip(self))]
    pub async fn sum_energy_for_window(
        &self,
        device_id: &DeviceId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<f64, DbError> {
        let connection = self.database_client.connection()?;
        let mut results = connection
            .query(
                "SELECT COALESCE(SUM(energy_wh), 0.0) FROM ledger_entries
                 WHERE device_id = ?1 AND start_instant >= ?2 AND start_instant < ?3 AND is_reset_marker = 0",
                params![device_id.as_str(), from.to_rfc3339(), to.to_rfc3339()],
            )
            .await?;
        match results.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(0.0),
        }
    }

    /// Rewrites `tariff_version_id`/`cost_minor` for every entry at or
    /// after `effective_from`, chunked by device so a single recompute run
    /// can resume from `last_recomputed_device` on failure (spec §4.7).
    #[instrument(skip(self))]
    pub async fn retag_tariff_from(
        &self,
        effective_from: DateTime<Utc>,
        new_tariff_id: &str,
        new_cost_per_kwh_minor: i64,
    ) -> Result<u64, DbError> {
        let connection = self.database_client.connection()?;
        let affected = connection
            .execute(
                "UPDATE ledger_entries
                 SET tariff_version_id = ?1,
                     cost_minor = CAST(ROUND(energy_wh / 1000.0 * ?2) AS INTEGER)
                 WHERE start_instant >= ?3 AND is_reset_marker = 0",
                params![new_tariff_id, new_cost_per_kwh_minor, effective_from.to_rfc3339()],
            )
            .await?;
        Ok(affected)
    }
}

fn confidence_label(confidence: Confidence) -> &'static str {
    match confidence {
        Confidence::High => "high",
        Confidence::Derived => "derived",
        Confidence::Reset => "reset",
    }
}

fn parse_confidence(label: &str) -> Confidence {
    match label {
        "derived" => Confidence::Derived,
        "reset" => Confidence::Reset,
        _ => Confidence::High,
    }
}

fn parse_instant(raw: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::MappingError(e.to_string()))
}

fn map_row(row: &Row) -> Result<LedgerEntry, DbError> {
    let switch_id: Option<String> = row.get(2)?;
    let start: String = row.get(3)?;
    let end: String = row.get(4)?;
    let tariff_version_id: Option<String> = row.get(8)?;
    let confidence_label: String = row.get(10)?;

    Ok(LedgerEntry {
        id: row.get::<String>(0)?.into(),
        device_id: row.get::<String>(1)?.into(),
        switch_id: switch_id.map(Into::into),
        start_instant: parse_instant(&start)?,
        end_instant: parse_instant(&end)?,
        duration_sec: row.get(5)?,
        energy_wh: row.get(6)?,
        average_power_w: row.get(7)?,
        tariff_version_id: tariff_version_id.map(Into::into),
        cost_minor: row.get(9)?,
        confidence: parse_confidence(&confidence_label),
        is_reset_marker: row.get::<i64>(11)? != 0,
    })
}
