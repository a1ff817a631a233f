// [crates/switchyard-db/src/repositories/tariff_repository.rs]
use crate::client::StoreClient;
use crate::errors::DbError;
use chrono::{DateTime, Utc};
use libsql::{params, Row};
use switchyard_core::tariff::{TariffScope, TariffVersion};
use tracing::{info, instrument};

pub struct TariffRepository {
    database_client: StoreClient,
}

impl TariffRepository {
    pub fn new(database_client: StoreClient) -> Self {
        Self { database_client }
    }

    /// Inserts the new version and supersedes the previously active one
    /// for the same scope in a single transaction (spec §3.2: tariffs are
    /// immutable once created, a new rate only annotates the prior row).
    #[instrument(skip(self, tariff))]
    pub async fn create_version(&self, tariff: &TariffVersion) -> Result<(), DbError> {
        let mut connection = self.database_client.connection()?;
        let transaction = connection
            .transaction()
            .await
            .map_err(|e| DbError::TransactionError(e.to_string()))?;

        let scope_id = tariff.scope_id.as_ref().map(|r| r.as_str().to_string());

        if let Some(previous) = find_active_in_tx(&transaction, tariff.scope, scope_id.as_deref(), tariff.effective_from_instant).await? {
            transaction
                .execute(
                    "UPDATE tariff_versions SET superseded_by_version_id = ?2 WHERE id = ?1",
                    params![previous, tariff.id.as_str()],
                )
                .await?;
        }

        transaction
            .execute(
                "INSERT INTO tariff_versions (id, cost_per_kwh_minor, effective_from_instant, scope, scope_id,
                    superseded_by_version_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL)",
                params![
                    tariff.id.as_str(),
                    tariff.cost_per_kwh_minor,
                    tariff.effective_from_instant.to_rfc3339(),
                    scope_label(tariff.scope),
                    scope_id,
                ],
            )
            .await?;

        transaction
            .commit()
            .await
            .map_err(|e| DbError::TransactionError(e.to_string()))?;

        info!("tariff {} activated at {}", tariff.id, tariff.effective_from_instant);
        Ok(())
    }

    /// Resolves the active tariff at `instant`, room scope preferred with
    /// global fallback (spec §4.6 "Cost computation").
    #[instrument(skip(self))]
    pub async fn resolve_active(
        &self,
        room_id: Option<&str>,
        instant: DateTime<Utc>,
    ) -> Result<Option<TariffVersion>, DbError> {
        let connection = self.database_client.connection()?;

        if let Some(room) = room_id {
            let mut results = connection
                .query(
                    "SELECT * FROM tariff_versions WHERE scope = 'room' AND scope_id = ?1
                     AND effective_from_instant <= ?2
                     ORDER BY effective_from_instant DESC LIMIT 1",
                    params![room, instant.to_rfc3339()],
                )
                .await?;
            if let Some(row) = results.next().await? {
                return Ok(Some(map_row(&row)?));
            }
        }

        let mut results = connection
            .query(
                "SELECT * FROM tariff_versions WHERE scope = 'global'
                 AND effective_from_instant <= ?1
                 ORDER BY effective_from_instant DESC LIMIT 1",
                params![instant.to_rfc3339()],
            )
            .await?;
        match results.next().await? {
            Some(row) => Ok(Some(map_row(&row)?)),
            None => Ok(None),
        }
    }
}

async fn find_active_in_tx(
    transaction: &libsql::Transaction,
    scope: TariffScope,
    scope_id: Option<&str>,
    before: DateTime<Utc>,
) -> Result<Option<String>, DbError> {
    let mut results = transaction
        .query(
            "SELECT id FROM tariff_versions WHERE scope = ?1 AND scope_id IS ?2
             AND superseded_by_version_id IS NULL AND effective_from_instant <= ?3
             ORDER BY effective_from_instant DESC LIMIT 1",
            params![scope_label(scope), scope_id, before.to_rfc3339()],
        )
        .await?;
    match results.next().await? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

fn scope_label(scope: TariffScope) -> &'static str {
    match scope {
        TariffScope::Global => "global",
        TariffScope::Room => "room",
    }
}

fn parse_scope(label: &str) -> TariffScope {
    match label {
        "room" => TariffScope::Room,
        _ => TariffScope::Global,
    }
}

fn map_row(row: &Row) -> Result<TariffVersion, DbError> {
    let effective_from: String = row.get(2)?;
    let scope_label: String = row.get(3)?;
    let scope_id: Option<String> = row.get(4)?;
    let superseded_by: Option<String> = row.get(5)?;

    Ok(TariffVersion {
        id: row.get::<String>(0)?.into(),
        cost_per_kwh_minor: row.get(1)?,
        effective_from_instant: DateTime::parse_from_rfc3339(&effective_from)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| DbError::MappingError(e.to_string()))?,
        scope: parse_scope(&scope_label),
        scope_id: scope_id.map(Into::into),
        superseded_by_version_id: superseded_by.map(Into::into),
    })
}
