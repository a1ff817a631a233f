// [crates/switchyard-db/src/repositories/aggregate_repository.rs]
use crate::client::StoreClient;
use crate::errors::DbError;
use libsql::{params, Row};
use switchyard_core::aggregate::{AggregateScope, DailyAggregate, MonthlyAggregate, SwitchBreakdown};
use tracing::instrument;

pub struct AggregateRepository {
    database_client: StoreClient,
}

impl AggregateRepository {
    pub fn new(database_client: StoreClient) -> Self {
        Self { database_client }
    }

    #[instrument(skip(self, aggregate))]
    pub async fn upsert_daily(&self, aggregate: &DailyAggregate) -> Result<(), DbError> {
        let connection = self.database_client.connection()?;
        connection
            .execute(
                "INSERT INTO daily_aggregates (date, scope, scope_id, total_energy_wh, on_time_sec,
                    cost_minor, tariff_version_id, switch_breakdown_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(date, scope, scope_id) DO UPDATE SET
                    total_energy_wh = excluded.total_energy_wh,
                    on_time_sec = excluded.on_time_sec,
                    cost_minor = excluded.cost_minor,
                    tariff_version_id = excluded.tariff_version_id,
                    switch_breakdown_json = excluded.switch_breakdown_json",
                params![
                    aggregate.date.as_str(),
                    aggregate.scope.as_str(),
                    aggregate.scope_id.as_str(),
                    aggregate.total_energy_wh,
                    aggregate.on_time_sec,
                    aggregate.cost_minor,
                    aggregate.tariff_version_id.as_ref().map(|t| t.as_str().to_string()),
                    serde_json::to_string(&aggregate.switch_breakdown)
                        .map_err(|e| DbError::MappingError(e.to_string()))?,
                ],
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self, aggregate))]
    pub async fn upsert_monthly(&self, aggregate: &MonthlyAggregate) -> Result<(), DbError> {
        let connection = self.database_client.connection()?;
        connection
            .execute(
                "INSERT INTO monthly_aggregates (year, month, scope, scope_id, total_energy_wh,
                    on_time_sec, cost_minor, tariff_version_id, switch_breakdown_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(year, month, scope, scope_id) DO UPDATE SET
                    total_energy_wh = excluded.total_energy_wh,
                    on_time_sec = excluded.on_time_sec,
                    cost_minor = excluded.cost_minor,
                    tariff_version_id = excluded.tariff_version_id,
                    switch_breakdown_json = excluded.switch_breakdown_json",
                params![
                    aggregate.year,
                    aggregate.month,
                    aggregate.scope.as_str(),
                    aggregate.scope_id.as_str(),
                    aggregate.total_energy_wh,
                    aggregate.on_time_sec,
                    aggregate.cost_minor,
                    aggregate.tariff_version_id.as_ref().map(|t| t.as_str().to_string()),
                    serde_json::to_string(&aggregate.switch_breakdown)
                        .map_err(|e| DbError::MappingError(e.to_string()))?,
                ],
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_daily(
        &self,
        scope: AggregateScope,
        scope_id: &str,
        date: &str,
    ) -> Result<Option<DailyAggregate>, DbError> {
        let connection = self.database_client.connection()?;
        let mut results = connection
            .query(
                "SELECT * FROM daily_aggregates WHERE date = ?1 AND scope = ?2 AND scope_id = ?3",
                params![date, scope.as_str(), scope_id],
            )
            .await?;
        match results.next().await? {
            Some(row) => Ok(Some(map_daily_row(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    pub async fn get_monthly(
        &self,
        scope: AggregateScope,
        scope_id: &str,
        year: i32,
        month: u32,
    ) -> Result<Option<MonthlyAggregate>, DbError> {
        let connection = self.database_client.connection()?;
        let mut results = connection
            .query(
                "SELECT * FROM monthly_aggregates WHERE year = ?1 AND month = ?2 AND scope = ?3 AND scope_id = ?4",
                params![year, month, scope.as_str(), scope_id],
            )
            .await?;
        match results.next().await? {
            Some(row) => Ok(Some(map_monthly_row(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    pub async fn get_range(
        &self,
        scope: AggregateScope,
        scope_id: &str,
        from_date: &str,
        to_date: &str,
    ) -> Result<Vec<DailyAggregate>, DbError> {
        let connection = self.database_client.connection()?;
        let mut results = connection
            .query(
                "SELECT * FROM daily_aggregates WHERE scope = ?1 AND scope_id = ?2
                 AND date >= ?3 AND date <= ?4 ORDER BY date ASC",
                params![scope.as_str(), scope_id, from_date, to_date],
            )
            .await?;
        let mut aggregates = Vec::new();
        while let Some(row) = results.next().await? {
            aggregates.push(map_daily_row(&row)?);
        }
        Ok(aggregates)
    }
}

fn map_daily_row(row: &Row) -> Result<DailyAggregate, DbError> {
    let scope_label: String = row.get(1)?;
    let tariff_version_id: Option<String> = row.get(6)?;
    let switch_breakdown_json: String = row.get(7)?;

    Ok(DailyAggregate {
        date: row.get(0)?,
        scope: parse_scope(&scope_label),
        scope_id: row.get(2)?,
        total_energy_wh: row.get(3)?,
        on_time_sec: row.get(4)?,
        cost_minor: row.get(5)?,
        tariff_version_id: tariff_version_id.map(Into::into),
        switch_breakdown: serde_json::from_str::<Vec<SwitchBreakdown>>(&switch_breakdown_json)
            .map_err(|e| DbError::MappingError(e.to_string()))?,
    })
}

fn map_monthly_row(row: &Row) -> Result<MonthlyAggregate, DbError> {
    let scope_label: String = row.get(2)?;
    let tariff_version_id: Option<String> = row.get(7)?;
    let switch_breakdown_json: String = row.get(8)?;

    Ok(MonthlyAggregate {
        year: row.get(0)?,
        month: row.get(1)?,
        scope: parse_scope(&scope_label),
        scope_id: row.get(3)?,
        total_energy_wh: row.get(4)?,
        on_time_sec: row.get(5)?,
        cost_minor: row.get(6)?,
        tariff_version_id: tariff_version_id.map(Into::into),
        switch_breakdown: serde_json::from_str::<Vec<SwitchBreakdown>>(&switch_breakdown_json)
            .map_err(|e| DbError::MappingError(e.to_string()))?,
    })
}

fn parse_scope(label: &str) -> AggregateScope {
    match label {
        "room" => AggregateScope::Room,
        "global" => AggregateScope::Global,
        _ => AggregateScope::Device,
    }
}
