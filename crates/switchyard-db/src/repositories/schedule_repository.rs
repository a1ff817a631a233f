// [crates/switchyard-db/src/repositories/schedule_repository.rs]
use crate::client::StoreClient;
use crate::errors::DbError;
use chrono::{DateTime, Utc};
use libsql::{params, Row};
use switchyard_core::ids::{RoomId, ScheduleId, UserId};
use switchyard_core::intent::Selector;
use switchyard_core::schedule::{Schedule, Trigger};
use tracing::{info, instrument};

pub struct ScheduleRepository {
    database_client: StoreClient,
}

impl ScheduleRepository {
    pub fn new(database_client: StoreClient) -> Self {
        Self { database_client }
    }

    #[instrument(skip(self, schedule))]
    pub async fn insert(&self, schedule: &Schedule) -> Result<(), DbError> {
        let connection = self.database_client.connection()?;
        connection
            .execute(
                "INSERT INTO schedules (id, owner_user_id, trigger_json, selector_json, desired_state,
                    enabled, room_id, last_fired_instant, catch_up)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    schedule.id.as_str(),
                    schedule.owner_user_id.as_str(),
                    serde_json::to_string(&schedule.trigger).map_err(|e| DbError::MappingError(e.to_string()))?,
                    serde_json::to_string(&schedule.selector).map_err(|e| DbError::MappingError(e.to_string()))?,
                    schedule.desired_state as i64,
                    schedule.enabled as i64,
                    schedule.room_id.as_ref().map(|r| r.as_str().to_string()),
                    schedule.last_fired_instant.map(|i| i.to_rfc3339()),
                    schedule.catch_up as i64,
                ],
            )
            .await?;
        info!("created schedule {} for owner {}", schedule.id, schedule.owner_user_id);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn find_by_id(&self, schedule_id: &str) -> Result<Option<Schedule>, DbError> {
        let connection = self.database_client.connection()?;
        let mut results = connection
            .query("SELECT * FROM schedules WHERE id = ?1", params![schedule_id])
            .await?;
        match results.next().await? {
            Some(row) => Ok(Some(map_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Read by the scheduler's tick loop, which only ever needs live
    /// schedules and filters the rest out in the database rather than
    /// dragging disabled rows through the evaluation path.
    #[instrument(skip(self))]
    pub async fn list_enabled(&self) -> Result<Vec<Schedule>, DbError> {
        let connection = self.database_client.connection()?;
        let mut results = connection.query("SELECT * FROM schedules WHERE enabled = 1", ()).await?;
        let mut schedules = Vec::new();
        while let Some(row) = results.next().await? {
            schedules.push(map_row(&row)?);
        }
        Ok(schedules)
    }

    #[instrument(skip(self))]
    pub async fn list_for_owner(&self, owner_user_id: &UserId) -> Result<Vec<Schedule>, DbError> {
        let connection = self.database_client.connection()?;
        let mut results = connection
            .query("SELECT * FROM schedules WHERE owner_user_id = ?1", params![owner_user_id.as_str()])
            .await?;
        let mut schedules = Vec::new();
        while let Some(row) = results.next().await? {
            schedules.push(map_row(&row)?);
        }
        Ok(schedules)
    }

    #[instrument(skip(self))]
    pub async fn mark_fired(&self, schedule_id: &str, fired_instant: DateTime<Utc>) -> Result<(), DbError> {
        let connection = self.database_client.connection()?;
        let affected = connection
            .execute(
                "UPDATE schedules SET last_fired_instant = ?2 WHERE id = ?1",
                params![schedule_id, fired_instant.to_rfc3339()],
            )
            .await?;
        if affected == 0 {
            return Err(DbError::NotFound(format!("schedule {}", schedule_id)));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn set_enabled(&self, schedule_id: &str, enabled: bool) -> Result<(), DbError> {
        let connection = self.database_client.connection()?;
        let affected = connection
            .execute("UPDATE schedules SET enabled = ?2 WHERE id = ?1", params![schedule_id, enabled as i64])
            .await?;
        if affected == 0 {
            return Err(DbError::NotFound(format!("schedule {}", schedule_id)));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, schedule_id: &str) -> Result<(), DbError> {
        let connection = self.database_client.connection()?;
        let affected = connection.execute("DELETE FROM schedules WHERE id = ?1", params![schedule_id]).await?;
        if affected == 0 {
            return Err(DbError::NotFound(format!("schedule {}", schedule_id)));
        }
        Ok(())
    }
}

fn map_row(row: &Row) -> Result<Schedule, DbError> {
    let trigger_json: String = row.get(2)?;
    let selector_json: String = row.get(3)?;
    let desired_state: i64 = row.get(4)?;
    let enabled: i64 = row.get(5)?;
    let room_id: Option<String> = row.get(6)?;
    let last_fired: Option<String> = row.get(7)?;
    let catch_up: i64 = row.get(8)?;

    let trigger: Trigger = serde_json::from_str(&trigger_json).map_err(|e| DbError::MappingError(e.to_string()))?;
    let selector: Selector = serde_json::from_str(&selector_json).map_err(|e| DbError::MappingError(e.to_string()))?;
    let last_fired_instant = last_fired
        .map(|raw| DateTime::parse_from_rfc3339(&raw).map(|dt| dt.with_timezone(&Utc)))
        .transpose()
        .map_err(|e| DbError::MappingError(e.to_string()))?;

    Ok(Schedule {
        id: ScheduleId::from(row.get::<String>(0)?),
        owner_user_id: UserId::from(row.get::<String>(1)?),
        trigger,
        selector,
        desired_state: desired_state != 0,
        enabled: enabled != 0,
        room_id: room_id.map(RoomId::from),
        last_fired_instant,
        catch_up: catch_up != 0,
    })
}
