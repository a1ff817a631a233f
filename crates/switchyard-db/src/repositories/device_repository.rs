// [crates/switchyard-db/src/repositories/device_repository.rs]
use crate::client::StoreClient;
use crate::errors::DbError;
use libsql::{params, Row};
use switchyard_core::device::{Device, DeviceStatus};
use switchyard_core::ids::DeviceId;
use tracing::{info, instrument, warn};

pub struct DeviceRepository {
    database_client: StoreClient,
}

impl DeviceRepository {
    pub fn new(database_client: StoreClient) -> Self {
        Self { database_client }
    }

    #[instrument(skip(self, device))]
    pub async fn insert(&self, device: &Device) -> Result<(), DbError> {
        let connection = self.database_client.connection()?;
        connection
            .execute(
                "INSERT INTO devices (id, hardware_id, display_name, room, block, floor, aliases_json,
                    switches_json, owner_room_id, assigned_user_ids_json, status, version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    device.id.as_str(),
                    device.hardware_id.as_str(),
                    device.display_name.as_str(),
                    device.room.as_str(),
                    device.block.as_str(),
                    device.floor.as_str(),
                    serde_json::to_string(&device.aliases).map_err(|e| DbError::MappingError(e.to_string()))?,
                    serde_json::to_string(&device.switches).map_err(|e| DbError::MappingError(e.to_string()))?,
                    device.owner_room_id.as_ref().map(|r| r.as_str().to_string()),
                    serde_json::to_string(&device.assigned_user_ids).map_err(|e| DbError::MappingError(e.to_string()))?,
                    status_label(device.status),
                    device.version as i64,
                ],
            )
            .await?;

        info!("registered device {} ({})", device.id, device.hardware_id);
        Ok(())
    }

    /// Replaces the full document, guarded by optimistic concurrency on
    /// `version` (spec §5 "shared resources"). Returns `DbError::Conflict`
    /// when the stored version has moved since the caller last read it.
    #[instrument(skip(self, device))]
    pub async fn update_guarded(&self, device: &Device, expected_version: u64) -> Result<(), DbError> {
        let connection = self.database_client.connection()?;
        let rows_affected = connection
            .execute(
                "UPDATE devices SET display_name = ?2, room = ?3, block = ?4, floor = ?5,
                    aliases_json = ?6, switches_json = ?7, owner_room_id = ?8,
                    assigned_user_ids_json = ?9, status = ?10, version = version + 1
                 WHERE id = ?1 AND version = ?11",
                params![
                    device.id.as_str(),
                    device.display_name.as_str(),
                    device.room.as_str(),
                    device.block.as_str(),
                    device.floor.as_str(),
                    serde_json::to_string(&device.aliases).map_err(|e| DbError::MappingError(e.to_string()))?,
                    serde_json::to_string(&device.switches).map_err(|e| DbError::MappingError(e.to_string()))?,
                    device.owner_room_id.as_ref().map(|r| r.as_str().to_string()),
                    serde_json::to_string(&device.assigned_user_ids).map_err(|e| DbError::MappingError(e.to_string()))?,
                    status_label(device.status),
                    expected_version as i64,
                ],
            )
            .await?;

        if rows_affected == 0 {
            warn!("optimistic concurrency conflict updating device {}", device.id);
            return Err(DbError::Conflict(format!("device {} version moved", device.id)));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn find_by_id(&self, device_id: &DeviceId) -> Result<Option<Device>, DbError> {
        let connection = self.database_client.connection()?;
        let mut results = connection
            .query("SELECT * FROM devices WHERE id = ?1", params![device_id.as_str()])
            .await?;
        match results.next().await? {
            Some(row) => Ok(Some(map_row_to_device(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    pub async fn find_by_hardware_id(&self, hardware_id: &str) -> Result<Option<Device>, DbError> {
        let connection = self.database_client.connection()?;
        let mut results = connection
            .query("SELECT * FROM devices WHERE hardware_id = ?1", params![hardware_id])
            .await?;
        match results.next().await? {
            Some(row) => Ok(Some(map_row_to_device(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    pub async fn list_by_room(&self, room: &str) -> Result<Vec<Device>, DbError> {
        let connection = self.database_client.connection()?;
        let mut results = connection
            .query("SELECT * FROM devices WHERE room = ?1 ORDER BY display_name", params![room])
            .await?;
        let mut devices = Vec::new();
        while let Some(row) = results.next().await? {
            devices.push(map_row_to_device(&row)?);
        }
        Ok(devices)
    }

    #[instrument(skip(self))]
    pub async fn list_all(&self) -> Result<Vec<Device>, DbError> {
        let connection = self.database_client.connection()?;
        let mut results = connection.query("SELECT * FROM devices ORDER BY display_name", ()).await?;
        let mut devices = Vec::new();
        while let Some(row) = results.next().await? {
            devices.push(map_row_to_device(&row)?);
        }
        Ok(devices)
    }

    /// Case-insensitive, tokenized alias lookup (spec §4.2). Filters in
    /// memory after a broad fetch; the device catalog is small enough
    /// (classroom/building scale) that this avoids a SQL-side tokenizer.
    #[instrument(skip(self))]
    pub async fn find_by_alias_token(&self, token: &str) -> Result<Vec<Device>, DbError> {
        let needle = token.to_lowercase();
        let all = self.list_all().await?;
        Ok(all
            .into_iter()
            .filter(|device| {
                device.aliases.iter().any(|alias| alias.to_lowercase().contains(&needle))
                    || device.display_name.to_lowercase().contains(&needle)
            })
            .collect())
    }

    #[instrument(skip(self))]
    pub async fn list_by_assigned_user(&self, user_id: &str) -> Result<Vec<Device>, DbError> {
        // assigned_user_ids_json is a JSON array; filter in memory after a
        // broad fetch rather than relying on SQLite's json1 extension,
        // which is not guaranteed present on every libsql build target.
        let all = self.list_all().await?;
        Ok(all
            .into_iter()
            .filter(|device| device.assigned_user_ids.iter().any(|id| id.as_str() == user_id))
            .collect())
    }
}

fn status_label(status: DeviceStatus) -> &'static str {
    match status {
        DeviceStatus::Active => "active",
        DeviceStatus::Decommissioned => "decommissioned",
    }
}

fn parse_status(label: &str) -> DeviceStatus {
    match label {
        "decommissioned" => DeviceStatus::Decommissioned,
        _ => DeviceStatus::Active,
    }
}

fn map_row_to_device(row: &Row) -> Result<Device, DbError> {
    let aliases_json: String = row.get(6)?;
    let switches_json: String = row.get(7)?;
    let owner_room_id: Option<String> = row.get(8)?;
    let assigned_user_ids_json: String = row.get(9)?;
    let status_label: String = row.get(10)?;

    Ok(Device {
        id: row.get::<String>(0)?.into(),
        hardware_id: row.get(1)?,
        display_name: row.get(2)?,
        room: row.get(3)?,
        block: row.get(4)?,
        floor: row.get(5)?,
        aliases: serde_json::from_str(&aliases_json).map_err(|e| DbError::MappingError(e.to_string()))?,
        switches: serde_json::from_str(&switches_json).map_err(|e| DbError::MappingError(e.to_string()))?,
        owner_room_id: owner_room_id.map(Into::into),
        assigned_user_ids: serde_json::from_str(&assigned_user_ids_json)
            .map_err(|e| DbError::MappingError(e.to_string()))?,
        status: parse_status(&status_label),
        version: row.get::<i64>(11)? as u64,
    })
}
