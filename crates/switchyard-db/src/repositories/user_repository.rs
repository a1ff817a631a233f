// [crates/switchyard-db/src/repositories/user_repository.rs]
use crate::client::StoreClient;
use crate::errors::DbError;
use libsql::{params, Row};
use switchyard_core::ids::UserId;
use switchyard_core::user::{Capability, RoleName, User};
use tracing::instrument;

pub struct UserRepository {
    database_client: StoreClient,
}

impl UserRepository {
    pub fn new(database_client: StoreClient) -> Self {
        Self { database_client }
    }

    #[instrument(skip(self, user))]
    pub async fn insert(&self, user: &User) -> Result<(), DbError> {
        let connection = self.database_client.connection()?;
        connection
            .execute(
                "INSERT INTO users (id, display_name, credential_hash, role, assigned_device_ids_json,
                    assigned_room_ids_json, extra_capabilities_json, active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    user.id.as_str(),
                    user.display_name.as_str(),
                    user.credential_hash.as_str(),
                    user.role.0.as_str(),
                    serde_json::to_string(&user.assigned_device_ids).map_err(|e| DbError::MappingError(e.to_string()))?,
                    serde_json::to_string(&user.assigned_room_ids).map_err(|e| DbError::MappingError(e.to_string()))?,
                    serde_json::to_string(&user.extra_capabilities).map_err(|e| DbError::MappingError(e.to_string()))?,
                    user.active as i64,
                ],
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn find_by_id(&self, user_id: &UserId) -> Result<Option<User>, DbError> {
        let connection = self.database_client.connection()?;
        let mut results = connection
            .query("SELECT * FROM users WHERE id = ?1", params![user_id.as_str()])
            .await?;
        match results.next().await? {
            Some(row) => Ok(Some(map_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Assignment mutations fan out through the permission broadcast
    /// service (C11), so this returns the prior role for comparison.
    #[instrument(skip(self))]
    pub async fn update_role(&self, user_id: &UserId, new_role: &RoleName) -> Result<RoleName, DbError> {
        let connection = self.database_client.connection()?;
        let previous = self
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("user {}", user_id)))?
            .role;

        connection
            .execute(
                "UPDATE users SET role = ?2 WHERE id = ?1",
                params![user_id.as_str(), new_role.0.as_str()],
            )
            .await?;
        Ok(previous)
    }

    #[instrument(skip(self))]
    pub async fn list_by_role(&self, role: &RoleName) -> Result<Vec<User>, DbError> {
        let connection = self.database_client.connection()?;
        let mut results = connection
            .query("SELECT * FROM users WHERE role = ?1", params![role.0.as_str()])
            .await?;
        let mut users = Vec::new();
        while let Some(row) = results.next().await? {
            users.push(map_row(&row)?);
        }
        Ok(users)
    }
}

fn map_row(row: &Row) -> Result<User, DbError> {
    let assigned_device_ids_json: String = row.get(4)?;
    let assigned_room_ids_json: String = row.get(5)?;
    let extra_capabilities_json: String = row.get(6)?;

    Ok(User {
        id: row.get::<String>(0)?.into(),
        display_name: row.get(1)?,
        credential_hash: row.get(2)?,
        role: RoleName(row.get(3)?),
        assigned_device_ids: serde_json::from_str(&assigned_device_ids_json)
            .map_err(|e| DbError::MappingError(e.to_string()))?,
        assigned_room_ids: serde_json::from_str(&assigned_room_ids_json)
            .map_err(|e| DbError::MappingError(e.to_string()))?,
        extra_capabilities: serde_json::from_str::<Vec<Capability>>(&extra_capabilities_json)
            .map(|v| v.into_iter().collect())
            .map_err(|e| DbError::MappingError(e.to_string()))?,
        active: row.get::<i64>(7)? != 0,
    })
}
