// [crates/switchyard-db/src/repositories/role_repository.rs]
use crate::client::StoreClient;
use crate::errors::DbError;
use libsql::{params, Row};
use switchyard_core::user::{Capability, RoleDefinition, RoleName};
use tracing::{info, instrument};

pub struct RoleRepository {
    database_client: StoreClient,
}

impl RoleRepository {
    pub fn new(database_client: StoreClient) -> Self {
        Self { database_client }
    }

    #[instrument(skip(self))]
    pub async fn find(&self, role: &RoleName) -> Result<Option<RoleDefinition>, DbError> {
        let connection = self.database_client.connection()?;
        let mut results = connection
            .query("SELECT * FROM roles WHERE role = ?1", params![role.0.as_str()])
            .await?;
        match results.next().await? {
            Some(row) => Ok(Some(map_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Mutates a role's capability bundle (`POST /roles/{role}/capabilities`,
    /// spec §6.1) and returns the prior definition so the caller can diff
    /// the changed capability keys for the permission-broadcast event.
    #[instrument(skip(self, capabilities))]
    pub async fn set_capabilities(
        &self,
        role: &RoleName,
        capabilities: &std::collections::BTreeSet<Capability>,
    ) -> Result<Option<RoleDefinition>, DbError> {
        let previous = self.find(role).await?;
        let connection = self.database_client.connection()?;
        connection
            .execute(
                "INSERT INTO roles (role, capabilities_json) VALUES (?1, ?2)
                 ON CONFLICT(role) DO UPDATE SET capabilities_json = excluded.capabilities_json",
                params![
                    role.0.as_str(),
                    serde_json::to_string(capabilities).map_err(|e| DbError::MappingError(e.to_string()))?,
                ],
            )
            .await?;
        info!("role {} capability bundle updated", role);
        Ok(previous)
    }

    #[instrument(skip(self))]
    pub async fn list_all(&self) -> Result<Vec<RoleDefinition>, DbError> {
        let connection = self.database_client.connection()?;
        let mut results = connection.query("SELECT * FROM roles", ()).await?;
        let mut roles = Vec::new();
        while let Some(row) = results.next().await? {
            roles.push(map_row(&row)?);
        }
        Ok(roles)
    }
}

fn map_row(row: &Row) -> Result<RoleDefinition, DbError> {
    let capabilities_json: String = row.get(1)?;
    Ok(RoleDefinition {
        role: RoleName(row.get(0)?),
        capabilities: serde_json::from_str(&capabilities_json).map_err(|e| DbError::MappingError(e.to_string()))?,
    })
}
