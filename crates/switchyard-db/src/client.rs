// [crates/switchyard-db/src/client.rs]
//! Connection management, adapted from the teacher's `TursoClient`: the
//! same remote-vs-local URL sniffing and in-memory anchor-connection trick
//! (SQLite purges an in-memory database once its last connection drops).

use crate::errors::DbError;
use crate::schema::apply_schema;
use libsql::{Builder, Connection, Database};
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Clone)]
pub struct StoreClient {
    driver: Arc<Database>,
    /// Keeps an in-memory database alive for the process lifetime.
    _memory_anchor: Option<Arc<Connection>>,
}

impl StoreClient {
    #[instrument(skip(access_token))]
    pub async fn connect(connection_url: &str, access_token: Option<String>) -> Result<Self, DbError> {
        if connection_url.is_empty() {
            return Err(DbError::ConfigurationError("SWITCHYARD_DATABASE_URL is empty".into()));
        }

        info!("connecting to store at {}", connection_url);

        let is_remote = connection_url.starts_with("libsql://") || connection_url.starts_with("https://");
        let is_memory = connection_url.contains(":memory:");

        let driver = if is_remote {
            let token = access_token
                .ok_or_else(|| DbError::ConfigurationError("remote store requires an access token".into()))?;
            Builder::new_remote(connection_url.to_string(), token).build().await
        } else {
            Builder::new_local(connection_url).build().await
        }
        .map_err(|error| DbError::ConnectionError(error.to_string()))?;

        let driver = Arc::new(driver);
        let mut anchor = None;

        if is_memory {
            let anchor_conn = driver.connect().map_err(|error| DbError::ConnectionError(error.to_string()))?;
            apply_schema(&anchor_conn)
                .await
                .map_err(|error| DbError::ConnectionError(error.to_string()))?;
            anchor = Some(Arc::new(anchor_conn));
        } else {
            let bootstrap_conn = driver.connect().map_err(|error| DbError::ConnectionError(error.to_string()))?;
            apply_schema(&bootstrap_conn)
                .await
                .map_err(|error| DbError::ConnectionError(error.to_string()))?;
        }

        Ok(Self { driver, _memory_anchor: anchor })
    }

    pub fn connection(&self) -> Result<Connection, DbError> {
        self.driver.connect().map_err(|error| DbError::ConnectionError(error.to_string()))
    }
}
