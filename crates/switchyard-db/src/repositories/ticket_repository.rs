// [crates/switchyard-db/src/repositories/ticket_repository.rs]
use crate::client::StoreClient;
use crate::errors::DbError;
use chrono::{DateTime, Utc};
use libsql::{params, Row};
use switchyard_core::ids::DeviceId;
use switchyard_core::ticket::{ReviewTicket, TicketKind};
use tracing::instrument;

pub struct TicketRepository {
    database_client: StoreClient,
}

impl TicketRepository {
    pub fn new(database_client: StoreClient) -> Self {
        Self { database_client }
    }

    #[instrument(skip(self, ticket))]
    pub async fn insert(&self, ticket: &ReviewTicket) -> Result<(), DbError> {
        let connection = self.database_client.connection()?;
        connection
            .execute(
                "INSERT INTO review_tickets (id, kind, device_id, window_start, window_end, detail,
                    created_instant, resolved_instant)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL)",
                params![
                    ticket.id.as_str(),
                    kind_label(ticket.kind),
                    ticket.device_id.as_str(),
                    ticket.window_start.to_rfc3339(),
                    ticket.window_end.to_rfc3339(),
                    ticket.detail.as_str(),
                    ticket.created_instant.to_rfc3339(),
                ],
            )
            .await?;
        Ok(())
    }

    /// Used by the reconciliation job (C8) to avoid re-ticketing a window
    /// it has already flagged, keeping the sweep idempotent over a day.
    #[instrument(skip(self))]
    pub async fn exists_for_window(
        &self,
        device_id: &DeviceId,
        kind: TicketKind,
        window_start: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let connection = self.database_client.connection()?;
        let mut results = connection
            .query(
                "SELECT 1 FROM review_tickets WHERE device_id = ?1 AND kind = ?2 AND window_start = ?3 LIMIT 1",
                params![device_id.as_str(), kind_label(kind), window_start.to_rfc3339()],
            )
            .await?;
        Ok(results.next().await?.is_some())
    }

    #[instrument(skip(self))]
    pub async fn list_open(&self) -> Result<Vec<ReviewTicket>, DbError> {
        let connection = self.database_client.connection()?;
        let mut results = connection
            .query(
                "SELECT * FROM review_tickets WHERE resolved_instant IS NULL ORDER BY created_instant DESC",
                (),
            )
            .await?;
        let mut tickets = Vec::new();
        while let Some(row) = results.next().await? {
            tickets.push(map_row(&row)?);
        }
        Ok(tickets)
    }

    #[instrument(skip(self))]
    pub async fn count_open(&self) -> Result<i64, DbError> {
        let connection = self.database_client.connection()?;
        let mut results = connection
            .query("SELECT COUNT(*) FROM review_tickets WHERE resolved_instant IS NULL", ())
            .await?;
        match results.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(0),
        }
    }

    #[instrument(skip(self))]
    pub async fn resolve(&self, ticket_id: &str) -> Result<(), DbError> {
        let connection = self.database_client.connection()?;
        let affected = connection
            .execute(
                "UPDATE review_tickets SET resolved_instant = ?2 WHERE id = ?1 AND resolved_instant IS NULL",
                params![ticket_id, Utc::now().to_rfc3339()],
            )
            .await?;
        if affected == 0 {
            return Err(DbError::NotFound(format!("open review ticket {}", ticket_id)));
        }
        Ok(())
    }
}

fn kind_label(kind: TicketKind) -> &'static str {
    match kind {
        TicketKind::Gap => "gap",
        TicketKind::Duplicate => "duplicate",
        TicketKind::Reset => "reset",
        TicketKind::NegativeDelta => "negative-delta",
    }
}

fn parse_kind(label: &str) -> TicketKind {
    match label {
        "duplicate" => TicketKind::Duplicate,
        "reset" => TicketKind::Reset,
        "negative-delta" => TicketKind::NegativeDelta,
        _ => TicketKind::Gap,
    }
}

fn parse_instant(raw: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::MappingError(e.to_string()))
}

fn map_row(row: &Row) -> Result<ReviewTicket, DbError> {
    let kind_label: String = row.get(1)?;
    let window_start: String = row.get(3)?;
    let window_end: String = row.get(4)?;
    let created: String = row.get(6)?;
    let resolved: Option<String> = row.get(7)?;

    Ok(ReviewTicket {
        id: row.get::<String>(0)?.into(),
        kind: parse_kind(&kind_label),
        device_id: row.get::<String>(2)?.into(),
        window_start: parse_instant(&window_start)?,
        window_end: parse_instant(&window_end)?,
        detail: row.get(5)?,
        created_instant: parse_instant(&created)?,
        resolved_instant: resolved.map(|raw| parse_instant(&raw)).transpose()?,
    })
}
