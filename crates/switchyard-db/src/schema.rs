// [crates/switchyard-db/src/schema.rs]
//! Three-phase idempotent schema migration, the same shape as the
//! teacher's `db-turso/src/schema.rs`: base tables, then column additions
//! tolerant of "duplicate column name" (so re-running against an existing
//! database is a no-op), then indexes.

use anyhow::{Context, Result};
use libsql::Connection;
use tracing::{debug, info, instrument, warn};

const BASE_TABLES: &[(&str, &str)] = &[
    ("TABLE_ROLES", r#"
        CREATE TABLE IF NOT EXISTS roles (
            role TEXT PRIMARY KEY,
            capabilities_json TEXT NOT NULL DEFAULT '[]'
        );
    "#),
    ("TABLE_USERS", r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            credential_hash TEXT NOT NULL,
            role TEXT NOT NULL,
            assigned_device_ids_json TEXT NOT NULL DEFAULT '[]',
            assigned_room_ids_json TEXT NOT NULL DEFAULT '[]',
            extra_capabilities_json TEXT NOT NULL DEFAULT '[]',
            active INTEGER NOT NULL DEFAULT 1
        );
    "#),
    ("TABLE_DEVICES", r#"
        CREATE TABLE IF NOT EXISTS devices (
            id TEXT PRIMARY KEY,
            hardware_id TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            room TEXT NOT NULL,
            block TEXT NOT NULL,
            floor TEXT NOT NULL,
            aliases_json TEXT NOT NULL DEFAULT '[]',
            switches_json TEXT NOT NULL DEFAULT '[]',
            owner_room_id TEXT,
            assigned_user_ids_json TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL DEFAULT 'active',
            version INTEGER NOT NULL DEFAULT 0
        );
    "#),
    ("TABLE_DEVICE_SESSIONS", r#"
        CREATE TABLE IF NOT EXISTS device_sessions (
            device_id TEXT PRIMARY KEY,
            status TEXT NOT NULL DEFAULT 'offline',
            last_seen_instant TEXT NOT NULL,
            last_heartbeat_instant TEXT,
            last_device_sequence INTEGER,
            last_session_sequence INTEGER NOT NULL DEFAULT 0,
            session_start_instant TEXT
        );
    "#),
    ("TABLE_TELEMETRY_EVENTS", r#"
        CREATE TABLE IF NOT EXISTS telemetry_events (
            id TEXT PRIMARY KEY,
            device_id TEXT NOT NULL,
            device_sequence INTEGER NOT NULL,
            received_instant TEXT NOT NULL,
            device_instant TEXT NOT NULL,
            energy_counter_wh INTEGER NOT NULL,
            switch_states_json TEXT NOT NULL DEFAULT '[]',
            source_fingerprint TEXT NOT NULL,
            UNIQUE(device_id, source_fingerprint)
        );
    "#),
    ("TABLE_LEDGER_ENTRIES", r#"
        CREATE TABLE IF NOT EXISTS ledger_entries (
            id TEXT PRIMARY KEY,
            device_id TEXT NOT NULL,
            switch_id TEXT,
            start_instant TEXT NOT NULL,
            end_instant TEXT NOT NULL,
            duration_sec INTEGER NOT NULL,
            energy_wh REAL NOT NULL,
            average_power_w REAL NOT NULL,
            tariff_version_id TEXT,
            cost_minor INTEGER NOT NULL DEFAULT 0,
            confidence TEXT NOT NULL,
            is_reset_marker INTEGER NOT NULL DEFAULT 0
        );
    "#),
    ("TABLE_DAILY_AGGREGATES", r#"
        CREATE TABLE IF NOT EXISTS daily_aggregates (
            date TEXT NOT NULL,
            scope TEXT NOT NULL,
            scope_id TEXT NOT NULL,
            total_energy_wh REAL NOT NULL DEFAULT 0,
            on_time_sec INTEGER NOT NULL DEFAULT 0,
            cost_minor INTEGER NOT NULL DEFAULT 0,
            tariff_version_id TEXT,
            switch_breakdown_json TEXT NOT NULL DEFAULT '[]',
            PRIMARY KEY(date, scope, scope_id)
        );
    "#),
    ("TABLE_MONTHLY_AGGREGATES", r#"
        CREATE TABLE IF NOT EXISTS monthly_aggregates (
            year INTEGER NOT NULL,
            month INTEGER NOT NULL,
            scope TEXT NOT NULL,
            scope_id TEXT NOT NULL,
            total_energy_wh REAL NOT NULL DEFAULT 0,
            on_time_sec INTEGER NOT NULL DEFAULT 0,
            cost_minor INTEGER NOT NULL DEFAULT 0,
            tariff_version_id TEXT,
            switch_breakdown_json TEXT NOT NULL DEFAULT '[]',
            PRIMARY KEY(year, month, scope, scope_id)
        );
    "#),
    ("TABLE_TARIFF_VERSIONS", r#"
        CREATE TABLE IF NOT EXISTS tariff_versions (
            id TEXT PRIMARY KEY,
            cost_per_kwh_minor INTEGER NOT NULL,
            effective_from_instant TEXT NOT NULL,
            scope TEXT NOT NULL,
            scope_id TEXT,
            superseded_by_version_id TEXT
        );
    "#),
    ("TABLE_REVIEW_TICKETS", r#"
        CREATE TABLE IF NOT EXISTS review_tickets (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            device_id TEXT NOT NULL,
            window_start TEXT NOT NULL,
            window_end TEXT NOT NULL,
            detail TEXT NOT NULL,
            created_instant TEXT NOT NULL,
            resolved_instant TEXT
        );
    "#),
    ("TABLE_SCHEDULES", r#"
        CREATE TABLE IF NOT EXISTS schedules (
            id TEXT PRIMARY KEY,
            owner_user_id TEXT NOT NULL,
            trigger_json TEXT NOT NULL,
            selector_json TEXT NOT NULL,
            desired_state INTEGER NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            room_id TEXT,
            last_fired_instant TEXT,
            catch_up INTEGER NOT NULL DEFAULT 0
        );
    "#),
];

/// Column additions layered onto the base tables. Tolerant of re-running
/// against an already-evolved schema.
const EVOLUTIONARY_COLUMNS: &[(&str, &str)] = &[
    ("DEVICE_RECONCILIATION_NOTE", "ALTER TABLE devices ADD COLUMN reconciliation_note TEXT"),
];

const INDEXES: &[(&str, &str)] = &[
    ("IDX_DEVICES_ROOM", "CREATE INDEX IF NOT EXISTS idx_devices_room ON devices(room);"),
    ("IDX_TELEMETRY_DEVICE_INSTANT", "CREATE INDEX IF NOT EXISTS idx_telemetry_device_instant ON telemetry_events(device_id, device_instant);"),
    ("IDX_LEDGER_DEVICE_START", "CREATE INDEX IF NOT EXISTS idx_ledger_device_start ON ledger_entries(device_id, start_instant);"),
    ("IDX_TARIFFS_SCOPE", "CREATE INDEX IF NOT EXISTS idx_tariffs_scope ON tariff_versions(scope, scope_id, effective_from_instant);"),
    ("IDX_TICKETS_DEVICE", "CREATE INDEX IF NOT EXISTS idx_tickets_device ON review_tickets(device_id, created_instant);"),
];

#[instrument(skip(connection))]
pub async fn apply_schema(connection: &Connection) -> Result<()> {
    info!("applying switchyard schema");
    create_base_tables(connection).await?;
    apply_evolutionary_columns(connection).await?;
    create_indexes(connection).await?;
    info!("schema synchronized");
    Ok(())
}

async fn create_base_tables(db: &Connection) -> Result<()> {
    for (identifier, sql) in BASE_TABLES {
        debug!("creating table: {}", identifier);
        db.execute(sql, ()).await.with_context(|| format!("failed to create {}", identifier))?;
    }
    Ok(())
}

async fn apply_evolutionary_columns(db: &Connection) -> Result<()> {
    for (identifier, sql) in EVOLUTIONARY_COLUMNS {
        match db.execute(sql, ()).await {
            Ok(_) => info!("applied column migration {}", identifier),
            Err(error) => {
                let message = error.to_string();
                if message.contains("duplicate column name") {
                    debug!("column migration {} already applied", identifier);
                } else {
                    warn!("column migration {} did not apply cleanly: {}", identifier, message);
                }
            }
        }
    }
    Ok(())
}

async fn create_indexes(db: &Connection) -> Result<()> {
    for (identifier, sql) in INDEXES {
        debug!("creating index: {}", identifier);
        db.execute(sql, ()).await.with_context(|| format!("failed to create {}", identifier))?;
    }
    Ok(())
}
