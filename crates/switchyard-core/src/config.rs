// [crates/switchyard-core/src/config.rs]
//! Immutable configuration snapshot, loaded once at startup from
//! environment variables (spec §6.5). No external config crate is used —
//! matching the teacher's manual `std::env::var` idiom in `kernel.rs` — but
//! the result is wrapped so the control plane can later swap it atomically
//! via `arc_swap::ArcSwap` (design note §9, "Global mutable configuration").

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// IANA timezone name for aggregation and scheduler day boundaries.
    pub timezone: String,
    pub heartbeat_offline: Duration,
    pub debounce: Duration,
    pub ack_timeout: Duration,
    pub bulk_threshold: usize,
    pub confirmation_ttl: Duration,
    pub gap: Duration,
    pub reconciliation_cron: String,
    pub capability_cache_ttl: Duration,
    pub default_cost_per_kwh_minor: i64,
    pub database_url: String,
    pub database_token: Option<String>,
    pub mqtt_broker_url: String,
    pub mqtt_client_id: String,
    pub http_listen_port: u16,
    /// Grace period background services wait for in-flight commands to
    /// drain before cancelling on shutdown (spec §5).
    pub shutdown_grace: Duration,
    /// HMAC signing key for session tokens issued by C1. A development
    /// default is provided so the control plane boots without configuration,
    /// but any real deployment must override it.
    pub session_secret: String,
    pub session_ttl: Duration,
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_millis(key: &str, default_ms: u64) -> Duration {
    let parsed = env::var(key)
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .unwrap_or(default_ms);
    Duration::from_millis(parsed)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse::<i64>().ok())
        .unwrap_or(default)
}

impl RuntimeConfig {
    /// Loads every configuration option enumerated in spec §6.5, applying
    /// the literal defaults named there when the environment is silent.
    pub fn from_env() -> Self {
        Self {
            timezone: env_string("SWITCHYARD_TIMEZONE", "Asia/Kolkata"),
            heartbeat_offline: env_millis("SWITCHYARD_HEARTBEAT_OFFLINE_MS", 90_000),
            debounce: env_millis("SWITCHYARD_DEBOUNCE_MS", 500),
            ack_timeout: env_millis("SWITCHYARD_ACK_TIMEOUT_MS", 3_000),
            bulk_threshold: env_usize("SWITCHYARD_BULK_THRESHOLD", 3),
            confirmation_ttl: env_millis("SWITCHYARD_CONFIRMATION_TTL_MS", 60_000),
            gap: env_millis("SWITCHYARD_GAP_MS", 300_000),
            reconciliation_cron: env_string("SWITCHYARD_RECONCILIATION_CRON", "0 2 * * *"),
            capability_cache_ttl: env_millis("SWITCHYARD_CAPABILITY_CACHE_TTL_MS", 5_000),
            default_cost_per_kwh_minor: env_i64("SWITCHYARD_DEFAULT_COST_PER_KWH_MINOR", 750),
            database_url: env_string("SWITCHYARD_DATABASE_URL", "file:switchyard.db"),
            database_token: env::var("SWITCHYARD_DATABASE_TOKEN").ok(),
            mqtt_broker_url: env_string("SWITCHYARD_MQTT_BROKER_URL", "mqtt://localhost:1883"),
            mqtt_client_id: env_string("SWITCHYARD_MQTT_CLIENT_ID", "switchyard-control-plane"),
            http_listen_port: env_usize("SWITCHYARD_HTTP_PORT", 8080) as u16,
            shutdown_grace: env_millis("SWITCHYARD_SHUTDOWN_GRACE_MS", 10_000),
            session_secret: env_string("SWITCHYARD_SESSION_SECRET", "dev-insecure-secret-change-me"),
            session_ttl: env_millis("SWITCHYARD_SESSION_TTL_MS", 12 * 60 * 60 * 1000),
        }
    }

    pub fn parse_timezone(&self) -> chrono_tz::Tz {
        self.timezone.parse().unwrap_or(chrono_tz::Asia::Kolkata)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
