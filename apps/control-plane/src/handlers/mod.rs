// [apps/control-plane/src/handlers/mod.rs]
pub mod analytics;
pub mod auth;
pub mod devices;
pub mod health;
pub mod intents;
pub mod realtime;
pub mod roles;
pub mod schedules;
pub mod tariffs;
