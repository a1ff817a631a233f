// [crates/switchyard-db/src/repositories/mod.rs]
pub mod aggregate_repository;
pub mod device_repository;
pub mod ledger_repository;
pub mod role_repository;
pub mod schedule_repository;
pub mod session_repository;
pub mod tariff_repository;
pub mod telemetry_repository;
pub mod ticket_repository;
pub mod user_repository;
