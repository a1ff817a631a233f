// [crates/switchyard-core/src/lib.rs]
/*!
 * Domain model, error taxonomy, and runtime configuration for the
 * Switchyard classroom/building IoT control plane. This crate has no I/O:
 * every other crate and the `control-plane` app depend on it for the
 * shared vocabulary of ids, entities, and error kinds.
 */

pub mod aggregate;
pub mod config;
pub mod device;
pub mod errors;
pub mod event;
pub mod ids;
pub mod intent;
pub mod ledger;
pub mod schedule;
pub mod session;
pub mod tariff;
pub mod telemetry;
pub mod ticket;
pub mod user;
