// [crates/switchyard-db/src/lib.rs]
/*!
 * libsql-backed persistence for the Switchyard control plane: connection
 * management, idempotent schema migration, and one repository per
 * aggregate root.
 */

pub mod client;
pub mod errors;
pub mod repositories;
pub mod schema;

pub use client::StoreClient;
