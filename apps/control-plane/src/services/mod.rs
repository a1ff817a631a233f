// [apps/control-plane/src/services/mod.rs]
pub mod aggregation_engine;
pub mod command_pipeline;
pub mod ledger_engine;
pub mod permission_broadcast;
pub mod realtime_bus;
pub mod reconciliation;
pub mod scheduler;
pub mod transport_ingress;
