//! Monitoring Module
//!
//! Provides observability for the controller:
//! - Alerting for region health and failover
//! - Tracing subscriber setup

pub mod alerts;
pub mod telemetry;

pub use alerts::{Alert, AlertManager, AlertSeverity, AlertState};
pub use telemetry::init_tracing;
