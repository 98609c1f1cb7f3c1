//! Multi-region Module
//!
//! Provides regional state and the control loop around it:
//! - Region registry
//! - Health monitoring
//! - Failover
//! - State synchronization

pub mod failover;
pub mod health;
pub mod registry;
pub mod sync;

pub use failover::{FailoverEvent, FailoverManager, FailoverOutcome, FailoverReason, FailoverState};
pub use health::{CycleReport, HealthMonitor, HealthProbe, PrimaryUnhealthy, ProbeOutcome};
pub use registry::{Region, RegionRegistry, ServiceHealthState};
pub use sync::{PayloadEncoding, Snapshot, SnapshotStore, StateSynchronizer, SyncJob, SyncMode};
