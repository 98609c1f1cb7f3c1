//! # Regional Router - Multi-region routing and failover
//!
//! Keeps a catalogue of regions and decides where work goes:
//! - **Registry**: regions, per-service health, latency, the single primary
//! - **Routing**: geographic, least-latency, health-based, round-robin
//! - **Failover**: moves primacy and traffic weight off an unhealthy primary
//! - **Deploy / Sync**: parallel fan-out with per-region outcomes
//!
//! Probing, deployment and data transfer are supplied by the host through
//! the [`HealthProbe`], [`ArtifactDeployer`] and [`SnapshotStore`] traits.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use regional_router::config::ControllerConfig;
//! use regional_router::monitoring::init_tracing;
//! use regional_router::{ArtifactDeployer, HealthProbe, RegionalController, SnapshotStore};
//! use regional_router::routing::ClientLocation;
//! use std::sync::Arc;
//!
//! async fn run(
//!     probe: Arc<dyn HealthProbe>,
//!     deployer: Arc<dyn ArtifactDeployer>,
//!     store: Arc<dyn SnapshotStore>,
//! ) -> regional_router::Result<()> {
//!     let config = ControllerConfig::from_file("router.json")?;
//!     init_tracing(&config.logging);
//!
//!     let controller = RegionalController::new(config, probe, deployer, store)?;
//!     controller.start()?;
//!
//!     let decision = controller.route(&ClientLocation::Region("us-east".into()))?;
//!     println!("routing to {}", decision.region_id);
//!
//!     controller.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod controller;
pub mod core;
pub mod deploy;
pub mod monitoring;
pub mod region;
pub mod routing;

#[cfg(test)]
mod testutils;

pub use controller::RegionalController;
pub use core::error::{Error, Result};
pub use deploy::{ArtifactDeployer, ArtifactSpec};
pub use region::{HealthProbe, SnapshotStore};
