//! Deployment Module
//!
//! Rolls artifacts out to regions:
//! - Artifact specification
//! - Parallel deployment with per-region outcomes

pub mod artifact;
pub mod orchestrator;

pub use artifact::ArtifactSpec;
pub use orchestrator::{ArtifactDeployer, DeploymentJob, DeploymentOrchestrator};
