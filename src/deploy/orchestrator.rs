//! Deployment fan-out across regions.
//!
//! Coordination and reporting only: a failed region is reported, never
//! rolled back.

use crate::core::fanout::run_parallel;
use crate::core::{now, Error, JobStatus, RegionOutcome, Result, Timestamp};
use crate::deploy::artifact::ArtifactSpec;
use crate::region::RegionRegistry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Rollout capability supplied by the hosting environment.
#[async_trait]
pub trait ArtifactDeployer: Send + Sync {
    async fn deploy_artifact(&self, region_id: &str, spec: &ArtifactSpec) -> Result<()>;
}

/// Result of one deployment run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeploymentJob {
    /// Job ID
    pub id: String,
    pub artifact: ArtifactSpec,
    /// Requested regions, deduplicated, in request order
    pub targets: Vec<String>,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    pub outcomes: Vec<RegionOutcome>,
    pub status: JobStatus,
}

impl DeploymentJob {
    /// Outcome for one region.
    pub fn outcome(&self, region_id: &str) -> Option<&RegionOutcome> {
        self.outcomes.iter().find(|o| o.region_id == region_id)
    }
}

/// Fans a deployment out to regions in parallel.
pub struct DeploymentOrchestrator {
    registry: Arc<RegionRegistry>,
    deployer: Arc<dyn ArtifactDeployer>,
    timeout: Duration,
}

impl DeploymentOrchestrator {
    /// Create an orchestrator with a per-region timeout.
    pub fn new(registry: Arc<RegionRegistry>, deployer: Arc<dyn ArtifactDeployer>, timeout: Duration) -> Self {
        Self {
            registry,
            deployer,
            timeout,
        }
    }

    /// Deploy `spec` to every region in `region_ids`.
    pub async fn deploy(&self, region_ids: &[String], spec: &ArtifactSpec) -> Result<DeploymentJob> {
        self.deploy_with_cancel(region_ids, spec, &CancellationToken::new())
            .await
    }

    /// Like [`DeploymentOrchestrator::deploy`]; regions still in flight when
    /// `cancel` fires are reported as cancelled.
    pub async fn deploy_with_cancel(
        &self,
        region_ids: &[String],
        spec: &ArtifactSpec,
        cancel: &CancellationToken,
    ) -> Result<DeploymentJob> {
        spec.validate()?;
        let started_at = now();
        let artifact = Arc::new(spec.clone());

        info!(
            artifact = %spec.name,
            version = %spec.version,
            regions = region_ids.len(),
            "starting deployment"
        );

        let outcomes = run_parallel("deploy", region_ids.to_vec(), self.timeout, cancel, |region_id| {
            let known = self.registry.contains(&region_id);
            let deployer = self.deployer.clone();
            let artifact = artifact.clone();
            async move {
                if !known {
                    return Err(Error::RegionNotFound(region_id));
                }
                deployer.deploy_artifact(&region_id, &artifact).await
            }
        })
        .await;

        for outcome in outcomes.iter().filter(|o| o.success) {
            if let Err(e) = self.registry.record_deployment(&outcome.region_id, &spec.version) {
                warn!(region = %outcome.region_id, error = %e, "could not record deployed version");
            }
        }

        let status = JobStatus::from_outcomes(&outcomes);
        if let JobStatus::PartialFailure { failed } = &status {
            warn!(artifact = %spec.name, failed = ?failed, "deployment partially failed");
        } else {
            info!(artifact = %spec.name, version = %spec.version, "deployment complete");
        }

        Ok(DeploymentJob {
            id: uuid::Uuid::new_v4().to_string(),
            artifact: spec.clone(),
            targets: outcomes.iter().map(|o| o.region_id.clone()).collect(),
            started_at,
            finished_at: now(),
            outcomes,
            status,
        })
    }
}
