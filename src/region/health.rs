//! Health monitoring for regions.
//!
//! Probes every (region, service) pair on a fixed interval and writes the
//! results into the registry. A region's aggregate health is the AND of its
//! services. After each full cycle an unhealthy primary is reported to the
//! failover controller.

use crate::core::{now, Error, Result, Timestamp};
use crate::monitoring::alerts::{PRIMARY_UNHEALTHY, REGION_UNHEALTHY};
use crate::monitoring::{AlertManager, AlertSeverity};
use crate::region::registry::{RegionRegistry, ServiceHealthState};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of one probe.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub healthy: bool,
    pub response_time_ms: u64,
}

/// Health-check capability supplied by the hosting environment.
///
/// Must be callable concurrently. The monitor applies its own timeout on
/// top of whatever the implementation does.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probe one service in one region.
    async fn probe(&self, region_id: &str, service: &str) -> Result<ProbeOutcome>;

    /// Measure one-way latency between two regions.
    ///
    /// `None` keeps the current estimate.
    async fn measure_latency(&self, _from: &str, _to: &str) -> Result<Option<u32>> {
        Ok(None)
    }
}

/// Raised when the primary fails a full health cycle, and once more when it
/// passes again.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrimaryUnhealthy {
    /// Primary at the time of the cycle
    pub region_id: String,
    pub detected_at: Timestamp,
}

/// Summary of one probe cycle.
#[derive(Clone, Debug, Default)]
pub struct CycleReport {
    /// Aggregate health per probed region
    pub regions: BTreeMap<String, bool>,
    /// Primary was unhealthy after the cycle
    pub primary_unhealthy: Option<String>,
}

/// Periodic health and latency prober.
pub struct HealthMonitor {
    registry: Arc<RegionRegistry>,
    probe: Arc<dyn HealthProbe>,
    alerts: Arc<AlertManager>,
    signals: mpsc::Sender<PrimaryUnhealthy>,
    probe_timeout: Duration,
}

impl HealthMonitor {
    /// Create a monitor that reports unhealthy primaries on `signals`.
    pub fn new(
        registry: Arc<RegionRegistry>,
        probe: Arc<dyn HealthProbe>,
        alerts: Arc<AlertManager>,
        signals: mpsc::Sender<PrimaryUnhealthy>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            probe,
            alerts,
            signals,
            probe_timeout,
        }
    }

    /// Probe one service, folding errors and timeouts into unhealthy state.
    async fn probe_service(&self, region_id: &str, service: &str) -> ServiceHealthState {
        let started = Instant::now();
        let result = tokio::time::timeout(self.probe_timeout, self.probe.probe(region_id, service)).await;
        let elapsed = started.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(outcome)) if outcome.healthy => ServiceHealthState::healthy(outcome.response_time_ms),
            Ok(Ok(outcome)) => {
                ServiceHealthState::unhealthy(outcome.response_time_ms, "probe reported unhealthy")
            }
            Ok(Err(e)) => ServiceHealthState::unhealthy(elapsed, e.to_string()),
            Err(_) => {
                let err = Error::Timeout {
                    operation: format!("probe {region_id}/{service}"),
                    after_ms: self.probe_timeout.as_millis() as u64,
                };
                ServiceHealthState::unhealthy(elapsed, err.to_string())
            }
        }
    }

    /// Probe all of a region's services; resolves only once every probe
    /// has completed or timed out.
    async fn probe_region(
        &self,
        region_id: String,
        services: Vec<String>,
    ) -> (String, BTreeMap<String, ServiceHealthState>) {
        let results = join_all(services.iter().map(|s| self.probe_service(&region_id, s))).await;
        let report = services.into_iter().zip(results).collect();
        (region_id, report)
    }

    /// Run one full probe cycle over every active region.
    pub async fn run_cycle(&self) -> CycleReport {
        let targets: Vec<_> = self
            .registry
            .list_active()
            .into_iter()
            .map(|r| (r.id.clone(), r.is_healthy(), r.services.keys().cloned().collect::<Vec<_>>()))
            .collect();

        let reports = join_all(
            targets
                .iter()
                .map(|(id, _, services)| self.probe_region(id.clone(), services.clone())),
        )
        .await;

        let mut summary = CycleReport::default();
        for ((region_id, report), (_, was_healthy, _)) in reports.into_iter().zip(&targets) {
            let failing: Vec<_> = report
                .iter()
                .filter(|(_, s)| !s.healthy)
                .map(|(name, _)| name.clone())
                .collect();

            let healthy = match self.registry.apply_health_report(&region_id, report) {
                Ok(healthy) => healthy,
                Err(e) => {
                    debug!(region = %region_id, "dropping health report: {}", e);
                    continue;
                }
            };

            if !healthy {
                let message = format!("unhealthy services: {}", failing.join(", "));
                self.alerts
                    .fire(REGION_UNHEALTHY, AlertSeverity::Warning, Some(&region_id), &message);
            } else if !was_healthy {
                info!(region = %region_id, "region recovered");
                self.alerts.resolve(REGION_UNHEALTHY, Some(&region_id));
            }
            summary.regions.insert(region_id, healthy);
        }

        if let Some(primary) = self.registry.primary_id() {
            match self.registry.is_healthy(&primary) {
                Ok(false) => {
                    self.alerts.fire(
                        PRIMARY_UNHEALTHY,
                        AlertSeverity::Critical,
                        Some(&primary),
                        "primary region failed health checks",
                    );
                    self.signal_primary_unhealthy(&primary);
                    summary.primary_unhealthy = Some(primary);
                }
                Ok(true) => {
                    // Re-signal on recovery so a degraded failover controller returns to Stable.
                    if self.alerts.resolve(PRIMARY_UNHEALTHY, Some(&primary)) {
                        self.signal_primary_unhealthy(&primary);
                    }
                }
                Err(e) => warn!("primary lookup failed: {}", e),
            }
        }

        summary
    }

    fn signal_primary_unhealthy(&self, region_id: &str) {
        let signal = PrimaryUnhealthy {
            region_id: region_id.to_string(),
            detected_at: now(),
        };
        // A dropped signal is re-raised by the next cycle.
        if let Err(e) = self.signals.try_send(signal) {
            warn!(region = %region_id, "primary unhealthy signal not delivered: {}", e);
        }
    }

    /// Refresh latency estimates between every ordered pair of active
    /// regions. Returns how many estimates changed.
    pub async fn refresh_latencies(&self) -> usize {
        let ids: Vec<String> = self.registry.list_active().into_iter().map(|r| r.id).collect();
        let pairs: Vec<(&String, &String)> = ids
            .iter()
            .flat_map(|a| ids.iter().filter(move |b| *b != a).map(move |b| (a, b)))
            .collect();

        let measurements = join_all(pairs.iter().map(|(from, to)| async move {
            let result =
                tokio::time::timeout(self.probe_timeout, self.probe.measure_latency(from, to)).await;
            (*from, *to, result)
        }))
        .await;

        let mut updated = 0;
        for (from, to, result) in measurements {
            match result {
                Ok(Ok(Some(ms))) => {
                    if self.registry.set_latency(from, to, ms).is_ok() {
                        updated += 1;
                    }
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => debug!(from = %from, to = %to, "latency probe failed: {}", e),
                Err(_) => debug!(from = %from, to = %to, "latency probe timed out"),
            }
        }
        updated
    }

    /// Probe on `interval` until `shutdown` is cancelled.
    pub async fn run_health_loop(&self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("health monitor shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let report = self.run_cycle().await;
                    debug!(regions = report.regions.len(), "health cycle complete");
                }
            }
        }
    }

    /// Refresh latencies on `interval` until `shutdown` is cancelled.
    pub async fn run_latency_loop(&self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("latency refresher shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let updated = self.refresh_latencies().await;
                    debug!(updated, "latency refresh complete");
                }
            }
        }
    }
}
