//! Regional routing and failover controller.
//!
//! Owns every component and exposes the administrative and request-path
//! API. Background work (health probing, latency refresh, failover signal
//! handling) runs as tasks that stop on [`RegionalController::shutdown`].

use crate::config::ControllerConfig;
use crate::core::{Error, Result};
use crate::deploy::{ArtifactDeployer, ArtifactSpec, DeploymentJob, DeploymentOrchestrator};
use crate::monitoring::{Alert, AlertManager};
use crate::region::{
    CycleReport, FailoverEvent, FailoverManager, FailoverState, HealthMonitor, HealthProbe,
    PrimaryUnhealthy, Region, RegionRegistry, SnapshotStore, StateSynchronizer, SyncJob,
};
use crate::routing::{ClientLocation, RoutingDecision, RoutingEngine, RoutingStrategy, TrafficDistributor, TrafficSnapshot};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const SIGNAL_BUFFER: usize = 16;

/// Top-level controller.
pub struct RegionalController {
    config: ControllerConfig,
    registry: Arc<RegionRegistry>,
    traffic: Arc<TrafficDistributor>,
    alerts: Arc<AlertManager>,
    routing: RoutingEngine,
    failover: Arc<FailoverManager>,
    monitor: Arc<HealthMonitor>,
    deployments: DeploymentOrchestrator,
    sync: StateSynchronizer,
    signals: Mutex<Option<mpsc::Receiver<PrimaryUnhealthy>>>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RegionalController {
    /// Build a controller from validated configuration and the host's
    /// capabilities. Seeded regions are registered in catalogue order.
    pub fn new(
        config: ControllerConfig,
        probe: Arc<dyn HealthProbe>,
        deployer: Arc<dyn ArtifactDeployer>,
        store: Arc<dyn SnapshotStore>,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(RegionRegistry::new());
        let traffic = Arc::new(TrafficDistributor::new(config.weight_pool));
        for seed in &config.regions {
            registry.register(seed.to_region(&config.services))?;
            traffic.track(&seed.id);
        }
        if let Some(primary) = registry.primary_id() {
            traffic.assign_pool(&primary);
        }

        let alerts = Arc::new(AlertManager::new(config.alert_buffer));
        let routing = RoutingEngine::new(registry.clone(), traffic.clone(), config.default_strategy);
        let failover = Arc::new(
            FailoverManager::new(registry.clone(), traffic.clone(), alerts.clone())
                .with_priority(config.failover_priority.clone()),
        );

        let (tx, rx) = mpsc::channel(SIGNAL_BUFFER);
        let monitor = Arc::new(HealthMonitor::new(
            registry.clone(),
            probe,
            alerts.clone(),
            tx,
            config.probe_timeout(),
        ));
        let deployments = DeploymentOrchestrator::new(registry.clone(), deployer, config.deploy_timeout());
        let sync = StateSynchronizer::new(registry.clone(), store, config.sync_timeout())
            .with_mode(config.sync_mode)
            .with_compression(config.compress_snapshots);

        info!(
            regions = registry.region_count(),
            primary = ?registry.primary_id(),
            strategy = %config.default_strategy,
            "regional controller initialized"
        );

        Ok(Self {
            config,
            registry,
            traffic,
            alerts,
            routing,
            failover,
            monitor,
            deployments,
            sync,
            signals: Mutex::new(Some(rx)),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the health loop, latency loop and failover signal consumer.
    /// Must be called from within a Tokio runtime, at most once.
    pub fn start(&self) -> Result<()> {
        let signals = self
            .signals
            .lock()
            .take()
            .ok_or_else(|| Error::Internal("controller already started".to_string()))?;

        let mut tasks = self.tasks.lock();

        let monitor = self.monitor.clone();
        let interval = self.config.health_check_interval();
        let token = self.shutdown.clone();
        tasks.push(tokio::spawn(async move {
            monitor.run_health_loop(interval, token).await;
        }));

        let monitor = self.monitor.clone();
        let interval = self.config.latency_refresh_interval();
        let token = self.shutdown.clone();
        tasks.push(tokio::spawn(async move {
            monitor.run_latency_loop(interval, token).await;
        }));

        let failover = self.failover.clone();
        let token = self.shutdown.clone();
        tasks.push(tokio::spawn(async move {
            failover.run(signals, token).await;
        }));

        info!(tasks = tasks.len(), "background tasks started");
        Ok(())
    }

    /// Stop background tasks and wait for them to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!("background task ended abnormally: {}", e);
            }
        }
        info!("regional controller stopped");
    }

    // Administrative API

    /// Register a region at runtime. The configured service list is merged
    /// into the region's own; a region with no services to probe is rejected.
    pub fn register_region(&self, region: Region) -> Result<()> {
        let region = region.with_services(&self.config.services);
        if region.services.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "region {} has no services to health-check",
                region.id
            )));
        }

        let id = region.id.clone();
        let primary = region.is_primary;
        self.registry.register(region)?;
        self.traffic.track(&id);
        if primary {
            self.traffic.assign_pool(&id);
        }
        info!(region = %id, primary, "region registered");
        Ok(())
    }

    /// Put a region back into rotation.
    pub fn activate_region(&self, region_id: &str) -> Result<()> {
        self.registry.set_active(region_id, true)?;
        info!(region = %region_id, "region activated");
        Ok(())
    }

    /// Take a region out of rotation. The primary must be failed over first.
    pub fn deactivate_region(&self, region_id: &str) -> Result<()> {
        self.registry.set_active(region_id, false)?;
        info!(region = %region_id, "region deactivated");
        Ok(())
    }

    /// Designate the first primary when the catalogue had none.
    pub async fn bootstrap_primary(&self, region_id: &str) -> Result<()> {
        self.failover.bootstrap(region_id).await
    }

    /// Operator failover to `target`; rejected if the target is not healthy.
    pub async fn force_failover(&self, target: &str, note: &str) -> Result<FailoverEvent> {
        self.failover.failover_to(target, note).await
    }

    /// Change the default routing strategy.
    pub fn set_routing_strategy(&self, strategy: RoutingStrategy) {
        self.routing.set_default_strategy(strategy);
    }

    /// Hand the whole weight pool back to the current primary and zero all
    /// request counters.
    pub fn reset_traffic(&self) -> Result<()> {
        let primary = self.registry.primary_id().ok_or(Error::NoPrimaryConfigured)?;
        self.traffic.reset(&primary);
        Ok(())
    }

    // Request path

    /// Route with the default strategy.
    pub fn route(&self, client: &ClientLocation) -> Result<RoutingDecision> {
        self.routing.route(client)
    }

    /// Route with an explicit strategy and optional override region.
    pub fn select_region(
        &self,
        client: &ClientLocation,
        strategy: RoutingStrategy,
        override_region: Option<&str>,
    ) -> Result<RoutingDecision> {
        self.routing.select_region(client, strategy, override_region)
    }

    // On-demand jobs

    /// Deploy an artifact to the given regions.
    pub async fn deploy(&self, region_ids: &[String], spec: &ArtifactSpec) -> Result<DeploymentJob> {
        self.deployments.deploy(region_ids, spec).await
    }

    /// Deploy, reporting regions still in flight as cancelled when `cancel` fires.
    pub async fn deploy_with_cancel(
        &self,
        region_ids: &[String],
        spec: &ArtifactSpec,
        cancel: &CancellationToken,
    ) -> Result<DeploymentJob> {
        self.deployments.deploy_with_cancel(region_ids, spec, cancel).await
    }

    /// Replicate a dataset from the primary to every other active region.
    pub async fn sync(&self, data_type: &str) -> Result<SyncJob> {
        self.sync.sync(data_type).await
    }

    /// Sync, aborting remaining pushes when `cancel` fires.
    pub async fn sync_with_cancel(&self, data_type: &str, cancel: &CancellationToken) -> Result<SyncJob> {
        self.sync.sync_with_cancel(data_type, cancel).await
    }

    /// Run one health cycle outside the schedule.
    pub async fn run_health_cycle(&self) -> CycleReport {
        self.monitor.run_cycle().await
    }

    // Observability (read-only)

    /// All regions in priority order.
    pub fn regions(&self) -> Vec<Region> {
        self.registry.list_regions()
    }

    /// Current primary region.
    pub fn primary(&self) -> Result<Region> {
        self.registry.get_primary()
    }

    /// Copy of weights and request counters.
    pub fn traffic_snapshot(&self) -> TrafficSnapshot {
        self.traffic.snapshot()
    }

    /// Failover events, oldest first.
    pub fn failover_history(&self) -> Vec<FailoverEvent> {
        self.failover.history()
    }

    /// Current failover state.
    pub fn failover_state(&self) -> FailoverState {
        self.failover.state()
    }

    /// Alerts currently firing.
    pub fn firing_alerts(&self) -> Vec<Alert> {
        self.alerts.firing_alerts()
    }

    /// Alert manager, for history and severity queries.
    pub fn alerts(&self) -> &Arc<AlertManager> {
        &self.alerts
    }

    /// Configuration the controller was built from.
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegionSeed;
    use crate::core::GeoPoint;
    use crate::monitoring::alerts::FAILOVER_DEGRADED;
    use crate::region::FailoverReason;
    use crate::testutils::{FakeDeployer, FakeProbe, FakeStore};
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn seed(id: &str, latitude: f64, longitude: f64, primary: bool) -> RegionSeed {
        RegionSeed {
            id: id.to_string(),
            name: format!("Region {id}"),
            latitude,
            longitude,
            primary,
            services: Vec::new(),
            latency_ms: BTreeMap::new(),
        }
    }

    fn config() -> ControllerConfig {
        ControllerConfig {
            health_check_interval_secs: 3600,
            latency_refresh_interval_secs: 3600,
            probe_timeout_ms: 200,
            deploy_timeout_ms: 500,
            sync_timeout_ms: 500,
            regions: vec![
                seed("a", 40.7, -74.0, true),
                seed("b", 41.9, -87.6, false),
                seed("c", 37.8, -122.4, false),
            ],
            ..Default::default()
        }
    }

    fn controller_with(config: ControllerConfig) -> (RegionalController, Arc<FakeProbe>, Arc<FakeStore>) {
        let probe = Arc::new(FakeProbe::default());
        let store = Arc::new(FakeStore::default());
        let controller = RegionalController::new(
            config,
            probe.clone(),
            Arc::new(FakeDeployer::default()),
            store.clone(),
        )
        .unwrap();
        (controller, probe, store)
    }

    async fn wait_for_primary(controller: &RegionalController, id: &str) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while controller.primary().map(|r| r.id).ok().as_deref() != Some(id) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("primary did not change in time");
    }

    #[test]
    fn test_seeded_from_config() {
        let (controller, _probe, _store) = controller_with(config());
        assert_eq!(controller.regions().len(), 3);
        assert_eq!(controller.primary().unwrap().id, "a");

        let snapshot = controller.traffic_snapshot();
        assert_eq!(snapshot.weight("a"), Some(100));
        assert_eq!(snapshot.weight("b"), Some(0));
        assert_eq!(snapshot.total_weight(), 100);

        // Geographic seeding: Chicago is closer to New York than San Francisco.
        let a = &controller.regions()[0];
        assert!(a.latency_to("b").unwrap() < a.latency_to("c").unwrap());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = config();
        config.weight_pool = 0;
        let result = RegionalController::new(
            config,
            Arc::new(FakeProbe::default()),
            Arc::new(FakeDeployer::default()),
            Arc::new(FakeStore::default()),
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_geographic_failover_scenario() {
        let (controller, probe, _store) = controller_with(config());
        probe.set_unhealthy("c", "api");
        controller.run_health_cycle().await;
        controller.start().unwrap();

        let near_a = ClientLocation::Coordinates(GeoPoint::new(40.6, -73.9));
        let decision = controller
            .select_region(&near_a, RoutingStrategy::Geographic, None)
            .unwrap();
        assert_eq!(decision.region_id, "a");

        probe.set_unhealthy("a", "database");
        let report = controller.run_health_cycle().await;
        assert_eq!(report.primary_unhealthy.as_deref(), Some("a"));
        wait_for_primary(&controller, "b").await;

        let decision = controller
            .select_region(&near_a, RoutingStrategy::Geographic, None)
            .unwrap();
        assert_eq!(decision.region_id, "b");

        let history = controller.failover_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from_region, "a");
        assert_eq!(history[0].to_region, "b");
        assert!(history[0].automatic);
        assert_eq!(history[0].reason, FailoverReason::PrimaryUnhealthy);

        let snapshot = controller.traffic_snapshot();
        assert_eq!(snapshot.weight("a"), Some(0));
        assert_eq!(snapshot.weight("b"), Some(100));

        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_degraded_when_no_candidate() {
        let (controller, probe, _store) = controller_with(config());
        controller.start().unwrap();
        for id in ["a", "b", "c"] {
            probe.set_unhealthy(id, "api");
        }
        controller.run_health_cycle().await;

        tokio::time::timeout(Duration::from_secs(2), async {
            while !matches!(controller.failover_state(), FailoverState::Evaluating { .. }) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(controller.primary().unwrap().id, "a");
        assert!(controller.alerts().is_firing(FAILOVER_DEGRADED, Some("a")));
        assert!(controller.failover_history().is_empty());

        probe.set_healthy("a", "api");
        controller.run_health_cycle().await;
        tokio::time::timeout(Duration::from_secs(2), async {
            while controller.failover_state() != FailoverState::Stable {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(!controller.alerts().is_firing(FAILOVER_DEGRADED, Some("a")));
        assert!(controller.failover_history().is_empty());
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (controller, _probe, _store) = controller_with(config());
        assert_ok!(controller.start());
        assert_err!(controller.start());
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_admin_register_and_bootstrap() {
        let (controller, _probe, _store) = controller_with(ControllerConfig {
            regions: Vec::new(),
            ..config()
        });
        controller
            .register_region(Region::new("eu", "Frankfurt", GeoPoint::new(50.1, 8.7)))
            .unwrap();
        controller
            .register_region(Region::new("us", "Virginia", GeoPoint::new(38.9, -77.0)))
            .unwrap();
        assert!(matches!(controller.primary(), Err(Error::NoPrimaryConfigured)));
        assert!(matches!(controller.reset_traffic(), Err(Error::NoPrimaryConfigured)));

        let client = ClientLocation::Region("eu".to_string());
        for _ in 0..3 {
            assert_eq!(controller.route(&client).unwrap().region_id, "eu");
        }

        controller.bootstrap_primary("eu").await.unwrap();
        assert_eq!(controller.primary().unwrap().id, "eu");
        let snapshot = controller.traffic_snapshot();
        assert_eq!(snapshot.weight("eu"), Some(100));
        assert_eq!(snapshot.weight("us"), Some(0));
        assert_eq!(snapshot.requests("eu"), Some(3));

        let err = controller.bootstrap_primary("us").await.unwrap_err();
        assert!(matches!(err, Error::PrimaryAlreadyConfigured(_)));
    }

    #[tokio::test]
    async fn test_runtime_region_is_probed() {
        let (controller, probe, _store) = controller_with(config());
        controller
            .register_region(Region::new("d", "Region D", GeoPoint::new(50.1, 8.7)))
            .unwrap();
        let d = controller.regions().into_iter().find(|r| r.id == "d").unwrap();
        assert!(d.services.contains_key("api"));
        assert!(d.services.contains_key("database"));

        probe.fail_region("d");
        for id in ["a", "b", "c"] {
            probe.set_unhealthy(id, "api");
        }
        let report = controller.run_health_cycle().await;
        assert_eq!(report.regions.get("d"), Some(&false));

        let client = ClientLocation::Region("d".to_string());
        let err = controller
            .select_region(&client, RoutingStrategy::HealthBased, None)
            .unwrap_err();
        assert!(matches!(err, Error::NoAvailableRegion));
    }

    #[test]
    fn test_region_without_services_rejected() {
        let (controller, _probe, _store) = controller_with(ControllerConfig {
            services: Vec::new(),
            regions: Vec::new(),
            ..config()
        });
        let err = controller
            .register_region(Region::new("d", "Region D", GeoPoint::new(50.1, 8.7)))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert!(controller.regions().is_empty());

        controller
            .register_region(Region::new("e", "Region E", GeoPoint::new(48.8, 2.3)).with_services(&["api"]))
            .unwrap();
        assert_eq!(controller.regions().len(), 1);
    }

    #[tokio::test]
    async fn test_manual_failover_and_deactivation() {
        let (controller, probe, _store) = controller_with(config());
        assert!(matches!(
            controller.deactivate_region("a"),
            Err(Error::PrimaryDeactivation(_))
        ));

        probe.set_unhealthy("c", "api");
        controller.run_health_cycle().await;
        let err = controller.force_failover("c", "maintenance").await.unwrap_err();
        assert!(matches!(err, Error::TargetRegionUnhealthy(_)));

        let event = controller.force_failover("b", "maintenance").await.unwrap();
        assert!(!event.automatic);
        assert_eq!(controller.primary().unwrap().id, "b");

        assert_ok!(controller.deactivate_region("a"));
        assert!(!controller.regions()[0].active);
        assert_ok!(controller.activate_region("a"));
        assert!(controller.regions()[0].active);
    }

    #[tokio::test]
    async fn test_strategy_change_and_traffic_reset() {
        let (controller, _probe, _store) = controller_with(config());
        controller.set_routing_strategy(RoutingStrategy::RoundRobin);
        let client = ClientLocation::Region("a".to_string());
        let picks: Vec<_> = (0..3)
            .map(|_| controller.route(&client).unwrap().region_id)
            .collect();
        assert_eq!(picks, vec!["a", "b", "c"]);

        controller.reset_traffic().unwrap();
        let snapshot = controller.traffic_snapshot();
        assert_eq!(snapshot.requests("a"), Some(0));
        assert_eq!(snapshot.weight("a"), Some(100));
    }

    #[tokio::test]
    async fn test_deploy_and_sync_through_controller() {
        let (controller, _probe, store) = controller_with(ControllerConfig {
            compress_snapshots: true,
            ..config()
        });
        let targets = vec!["a".to_string(), "b".to_string()];
        let job = controller
            .deploy(&targets, &ArtifactSpec::new("api", "3.1.0"))
            .await
            .unwrap();
        assert!(job.status.is_success());
        assert_eq!(
            controller.regions()[1].deployed_version.as_deref(),
            Some("3.1.0")
        );

        store.put("a", "sessions", b"session-data");
        let job = controller.sync("sessions").await.unwrap();
        assert!(job.status.is_success());
        assert_eq!(store.pushed_regions(), vec!["b", "c"]);
    }
}
