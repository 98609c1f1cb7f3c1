//! In-memory capability fakes shared by the unit tests.

use crate::core::{Error, GeoPoint, Result};
use crate::deploy::{ArtifactDeployer, ArtifactSpec};
use crate::region::{HealthProbe, ProbeOutcome, Region, RegionRegistry, Snapshot, SnapshotStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

const FOREVER: Duration = Duration::from_secs(3600);

/// Registry with `a` (primary), `b`, `c`, each running `api` and `database`.
/// Latency from `a`: b = 10ms, c = 20ms.
pub fn abc_registry() -> Arc<RegionRegistry> {
    let registry = Arc::new(RegionRegistry::new());
    let services = ["api", "database"];
    registry
        .register(
            Region::new("a", "Region A", GeoPoint::new(40.0, -74.0))
                .with_services(&services)
                .as_primary(),
        )
        .unwrap();
    registry
        .register(
            Region::new("b", "Region B", GeoPoint::new(41.0, -87.0))
                .with_services(&services)
                .with_latency("a", 10),
        )
        .unwrap();
    registry
        .register(
            Region::new("c", "Region C", GeoPoint::new(37.0, -122.0))
                .with_services(&services)
                .with_latency("a", 20)
                .with_latency("b", 15),
        )
        .unwrap();
    registry.set_latency("a", "b", 10).unwrap();
    registry.set_latency("a", "c", 20).unwrap();
    registry.set_latency("b", "c", 15).unwrap();
    registry
}

#[derive(Default)]
pub struct FakeProbe {
    unhealthy: Mutex<HashSet<(String, String)>>,
    failing: Mutex<HashSet<String>>,
    hanging: Mutex<HashSet<String>>,
    latencies: Mutex<HashMap<(String, String), u32>>,
    pub calls: AtomicUsize,
}

impl FakeProbe {
    pub fn set_unhealthy(&self, region: &str, service: &str) {
        self.unhealthy
            .lock()
            .insert((region.to_string(), service.to_string()));
    }

    pub fn set_healthy(&self, region: &str, service: &str) {
        self.unhealthy
            .lock()
            .remove(&(region.to_string(), service.to_string()));
    }

    pub fn fail_region(&self, region: &str) {
        self.failing.lock().insert(region.to_string());
    }

    pub fn hang_region(&self, region: &str) {
        self.hanging.lock().insert(region.to_string());
    }

    pub fn set_latency(&self, from: &str, to: &str, ms: u32) {
        self.latencies
            .lock()
            .insert((from.to_string(), to.to_string()), ms);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for FakeProbe {
    async fn probe(&self, region_id: &str, service: &str) -> Result<ProbeOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hanging.lock().contains(region_id) {
            tokio::time::sleep(FOREVER).await;
        }
        if self.failing.lock().contains(region_id) {
            return Err(Error::operation_failed(region_id, "connection refused"));
        }
        let healthy = !self
            .unhealthy
            .lock()
            .contains(&(region_id.to_string(), service.to_string()));
        Ok(ProbeOutcome {
            healthy,
            response_time_ms: 5,
        })
    }

    async fn measure_latency(&self, from: &str, to: &str) -> Result<Option<u32>> {
        Ok(self
            .latencies
            .lock()
            .get(&(from.to_string(), to.to_string()))
            .copied())
    }
}

#[derive(Default)]
pub struct FakeDeployer {
    failing: Mutex<HashSet<String>>,
    hanging: Mutex<HashSet<String>>,
    pub deployed: Mutex<Vec<(String, String)>>,
}

impl FakeDeployer {
    pub fn fail_region(&self, region: &str) {
        self.failing.lock().insert(region.to_string());
    }

    pub fn hang_region(&self, region: &str) {
        self.hanging.lock().insert(region.to_string());
    }
}

#[async_trait]
impl ArtifactDeployer for FakeDeployer {
    async fn deploy_artifact(&self, region_id: &str, spec: &ArtifactSpec) -> Result<()> {
        if self.hanging.lock().contains(region_id) {
            tokio::time::sleep(FOREVER).await;
        }
        if self.failing.lock().contains(region_id) {
            return Err(Error::operation_failed(region_id, "image pull failed"));
        }
        self.deployed
            .lock()
            .push((region_id.to_string(), spec.version.clone()));
        Ok(())
    }
}

/// Blocks every push until released, after announcing it started.
pub struct PushGate {
    pub started: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[derive(Default)]
pub struct FakeStore {
    data: Mutex<HashMap<(String, String), Vec<u8>>>,
    failing_push: Mutex<HashSet<String>>,
    pub fetches: AtomicUsize,
    pub pushed: Mutex<Vec<(String, Snapshot)>>,
    pub gate: Option<PushGate>,
}

impl FakeStore {
    pub fn with_data(region: &str, data_type: &str, payload: &[u8]) -> Self {
        let store = Self::default();
        store.put(region, data_type, payload);
        store
    }

    /// Store whose pushes block on `gate`.
    pub fn gated(gate: PushGate) -> Self {
        Self {
            gate: Some(gate),
            ..Default::default()
        }
    }

    pub fn put(&self, region: &str, data_type: &str, payload: &[u8]) {
        self.data
            .lock()
            .insert((region.to_string(), data_type.to_string()), payload.to_vec());
    }

    pub fn fail_push(&self, region: &str) {
        self.failing_push.lock().insert(region.to_string());
    }

    pub fn pushed_regions(&self) -> Vec<String> {
        let mut regions: Vec<_> = self.pushed.lock().iter().map(|(r, _)| r.clone()).collect();
        regions.sort();
        regions
    }
}

#[async_trait]
impl SnapshotStore for FakeStore {
    async fn fetch_snapshot(&self, region_id: &str, data_type: &str) -> Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.data
            .lock()
            .get(&(region_id.to_string(), data_type.to_string()))
            .cloned()
            .ok_or_else(|| Error::operation_failed(region_id, format!("no {data_type} data")))
    }

    async fn push_snapshot(&self, region_id: &str, snapshot: &Snapshot) -> Result<()> {
        if let Some(gate) = &self.gate {
            gate.started.notify_one();
            gate.release.notified().await;
        }
        if self.failing_push.lock().contains(region_id) {
            return Err(Error::operation_failed(region_id, "disk full"));
        }
        self.pushed
            .lock()
            .push((region_id.to_string(), snapshot.clone()));
        Ok(())
    }
}
