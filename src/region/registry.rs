//! Region registry for multi-region deployments.
//!
//! Owns every `Region` and its per-service health. Other components read
//! cloned snapshots and mutate only through the accessor methods here, which
//! serialize writes behind one registry-wide lock.

use crate::core::{now, Error, GeoPoint, Result, Timestamp};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Last observed health of one service in a region.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealthState {
    /// Service answered its probe successfully
    pub healthy: bool,
    /// Last observed response time (ms)
    pub response_time_ms: u64,
    /// When the probe ran
    pub last_checked: Timestamp,
    /// Probe error, if any
    pub error: Option<String>,
}

impl ServiceHealthState {
    /// Optimistic default used when a region is registered.
    pub fn optimistic() -> Self {
        Self {
            healthy: true,
            response_time_ms: 0,
            last_checked: now(),
            error: None,
        }
    }

    /// Passing probe result.
    pub fn healthy(response_time_ms: u64) -> Self {
        Self {
            healthy: true,
            response_time_ms,
            last_checked: now(),
            error: None,
        }
    }

    /// Failing probe result with the reason.
    pub fn unhealthy(response_time_ms: u64, error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            response_time_ms,
            last_checked: now(),
            error: Some(error.into()),
        }
    }
}

/// A geographic deployment region.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Region {
    /// Region ID
    pub id: String,
    /// Display name
    pub name: String,
    /// Geographic location
    pub location: GeoPoint,
    /// Per-service health
    pub services: BTreeMap<String, ServiceHealthState>,
    /// Estimated one-way latency to other regions (ms)
    pub latency_ms: BTreeMap<String, u32>,
    /// Administratively enabled
    pub active: bool,
    /// Is primary region
    pub is_primary: bool,
    /// Last completed health check
    pub last_health_check: Option<Timestamp>,
    /// Last artifact version deployed successfully
    pub deployed_version: Option<String>,
}

impl Region {
    /// Create a new active region with no services.
    pub fn new(id: &str, name: &str, location: GeoPoint) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            location,
            services: BTreeMap::new(),
            latency_ms: BTreeMap::new(),
            active: true,
            is_primary: false,
            last_health_check: None,
            deployed_version: None,
        }
    }

    /// Set as primary.
    pub fn as_primary(mut self) -> Self {
        self.is_primary = true;
        self
    }

    /// Register services with the optimistic healthy default.
    pub fn with_services<S: AsRef<str>>(mut self, services: &[S]) -> Self {
        for service in services {
            self.services
                .entry(service.as_ref().to_string())
                .or_insert_with(ServiceHealthState::optimistic);
        }
        self
    }

    /// Pin a latency estimate instead of seeding it from distance.
    pub fn with_latency(mut self, to: &str, ms: u32) -> Self {
        self.latency_ms.insert(to.to_string(), ms);
        self
    }

    /// Aggregate health: every service must be healthy.
    pub fn is_healthy(&self) -> bool {
        self.services.values().all(|s| s.healthy)
    }

    /// Active and healthy.
    pub fn is_available(&self) -> bool {
        self.active && self.is_healthy()
    }

    /// Estimated latency to another region.
    pub fn latency_to(&self, region_id: &str) -> Option<u32> {
        if region_id == self.id {
            return Some(0);
        }
        self.latency_ms.get(region_id).copied()
    }
}

#[derive(Default)]
struct RegistryState {
    regions: HashMap<String, Region>,
    /// Registration order; the stable priority order.
    order: Vec<String>,
    primary_id: Option<String>,
}

impl RegistryState {
    fn region(&self, region_id: &str) -> Result<&Region> {
        self.regions
            .get(region_id)
            .ok_or_else(|| Error::RegionNotFound(region_id.to_string()))
    }

    fn region_mut(&mut self, region_id: &str) -> Result<&mut Region> {
        self.regions
            .get_mut(region_id)
            .ok_or_else(|| Error::RegionNotFound(region_id.to_string()))
    }

    fn ordered(&self) -> impl Iterator<Item = &Region> {
        self.order.iter().filter_map(|id| self.regions.get(id))
    }

    fn swap_primary(&mut self, region_id: &str) -> Option<String> {
        let previous = self.primary_id.take();
        if let Some(old) = previous.as_deref().and_then(|id| self.regions.get_mut(id)) {
            old.is_primary = false;
        }
        if let Some(region) = self.regions.get_mut(region_id) {
            region.is_primary = true;
        }
        self.primary_id = Some(region_id.to_string());
        previous
    }
}

/// Concurrency-safe catalogue of regions.
pub struct RegionRegistry {
    state: RwLock<RegistryState>,
}

impl RegionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Register a region and seed its latency table from great-circle
    /// distance to every known region.
    pub fn register(&self, mut region: Region) -> Result<()> {
        if !region.location.is_valid() {
            return Err(Error::InvalidConfig(format!(
                "region {} has invalid coordinates ({}, {})",
                region.id, region.location.latitude, region.location.longitude
            )));
        }

        let mut state = self.state.write();

        if state.regions.contains_key(&region.id) {
            return Err(Error::RegionAlreadyExists(region.id));
        }
        if region.is_primary {
            if let Some(current) = &state.primary_id {
                return Err(Error::PrimaryAlreadyConfigured(current.clone()));
            }
            if !region.active {
                return Err(Error::TargetRegionUnhealthy(region.id));
            }
        }

        for other in state.regions.values_mut() {
            let estimate = region.location.estimated_latency_ms(&other.location);
            region.latency_ms.entry(other.id.clone()).or_insert(estimate);
            other.latency_ms.entry(region.id.clone()).or_insert(estimate);
        }
        region.latency_ms.insert(region.id.clone(), 0);

        if region.is_primary {
            state.primary_id = Some(region.id.clone());
        }
        state.order.push(region.id.clone());
        state.regions.insert(region.id.clone(), region);
        Ok(())
    }

    /// Get a copy of a region.
    pub fn get_region(&self, region_id: &str) -> Result<Region> {
        self.state.read().region(region_id).cloned()
    }

    /// Check if a region is registered.
    pub fn contains(&self, region_id: &str) -> bool {
        self.state.read().regions.contains_key(region_id)
    }

    /// All regions in priority order.
    pub fn list_regions(&self) -> Vec<Region> {
        self.state.read().ordered().cloned().collect()
    }

    /// Administratively enabled regions in priority order.
    pub fn list_active(&self) -> Vec<Region> {
        self.state
            .read()
            .ordered()
            .filter(|r| r.active)
            .cloned()
            .collect()
    }

    /// Active regions whose services are all healthy, in priority order.
    pub fn list_healthy(&self) -> Vec<Region> {
        self.state
            .read()
            .ordered()
            .filter(|r| r.is_available())
            .cloned()
            .collect()
    }

    /// Region ids in registration order.
    pub fn priority_order(&self) -> Vec<String> {
        self.state.read().order.clone()
    }

    /// Overwrite one service's health.
    pub fn set_service_health(
        &self,
        region_id: &str,
        service: &str,
        health: ServiceHealthState,
    ) -> Result<()> {
        let mut state = self.state.write();
        let region = state.region_mut(region_id)?;
        region.services.insert(service.to_string(), health);
        Ok(())
    }

    /// Apply a full probe cycle for one region in a single write so the
    /// aggregate is never observed half-updated. Returns the new aggregate.
    pub fn apply_health_report(
        &self,
        region_id: &str,
        report: BTreeMap<String, ServiceHealthState>,
    ) -> Result<bool> {
        let mut state = self.state.write();
        let region = state.region_mut(region_id)?;
        region.services.extend(report);
        region.last_health_check = Some(now());
        Ok(region.is_healthy())
    }

    /// Aggregate health of a region.
    pub fn is_healthy(&self, region_id: &str) -> Result<bool> {
        Ok(self.state.read().region(region_id)?.is_healthy())
    }

    /// Make `region_id` the primary, clearing the previous primary in the
    /// same critical section. Returns the previous primary.
    pub fn set_primary(&self, region_id: &str) -> Result<Option<String>> {
        let mut state = self.state.write();
        let region = state.region(region_id)?;
        if !region.active {
            return Err(Error::TargetRegionUnhealthy(region_id.to_string()));
        }
        Ok(state.swap_primary(region_id))
    }

    /// Move primacy from `from` to `to` only if `from` is still primary.
    ///
    /// Returns `Ok(false)` when `from` is no longer primary (stale request).
    /// `to` must be active and healthy at the moment of the swap.
    pub fn transfer_primary(&self, from: &str, to: &str) -> Result<bool> {
        let mut state = self.state.write();
        if state.primary_id.as_deref() != Some(from) {
            return Ok(false);
        }
        if from == to {
            return Err(Error::AlreadyPrimary(to.to_string()));
        }
        if !state.region(to)?.is_available() {
            return Err(Error::TargetRegionUnhealthy(to.to_string()));
        }
        state.swap_primary(to);
        Ok(true)
    }

    /// Get the primary region.
    pub fn get_primary(&self) -> Result<Region> {
        let state = self.state.read();
        let id = state.primary_id.as_deref().ok_or(Error::NoPrimaryConfigured)?;
        state.region(id).cloned()
    }

    /// Primary region id.
    pub fn primary_id(&self) -> Option<String> {
        self.state.read().primary_id.clone()
    }

    /// Number of active regions flagged primary.
    pub fn primary_count(&self) -> usize {
        self.state
            .read()
            .regions
            .values()
            .filter(|r| r.active && r.is_primary)
            .count()
    }

    /// Enable or disable a region. The primary cannot be disabled.
    pub fn set_active(&self, region_id: &str, active: bool) -> Result<()> {
        let mut state = self.state.write();
        if !active && state.primary_id.as_deref() == Some(region_id) {
            return Err(Error::PrimaryDeactivation(region_id.to_string()));
        }
        state.region_mut(region_id)?.active = active;
        Ok(())
    }

    /// Overwrite the latency estimate from one region to another.
    pub fn set_latency(&self, from: &str, to: &str, ms: u32) -> Result<()> {
        let mut state = self.state.write();
        state.region(to)?;
        state.region_mut(from)?.latency_ms.insert(to.to_string(), ms);
        Ok(())
    }

    /// Latency estimate between two regions.
    pub fn latency_between(&self, from: &str, to: &str) -> Option<u32> {
        self.state.read().regions.get(from)?.latency_to(to)
    }

    /// Nearest active region to a point by great-circle distance.
    pub fn nearest_active(&self, point: &GeoPoint) -> Option<String> {
        let state = self.state.read();
        state
            .ordered()
            .filter(|r| r.active)
            .map(|r| (r.location.distance_km(point), r))
            .min_by(|(a, ra), (b, rb)| a.total_cmp(b).then_with(|| ra.id.cmp(&rb.id)))
            .map(|(_, r)| r.id.clone())
    }

    /// Record a successful artifact rollout.
    pub fn record_deployment(&self, region_id: &str, version: &str) -> Result<()> {
        let mut state = self.state.write();
        state.region_mut(region_id)?.deployed_version = Some(version.to_string());
        Ok(())
    }

    /// Get region count.
    pub fn region_count(&self) -> usize {
        self.state.read().regions.len()
    }
}

impl Default for RegionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
