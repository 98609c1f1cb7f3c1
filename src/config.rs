//! Controller configuration.
//!
//! Loaded from JSON; every field has a default so partial files work.

use crate::core::{Error, GeoPoint, Result};
use crate::region::{Region, SyncMode};
use crate::routing::RoutingStrategy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Colourised output
    pub ansi: bool,
    /// Include the module target in each line
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            ansi: true,
            with_target: true,
        }
    }
}

/// A region from the static catalogue.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegionSeed {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub primary: bool,
    /// Services in addition to the global list
    #[serde(default)]
    pub services: Vec<String>,
    /// Pinned latency estimates (ms) to other regions
    #[serde(default)]
    pub latency_ms: BTreeMap<String, u32>,
}

impl RegionSeed {
    /// Build the region with the global services plus its own.
    pub fn to_region(&self, default_services: &[String]) -> Region {
        let mut region = Region::new(
            &self.id,
            &self.name,
            GeoPoint::new(self.latitude, self.longitude),
        )
        .with_services(default_services)
        .with_services(&self.services);

        for (to, ms) in &self.latency_ms {
            region = region.with_latency(to, *ms);
        }
        if self.primary {
            region = region.as_primary();
        }
        region
    }
}

/// Top-level controller configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Health probe cycle (seconds)
    pub health_check_interval_secs: u64,
    /// Latency refresh cycle (seconds)
    pub latency_refresh_interval_secs: u64,
    /// Timeout for one probe (ms)
    pub probe_timeout_ms: u64,
    /// Timeout for one region's deployment (ms)
    pub deploy_timeout_ms: u64,
    /// Timeout for one snapshot fetch or push (ms)
    pub sync_timeout_ms: u64,
    /// Total traffic weight shared by active regions
    pub weight_pool: u32,
    /// Strategy used when a caller does not name one
    pub default_strategy: RoutingStrategy,
    /// Failover candidate order; empty means registration order
    pub failover_priority: Vec<String>,
    /// Services registered in every region
    pub services: Vec<String>,
    /// Sync fan-out mode
    pub sync_mode: SyncMode,
    /// LZ4-compress snapshots before pushing
    pub compress_snapshots: bool,
    /// Resolved alert history kept in memory
    pub alert_buffer: usize,
    pub logging: LoggingConfig,
    /// Static region catalogue
    pub regions: Vec<RegionSeed>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: 30,
            latency_refresh_interval_secs: 60,
            probe_timeout_ms: 5_000,
            deploy_timeout_ms: 120_000,
            sync_timeout_ms: 60_000,
            weight_pool: 100,
            default_strategy: RoutingStrategy::Geographic,
            failover_priority: Vec::new(),
            services: vec!["api".to_string(), "database".to_string()],
            sync_mode: SyncMode::Parallel,
            compress_snapshots: false,
            alert_buffer: 1000,
            logging: LoggingConfig::default(),
            regions: Vec::new(),
        }
    }
}

impl ControllerConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Reject configurations the controller cannot run with.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("health_check_interval_secs", self.health_check_interval_secs),
            ("latency_refresh_interval_secs", self.latency_refresh_interval_secs),
            ("probe_timeout_ms", self.probe_timeout_ms),
            ("deploy_timeout_ms", self.deploy_timeout_ms),
            ("sync_timeout_ms", self.sync_timeout_ms),
            ("weight_pool", u64::from(self.weight_pool)),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{name} must be positive")));
            }
        }

        let mut ids = HashSet::new();
        for seed in &self.regions {
            if seed.id.is_empty() {
                return Err(Error::InvalidConfig("region id must not be empty".into()));
            }
            if !ids.insert(seed.id.as_str()) {
                return Err(Error::InvalidConfig(format!("duplicate region id {}", seed.id)));
            }
            if !GeoPoint::new(seed.latitude, seed.longitude).is_valid() {
                return Err(Error::InvalidConfig(format!(
                    "region {} has invalid coordinates ({}, {})",
                    seed.id, seed.latitude, seed.longitude
                )));
            }
            if self.services.is_empty() && seed.services.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "region {} has no services to health-check",
                    seed.id
                )));
            }
        }

        let primaries = self.regions.iter().filter(|r| r.primary).count();
        if primaries > 1 {
            return Err(Error::InvalidConfig(format!(
                "{primaries} regions marked primary; at most one allowed"
            )));
        }

        if !self.regions.is_empty() {
            if let Some(unknown) = self
                .failover_priority
                .iter()
                .find(|id| !ids.contains(id.as_str()))
            {
                return Err(Error::InvalidConfig(format!(
                    "failover_priority names unknown region {unknown}"
                )));
            }
        }

        Ok(())
    }

    /// Health probe cycle.
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    /// Latency refresh cycle.
    pub fn latency_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.latency_refresh_interval_secs)
    }

    /// Timeout for one probe.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Timeout for one region's deployment.
    pub fn deploy_timeout(&self) -> Duration {
        Duration::from_millis(self.deploy_timeout_ms)
    }

    /// Timeout for one snapshot fetch or push.
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }
}
