//! Region selection for incoming work.
//!
//! Pure in-memory decisions over a registry snapshot; never blocks on I/O.

use crate::core::{Error, Result};
use crate::region::{Region, RegionRegistry};
use crate::routing::strategy::{ClientLocation, RoutingDecision, RoutingStrategy};
use crate::routing::traffic::TrafficDistributor;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Picks the best region for a request under a strategy.
pub struct RoutingEngine {
    registry: Arc<RegionRegistry>,
    traffic: Arc<TrafficDistributor>,
    default_strategy: RwLock<RoutingStrategy>,
    cursor: AtomicUsize,
}

impl RoutingEngine {
    /// Create an engine over a registry and traffic distributor.
    pub fn new(
        registry: Arc<RegionRegistry>,
        traffic: Arc<TrafficDistributor>,
        default_strategy: RoutingStrategy,
    ) -> Self {
        Self {
            registry,
            traffic,
            default_strategy: RwLock::new(default_strategy),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Strategy used by [`RoutingEngine::route`].
    pub fn default_strategy(&self) -> RoutingStrategy {
        *self.default_strategy.read()
    }

    /// Change the strategy used by [`RoutingEngine::route`].
    pub fn set_default_strategy(&self, strategy: RoutingStrategy) {
        let previous = std::mem::replace(&mut *self.default_strategy.write(), strategy);
        info!(from = %previous, to = %strategy, "default routing strategy changed");
    }

    /// Route with the default strategy.
    pub fn route(&self, client: &ClientLocation) -> Result<RoutingDecision> {
        self.select_region(client, self.default_strategy(), None)
    }

    /// Select a region for one unit of work and count the request against it.
    ///
    /// A healthy, active `override_region` short-circuits the strategy.
    pub fn select_region(
        &self,
        client: &ClientLocation,
        strategy: RoutingStrategy,
        override_region: Option<&str>,
    ) -> Result<RoutingDecision> {
        let healthy = self.registry.list_healthy();
        if healthy.is_empty() {
            return Err(Error::NoAvailableRegion);
        }

        let home = self.home_region(client);
        let decision = match override_region.and_then(|id| healthy.iter().find(|r| r.id == id)) {
            Some(region) => RoutingDecision {
                region_id: region.id.clone(),
                strategy,
                estimated_latency_ms: latency(home.as_ref(), region),
                reason: "explicit override".to_string(),
            },
            None => {
                if let Some(id) = override_region {
                    debug!(region = %id, "override ignored; region not available");
                }
                self.evaluate(strategy, home.as_ref(), &healthy)?
            }
        };

        self.traffic.record_request(&decision.region_id);
        Ok(decision)
    }

    /// Advance the round-robin cursor, kept reduced modulo `len` so it
    /// never wraps.
    fn next_slot(&self, len: usize) -> usize {
        let previous = self
            .cursor
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| Some((c % len + 1) % len))
            .unwrap_or_else(|c| c);
        previous % len
    }

    fn home_region(&self, client: &ClientLocation) -> Option<Region> {
        let id = match client {
            ClientLocation::Region(id) => id.clone(),
            ClientLocation::Coordinates(point) => self.registry.nearest_active(point)?,
        };
        self.registry.get_region(&id).ok()
    }

    fn evaluate(
        &self,
        strategy: RoutingStrategy,
        home: Option<&Region>,
        healthy: &[Region],
    ) -> Result<RoutingDecision> {
        let (region, reason) = match strategy {
            RoutingStrategy::Geographic => match home.and_then(|h| healthy.iter().find(|r| r.id == h.id)) {
                Some(region) => (region, "home region healthy".to_string()),
                None => {
                    let region = closest(home, healthy)?;
                    let reason = match home {
                        Some(h) => format!("home region {} unavailable; closest healthy region", h.id),
                        None => "home region unknown; closest healthy region".to_string(),
                    };
                    (region, reason)
                }
            },
            RoutingStrategy::LeastLatency => {
                (closest(home, healthy)?, "lowest estimated latency".to_string())
            }
            RoutingStrategy::HealthBased => (
                healthy.first().ok_or(Error::NoAvailableRegion)?,
                "first healthy region in priority order".to_string(),
            ),
            RoutingStrategy::RoundRobin => {
                let slot = self.next_slot(healthy.len());
                (&healthy[slot], format!("round-robin slot {slot}"))
            }
        };

        Ok(RoutingDecision {
            region_id: region.id.clone(),
            strategy,
            estimated_latency_ms: latency(home, region),
            reason,
        })
    }
}

fn latency(home: Option<&Region>, candidate: &Region) -> Option<u32> {
    let home = home?;
    home.latency_to(&candidate.id)
        .or_else(|| candidate.latency_to(&home.id))
}

/// Minimum latency from `home`; ties and unknown latencies fall back to
/// region id order.
fn closest<'a>(home: Option<&Region>, healthy: &'a [Region]) -> Result<&'a Region> {
    healthy
        .iter()
        .min_by(|a, b| {
            let la = latency(home, a).unwrap_or(u32::MAX);
            let lb = latency(home, b).unwrap_or(u32::MAX);
            la.cmp(&lb).then_with(|| a.id.cmp(&b.id))
        })
        .ok_or(Error::NoAvailableRegion)
}
