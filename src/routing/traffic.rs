//! Traffic accounting and weights.
//!
//! Request counters and weights live behind one lock, so a failover
//! redistribution can never interleave with a counter update.

use crate::core::{now, Error, Result, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Weight and request count of one region.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficWeight {
    /// Share of the pool
    pub weight: u32,
    /// Requests routed since start or reset
    pub requests: u64,
    pub last_update: Timestamp,
}

impl TrafficWeight {
    fn new(weight: u32) -> Self {
        Self {
            weight,
            requests: 0,
            last_update: now(),
        }
    }
}

/// Point-in-time copy of all weights.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSnapshot {
    pub pool: u32,
    pub regions: BTreeMap<String, TrafficWeight>,
    pub taken_at: Timestamp,
}

impl TrafficSnapshot {
    /// Weight held by a region.
    pub fn weight(&self, region_id: &str) -> Option<u32> {
        self.regions.get(region_id).map(|w| w.weight)
    }

    /// Requests counted for a region.
    pub fn requests(&self, region_id: &str) -> Option<u64> {
        self.regions.get(region_id).map(|w| w.requests)
    }

    /// Sum of all weights; equals the pool after any assignment.
    pub fn total_weight(&self) -> u32 {
        self.regions.values().map(|w| w.weight).sum()
    }
}

/// Per-region request counters and routing weights.
pub struct TrafficDistributor {
    pool: u32,
    regions: Mutex<BTreeMap<String, TrafficWeight>>,
}

impl TrafficDistributor {
    /// Create a distributor sharing `pool` across regions.
    pub fn new(pool: u32) -> Self {
        Self {
            pool,
            regions: Mutex::new(BTreeMap::new()),
        }
    }

    /// Total weight shared by all regions.
    pub fn pool(&self) -> u32 {
        self.pool
    }

    /// Start tracking a region with zero weight.
    pub fn track(&self, region_id: &str) {
        self.regions
            .lock()
            .entry(region_id.to_string())
            .or_insert_with(|| TrafficWeight::new(0));
    }

    /// Zero every counter and hand the whole pool to `primary`.
    pub fn reset(&self, primary: &str) {
        let mut regions = self.regions.lock();
        for weight in regions.values_mut() {
            *weight = TrafficWeight::new(0);
        }
        regions.insert(primary.to_string(), TrafficWeight::new(self.pool));
        info!(primary = %primary, pool = self.pool, "traffic weights reset");
    }

    /// Hand the whole pool to `primary` and zero every other weight.
    /// Request counters are kept.
    pub fn assign_pool(&self, primary: &str) {
        let mut regions = self.regions.lock();
        let stamp = now();
        for (id, weight) in regions.iter_mut() {
            weight.weight = if id == primary { self.pool } else { 0 };
            weight.last_update = stamp;
        }
        regions
            .entry(primary.to_string())
            .or_insert_with(|| TrafficWeight::new(self.pool));
        info!(primary = %primary, pool = self.pool, "traffic pool assigned");
    }

    /// Count one routed request.
    pub fn record_request(&self, region_id: &str) {
        let mut regions = self.regions.lock();
        let entry = regions
            .entry(region_id.to_string())
            .or_insert_with(|| TrafficWeight::new(0));
        entry.requests += 1;
        entry.last_update = now();
    }

    /// Drain `from` and give `to` everything the other regions do not hold,
    /// keeping the total equal to the pool.
    pub fn redistribute_weight(&self, from: &str, to: &str) -> Result<()> {
        if from == to {
            return Err(Error::AlreadyPrimary(to.to_string()));
        }

        let mut regions = self.regions.lock();
        let others: u32 = regions
            .iter()
            .filter(|(id, _)| id.as_str() != from && id.as_str() != to)
            .map(|(_, w)| w.weight)
            .sum();
        let stamp = now();

        let source = regions
            .entry(from.to_string())
            .or_insert_with(|| TrafficWeight::new(0));
        source.weight = 0;
        source.last_update = stamp;

        let target = regions
            .entry(to.to_string())
            .or_insert_with(|| TrafficWeight::new(0));
        target.weight = self.pool.saturating_sub(others);
        target.last_update = stamp;

        info!(from = %from, to = %to, weight = target.weight, "traffic weight redistributed");
        Ok(())
    }

    /// Immutable copy of all weights and counters.
    pub fn snapshot(&self) -> TrafficSnapshot {
        TrafficSnapshot {
            pool: self.pool,
            regions: self.regions.lock().clone(),
            taken_at: now(),
        }
    }
}
