//! Routing strategies and decision values.

use crate::core::GeoPoint;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Policy used to pick a region for a unit of work.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingStrategy {
    /// Client's home region, else the healthy region closest to it
    #[default]
    Geographic,
    /// Minimum estimated latency to the client's region
    LeastLatency,
    /// First healthy region in priority order
    HealthBased,
    /// Deterministic rotation over healthy regions
    RoundRobin,
}

impl std::fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutingStrategy::Geographic => write!(f, "geographic"),
            RoutingStrategy::LeastLatency => write!(f, "least-latency"),
            RoutingStrategy::HealthBased => write!(f, "health-based"),
            RoutingStrategy::RoundRobin => write!(f, "round-robin"),
        }
    }
}

impl FromStr for RoutingStrategy {
    type Err = crate::core::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "geographic" => Ok(RoutingStrategy::Geographic),
            "least-latency" => Ok(RoutingStrategy::LeastLatency),
            "health-based" => Ok(RoutingStrategy::HealthBased),
            "round-robin" => Ok(RoutingStrategy::RoundRobin),
            other => Err(crate::core::Error::InvalidConfig(format!(
                "unknown routing strategy {other}"
            ))),
        }
    }
}

/// Where a request comes from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ClientLocation {
    /// Client coordinates; home region is the nearest active region
    Coordinates(GeoPoint),
    /// Opaque hint naming the client's home region
    Region(String),
}

/// Outcome of a routing call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Selected region
    pub region_id: String,
    /// Strategy that produced the decision
    pub strategy: RoutingStrategy,
    /// Estimated latency from the client's home region (ms)
    pub estimated_latency_ms: Option<u32>,
    /// Why this region was picked
    pub reason: String,
}
