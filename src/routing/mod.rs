//! Routing Module
//!
//! Provides request routing across regions:
//! - Routing strategies and decisions
//! - Routing engine
//! - Traffic weights and request accounting

pub mod engine;
pub mod strategy;
pub mod traffic;

pub use engine::RoutingEngine;
pub use strategy::{ClientLocation, RoutingDecision, RoutingStrategy};
pub use traffic::{TrafficDistributor, TrafficSnapshot, TrafficWeight};
