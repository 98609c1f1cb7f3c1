//! Failover management for high availability.
//!
//! Owns the single-primary invariant. Transitions run one at a time and
//! compare the signalled source against the current primary at decision
//! time, so stale or duplicate signals never cause a second failover.

use crate::core::{now, Error, Result, Timestamp};
use crate::monitoring::alerts::{FAILOVER_COMPLETED, FAILOVER_DEGRADED, PRIMARY_UNHEALTHY};
use crate::monitoring::{AlertManager, AlertSeverity};
use crate::region::health::PrimaryUnhealthy;
use crate::region::registry::RegionRegistry;
use crate::routing::TrafficDistributor;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Why a failover happened.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverReason {
    /// Health monitor reported the primary unhealthy
    PrimaryUnhealthy,
    /// Operator request
    Manual(String),
}

impl std::fmt::Display for FailoverReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailoverReason::PrimaryUnhealthy => write!(f, "primary_unhealthy"),
            FailoverReason::Manual(note) => write!(f, "manual: {}", note),
        }
    }
}

/// Failover event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailoverEvent {
    /// Event ID
    pub id: String,
    /// Region that lost primacy
    pub from_region: String,
    /// Region that became primary
    pub to_region: String,
    /// When the transition started
    pub timestamp: Timestamp,
    /// Reason for failover
    pub reason: FailoverReason,
    /// Was automatic
    pub automatic: bool,
    /// Duration of the transition (ms)
    pub duration_ms: u64,
}

/// Controller state over (primary, failover in progress).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailoverState {
    /// Exactly one primary, nothing in flight
    Stable,
    /// Primary unhealthy and no candidate found yet
    Evaluating { from_region: String, since: Timestamp },
    /// Candidate chosen, primacy and traffic moving
    FailingOver { from_region: String, to_region: String },
}

/// What handling a signal did.
#[derive(Clone, Debug, PartialEq)]
pub enum FailoverOutcome {
    /// Primacy moved
    Completed(FailoverEvent),
    /// Signal named a region that is no longer primary
    Stale,
    /// Primary is healthy again
    Recovered,
    /// No healthy candidate; still serving from the old primary
    Degraded,
}

/// Failover manager.
pub struct FailoverManager {
    registry: Arc<RegionRegistry>,
    traffic: Arc<TrafficDistributor>,
    alerts: Arc<AlertManager>,
    /// Candidate order; empty means registry order
    priority: Vec<String>,
    state: RwLock<FailoverState>,
    history: RwLock<Vec<FailoverEvent>>,
    /// Serializes transitions
    transition: Mutex<()>,
}

impl FailoverManager {
    /// Create a new failover manager.
    pub fn new(
        registry: Arc<RegionRegistry>,
        traffic: Arc<TrafficDistributor>,
        alerts: Arc<AlertManager>,
    ) -> Self {
        Self {
            registry,
            traffic,
            alerts,
            priority: Vec::new(),
            state: RwLock::new(FailoverState::Stable),
            history: RwLock::new(Vec::new()),
            transition: Mutex::new(()),
        }
    }

    /// Set the candidate priority order.
    pub fn with_priority(mut self, priority: Vec<String>) -> Self {
        self.priority = priority;
        self
    }

    /// First healthy, active, non-primary region in priority order.
    pub fn select_target(&self, failed_region: &str) -> Option<String> {
        let healthy = self.registry.list_healthy();
        let mut order = self.priority.clone();
        for id in self.registry.priority_order() {
            if !order.contains(&id) {
                order.push(id);
            }
        }

        order
            .into_iter()
            .find(|id| id != failed_region && healthy.iter().any(|r| &r.id == id))
    }

    /// React to a "primary unhealthy" signal.
    pub async fn handle_primary_unhealthy(&self, signal: &PrimaryUnhealthy) -> Result<FailoverOutcome> {
        let _guard = self.transition.lock().await;
        let from = signal.region_id.as_str();

        if self.registry.primary_id().as_deref() != Some(from) {
            info!(region = %from, "ignoring stale primary unhealthy signal");
            return Ok(FailoverOutcome::Stale);
        }

        if self.registry.is_healthy(from)? {
            if self.is_degraded() {
                info!(region = %from, "primary recovered; leaving degraded state");
                self.alerts.resolve(FAILOVER_DEGRADED, Some(from));
            }
            *self.state.write() = FailoverState::Stable;
            return Ok(FailoverOutcome::Recovered);
        }

        {
            let mut state = self.state.write();
            if !matches!(&*state, FailoverState::Evaluating { from_region, .. } if from_region == from) {
                *state = FailoverState::Evaluating {
                    from_region: from.to_string(),
                    since: now(),
                };
            }
        }

        let Some(target) = self.select_target(from) else {
            self.alerts.fire(
                FAILOVER_DEGRADED,
                AlertSeverity::Critical,
                Some(from),
                "primary unhealthy and no healthy failover candidate",
            );
            error!(region = %from, "no healthy failover candidate; staying on current primary");
            return Ok(FailoverOutcome::Degraded);
        };

        match self.transition_to(from, &target, FailoverReason::PrimaryUnhealthy, true) {
            Ok(Some(event)) => Ok(FailoverOutcome::Completed(event)),
            Ok(None) => Ok(FailoverOutcome::Stale),
            Err(e) => {
                // Candidate turned unhealthy between selection and swap.
                warn!(region = %from, target = %target, "failover aborted: {}", e);
                Ok(FailoverOutcome::Degraded)
            }
        }
    }

    /// Operator-requested failover to `target`.
    pub async fn failover_to(&self, target: &str, note: &str) -> Result<FailoverEvent> {
        let _guard = self.transition.lock().await;

        let region = self.registry.get_region(target)?;
        let from = self.registry.primary_id().ok_or(Error::NoPrimaryConfigured)?;
        if from == target {
            return Err(Error::AlreadyPrimary(target.to_string()));
        }
        if !region.is_available() {
            return Err(Error::TargetRegionUnhealthy(target.to_string()));
        }

        self.transition_to(&from, target, FailoverReason::Manual(note.to_string()), false)?
            .ok_or_else(|| Error::Internal("primary changed during manual failover".to_string()))
    }

    /// Designate the first primary when none is configured.
    pub async fn bootstrap(&self, region_id: &str) -> Result<()> {
        let _guard = self.transition.lock().await;

        if let Some(current) = self.registry.primary_id() {
            return Err(Error::PrimaryAlreadyConfigured(current));
        }
        if !self.registry.get_region(region_id)?.is_available() {
            return Err(Error::TargetRegionUnhealthy(region_id.to_string()));
        }
        self.registry.set_primary(region_id)?;
        self.traffic.assign_pool(region_id);
        *self.state.write() = FailoverState::Stable;
        info!(region = %region_id, "primary bootstrapped");
        Ok(())
    }

    /// Move primacy and traffic. Caller holds the transition lock.
    fn transition_to(
        &self,
        from: &str,
        to: &str,
        reason: FailoverReason,
        automatic: bool,
    ) -> Result<Option<FailoverEvent>> {
        let started = Instant::now();
        let timestamp = now();
        let previous = std::mem::replace(
            &mut *self.state.write(),
            FailoverState::FailingOver {
                from_region: from.to_string(),
                to_region: to.to_string(),
            },
        );

        let swapped = match self.registry.transfer_primary(from, to) {
            Ok(swapped) => swapped,
            Err(e) => {
                *self.state.write() = previous;
                return Err(e);
            }
        };
        if !swapped {
            *self.state.write() = FailoverState::Stable;
            return Ok(None);
        }

        self.traffic.redistribute_weight(from, to)?;

        let event = FailoverEvent {
            id: uuid::Uuid::new_v4().to_string(),
            from_region: from.to_string(),
            to_region: to.to_string(),
            timestamp,
            reason,
            automatic,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        self.history.write().push(event.clone());
        *self.state.write() = FailoverState::Stable;

        self.alerts.resolve(FAILOVER_DEGRADED, Some(from));
        self.alerts.resolve(PRIMARY_UNHEALTHY, Some(from));
        self.alerts.notify(
            FAILOVER_COMPLETED,
            AlertSeverity::Warning,
            Some(to),
            &format!("primary moved from {} to {} ({})", from, to, event.reason),
        );
        info!(from = %from, to = %to, automatic, duration_ms = event.duration_ms, "failover complete");

        Ok(Some(event))
    }

    /// Consume signals until the channel closes or `shutdown` fires.
    pub async fn run(&self, mut signals: mpsc::Receiver<PrimaryUnhealthy>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("failover controller shutting down");
                    break;
                }
                signal = signals.recv() => match signal {
                    Some(signal) => {
                        if let Err(e) = self.handle_primary_unhealthy(&signal).await {
                            error!(region = %signal.region_id, "failover handling failed: {}", e);
                        }
                    }
                    None => break,
                }
            }
        }
    }

    /// Current state.
    pub fn state(&self) -> FailoverState {
        self.state.read().clone()
    }

    /// Primary is unhealthy with no candidate.
    pub fn is_degraded(&self) -> bool {
        matches!(*self.state.read(), FailoverState::Evaluating { .. })
    }

    /// Get failover history, oldest first.
    pub fn history(&self) -> Vec<FailoverEvent> {
        self.history.read().clone()
    }

    /// Get recent failovers (last n), newest first.
    pub fn recent_failovers(&self, n: usize) -> Vec<FailoverEvent> {
        self.history.read().iter().rev().take(n).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::ServiceHealthState;
    use crate::testutils::abc_registry;

    fn manager() -> (Arc<FailoverManager>, Arc<RegionRegistry>, Arc<TrafficDistributor>) {
        let registry = abc_registry();
        let traffic = Arc::new(TrafficDistributor::new(100));
        for id in registry.priority_order() {
            traffic.track(&id);
        }
        traffic.reset("a");
        let manager = FailoverManager::new(
            registry.clone(),
            traffic.clone(),
            Arc::new(AlertManager::default()),
        );
        (Arc::new(manager), registry, traffic)
    }

    fn mark_down(registry: &RegionRegistry, id: &str) {
        registry
            .set_service_health(id, "database", ServiceHealthState::unhealthy(0, "down"))
            .unwrap();
    }

    fn mark_up(registry: &RegionRegistry, id: &str) {
        registry
            .set_service_health(id, "database", ServiceHealthState::healthy(3))
            .unwrap();
    }

    fn signal(id: &str) -> PrimaryUnhealthy {
        PrimaryUnhealthy {
            region_id: id.to_string(),
            detected_at: now(),
        }
    }

    #[tokio::test]
    async fn test_failover_moves_primary_and_weight() {
        let (manager, registry, traffic) = manager();
        mark_down(&registry, "a");

        let outcome = manager.handle_primary_unhealthy(&signal("a")).await.unwrap();
        let FailoverOutcome::Completed(event) = outcome else {
            panic!("expected failover, got {outcome:?}");
        };
        assert_eq!(event.from_region, "a");
        assert_eq!(event.to_region, "b");
        assert!(event.automatic);
        assert_eq!(event.reason, FailoverReason::PrimaryUnhealthy);

        assert_eq!(registry.get_primary().unwrap().id, "b");
        assert_eq!(registry.primary_count(), 1);
        let snapshot = traffic.snapshot();
        assert_eq!(snapshot.weight("a"), Some(0));
        assert_eq!(snapshot.weight("b"), Some(100));
        assert_eq!(manager.history().len(), 1);
        assert_eq!(manager.state(), FailoverState::Stable);
    }

    #[tokio::test]
    async fn test_duplicate_signal_is_noop() {
        let (manager, registry, _traffic) = manager();
        mark_down(&registry, "a");

        manager.handle_primary_unhealthy(&signal("a")).await.unwrap();
        let outcome = manager.handle_primary_unhealthy(&signal("a")).await.unwrap();
        assert_eq!(outcome, FailoverOutcome::Stale);
        assert_eq!(manager.history().len(), 1);
        assert_eq!(registry.primary_id().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_racing_signals_produce_one_event() {
        let (manager, registry, _traffic) = manager();
        mark_down(&registry, "a");

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.handle_primary_unhealthy(&signal("a")).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(manager.history().len(), 1);
        assert_eq!(registry.primary_count(), 1);
    }

    #[tokio::test]
    async fn test_skips_unhealthy_candidates() {
        let (manager, registry, _traffic) = manager();
        mark_down(&registry, "a");
        mark_down(&registry, "b");

        let outcome = manager.handle_primary_unhealthy(&signal("a")).await.unwrap();
        assert!(matches!(outcome, FailoverOutcome::Completed(ref e) if e.to_region == "c"));
    }

    #[tokio::test]
    async fn test_priority_override() {
        let registry = abc_registry();
        let traffic = Arc::new(TrafficDistributor::new(100));
        traffic.reset("a");
        let manager = FailoverManager::new(registry.clone(), traffic, Arc::new(AlertManager::default()))
            .with_priority(vec!["c".to_string()]);
        mark_down(&registry, "a");

        assert_eq!(manager.select_target("a").as_deref(), Some("c"));
        mark_down(&registry, "c");
        assert_eq!(manager.select_target("a").as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_no_candidate_is_degraded_not_flipped() {
        let (manager, registry, traffic) = manager();
        for id in ["a", "b", "c"] {
            mark_down(&registry, id);
        }

        let outcome = manager.handle_primary_unhealthy(&signal("a")).await.unwrap();
        assert_eq!(outcome, FailoverOutcome::Degraded);
        assert!(manager.is_degraded());
        assert!(matches!(manager.state(), FailoverState::Evaluating { ref from_region, .. } if from_region == "a"));
        assert_eq!(registry.primary_id().as_deref(), Some("a"));
        assert_eq!(traffic.snapshot().weight("a"), Some(100));
        assert!(manager.history().is_empty());
        assert!(manager.alerts.is_firing(FAILOVER_DEGRADED, Some("a")));

        // A candidate recovers; the next signal completes the failover.
        mark_up(&registry, "c");
        let outcome = manager.handle_primary_unhealthy(&signal("a")).await.unwrap();
        assert!(matches!(outcome, FailoverOutcome::Completed(ref e) if e.to_region == "c"));
        assert!(!manager.is_degraded());
        assert!(!manager.alerts.is_firing(FAILOVER_DEGRADED, Some("a")));
    }

    #[tokio::test]
    async fn test_recovered_primary_returns_to_stable() {
        let (manager, registry, _traffic) = manager();
        for id in ["a", "b", "c"] {
            mark_down(&registry, id);
        }
        manager.handle_primary_unhealthy(&signal("a")).await.unwrap();
        assert!(manager.is_degraded());

        mark_up(&registry, "a");
        let outcome = manager.handle_primary_unhealthy(&signal("a")).await.unwrap();
        assert_eq!(outcome, FailoverOutcome::Recovered);
        assert_eq!(manager.state(), FailoverState::Stable);
        assert!(manager.history().is_empty());
    }

    #[tokio::test]
    async fn test_manual_failover() {
        let (manager, registry, traffic) = manager();
        let event = manager.failover_to("c", "maintenance window").await.unwrap();
        assert!(!event.automatic);
        assert_eq!(event.reason, FailoverReason::Manual("maintenance window".to_string()));
        assert_eq!(registry.primary_id().as_deref(), Some("c"));
        assert_eq!(traffic.snapshot().weight("c"), Some(100));
    }

    #[tokio::test]
    async fn test_manual_failover_validates_target() {
        let (manager, registry, _traffic) = manager();
        mark_down(&registry, "b");

        assert!(matches!(
            manager.failover_to("b", "x").await,
            Err(Error::TargetRegionUnhealthy(_))
        ));
        assert!(matches!(
            manager.failover_to("a", "x").await,
            Err(Error::AlreadyPrimary(_))
        ));
        assert!(matches!(
            manager.failover_to("zz", "x").await,
            Err(Error::RegionNotFound(_))
        ));
        assert!(manager.history().is_empty());
        assert_eq!(registry.primary_id().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_manual_then_stale_automatic_signal() {
        let (manager, registry, _traffic) = manager();
        mark_down(&registry, "a");
        manager.failover_to("c", "operator").await.unwrap();

        let outcome = manager.handle_primary_unhealthy(&signal("a")).await.unwrap();
        assert_eq!(outcome, FailoverOutcome::Stale);
        assert_eq!(manager.history().len(), 1);
        assert_eq!(registry.primary_id().as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn test_run_consumes_signals() {
        let (manager, registry, _traffic) = manager();
        mark_down(&registry, "a");
        let (tx, rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();

        let handle = {
            let manager = manager.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { manager.run(rx, shutdown).await })
        };

        tx.send(signal("a")).await.unwrap();
        tx.send(signal("a")).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(manager.history().len(), 1);
        assert_eq!(manager.recent_failovers(5)[0].to_region, "b");
    }
}
