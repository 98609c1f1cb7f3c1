//! Alerting for region health and failover.
//!
//! Alerts are keyed by name and region. Firing an alert that is already
//! active only refreshes its message; resolving moves it into a bounded
//! history.

use crate::core::{now, Timestamp};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::{error, info, warn};

pub const REGION_UNHEALTHY: &str = "region_unhealthy";
pub const PRIMARY_UNHEALTHY: &str = "primary_unhealthy";
pub const FAILOVER_DEGRADED: &str = "failover_degraded";
pub const FAILOVER_COMPLETED: &str = "failover_completed";

/// Alert severity level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertSeverity {
    /// Informational
    Info,
    /// Warning
    Warning,
    /// Critical
    Critical,
}

/// Alert state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertState {
    /// Actively firing
    Firing,
    /// Resolved
    Resolved,
}

/// An alert instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Alert {
    /// Alert ID
    pub id: String,
    /// Alert name
    pub name: String,
    /// Severity
    pub severity: AlertSeverity,
    /// Region the alert concerns
    pub region_id: Option<String>,
    /// Human readable detail
    pub message: String,
    /// Current state
    pub state: AlertState,
    /// When the alert fired
    pub fired_at: Timestamp,
    /// When the alert resolved
    pub resolved_at: Option<Timestamp>,
}

impl Alert {
    fn new(name: &str, severity: AlertSeverity, region_id: Option<&str>, message: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            severity,
            region_id: region_id.map(str::to_string),
            message: message.to_string(),
            state: AlertState::Firing,
            fired_at: now(),
            resolved_at: None,
        }
    }

    /// Resolve the alert.
    pub fn resolve(&mut self) {
        self.state = AlertState::Resolved;
        self.resolved_at = Some(now());
    }

    /// Check if firing.
    pub fn is_firing(&self) -> bool {
        self.state == AlertState::Firing
    }
}

type AlertKey = (String, Option<String>);

/// Alert manager for handling alerts.
pub struct AlertManager {
    /// Active alerts
    active: RwLock<BTreeMap<AlertKey, Alert>>,
    /// Resolved and one-shot alerts
    history: RwLock<VecDeque<Alert>>,
    /// Maximum history size
    max_history: usize,
}

impl AlertManager {
    /// Create a new alert manager.
    pub fn new(max_history: usize) -> Self {
        Self {
            active: RwLock::new(BTreeMap::new()),
            history: RwLock::new(VecDeque::new()),
            max_history: max_history.max(1),
        }
    }

    /// Fire (or refresh) an alert. Returns true if it was newly raised.
    pub fn fire(
        &self,
        name: &str,
        severity: AlertSeverity,
        region_id: Option<&str>,
        message: &str,
    ) -> bool {
        let key = (name.to_string(), region_id.map(str::to_string));
        let mut active = self.active.write();

        if let Some(alert) = active.get_mut(&key) {
            alert.message = message.to_string();
            return false;
        }

        match severity {
            AlertSeverity::Critical => error!(alert = name, region = ?region_id, "{}", message),
            AlertSeverity::Warning => warn!(alert = name, region = ?region_id, "{}", message),
            AlertSeverity::Info => info!(alert = name, region = ?region_id, "{}", message),
        }
        active.insert(key, Alert::new(name, severity, region_id, message));
        true
    }

    /// Record a one-shot notice straight into history.
    pub fn notify(&self, name: &str, severity: AlertSeverity, region_id: Option<&str>, message: &str) {
        info!(alert = name, region = ?region_id, "{}", message);
        let mut alert = Alert::new(name, severity, region_id, message);
        alert.resolve();
        self.push_history(alert);
    }

    /// Resolve an active alert. Returns true if one was active.
    pub fn resolve(&self, name: &str, region_id: Option<&str>) -> bool {
        let key = (name.to_string(), region_id.map(str::to_string));
        let resolved = self.active.write().remove(&key);
        match resolved {
            Some(mut alert) => {
                info!(alert = name, region = ?region_id, "alert resolved");
                alert.resolve();
                self.push_history(alert);
                true
            }
            None => false,
        }
    }

    fn push_history(&self, alert: Alert) {
        let mut history = self.history.write();
        if history.len() >= self.max_history {
            history.pop_front();
        }
        history.push_back(alert);
    }

    /// Get firing alerts.
    pub fn firing_alerts(&self) -> Vec<Alert> {
        self.active.read().values().cloned().collect()
    }

    /// Check if an alert is firing.
    pub fn is_firing(&self, name: &str, region_id: Option<&str>) -> bool {
        let key = (name.to_string(), region_id.map(str::to_string));
        self.active.read().contains_key(&key)
    }

    /// Count firing alerts at or above a severity.
    pub fn count_at_least(&self, severity: AlertSeverity) -> usize {
        self.active
            .read()
            .values()
            .filter(|a| a.severity >= severity)
            .count()
    }

    /// Get history, oldest first.
    pub fn history(&self) -> Vec<Alert> {
        self.history.read().iter().cloned().collect()
    }

    /// Most recent history entries, newest first.
    pub fn recent(&self, n: usize) -> Vec<Alert> {
        self.history.read().iter().rev().take(n).cloned().collect()
    }
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new(1000)
    }
}
