//! Error types for the regional router.

use thiserror::Error;

/// Result type alias for controller operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in routing, failover and rollout operations.
#[derive(Error, Debug)]
pub enum Error {
    // Registry errors
    #[error("Region not found: {0}")]
    RegionNotFound(String),

    #[error("Region already registered: {0}")]
    RegionAlreadyExists(String),

    #[error("No primary region configured")]
    NoPrimaryConfigured,

    #[error("Primary region already configured: {0}")]
    PrimaryAlreadyConfigured(String),

    #[error("Cannot deactivate primary region {0}; fail over first")]
    PrimaryDeactivation(String),

    // Routing errors
    #[error("No active and healthy region available")]
    NoAvailableRegion,

    // Failover errors
    #[error("Target region is unhealthy or inactive: {0}")]
    TargetRegionUnhealthy(String),

    #[error("Region is already primary: {0}")]
    AlreadyPrimary(String),

    // Fan-out errors
    #[error("Operation failed in region {region}: {reason}")]
    OperationFailed { region: String, reason: String },

    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    #[error("Snapshot unavailable from region {region}: {reason}")]
    SnapshotUnavailable { region: String, reason: String },

    #[error("Compression failed: {0}")]
    Compression(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a region-scoped failure.
    pub fn operation_failed(region: &str, reason: impl Into<String>) -> Self {
        Error::OperationFailed {
            region: region.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<lz4_flex::block::DecompressError> for Error {
    fn from(err: lz4_flex::block::DecompressError) -> Self {
        Error::Compression(err.to_string())
    }
}
