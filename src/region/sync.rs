//! State synchronization for multi-region consistency.
//!
//! Captures one snapshot from the primary and pushes it to every other
//! active region. The snapshot and target list are fixed at capture time:
//! a failover mid-sync does not cause a re-read, so the whole batch carries
//! the same data.

use crate::core::fanout::{run_parallel, run_sequential};
use crate::core::{now, Error, Hash256, JobStatus, RegionOutcome, Result, Timestamp};
use crate::region::registry::RegionRegistry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How a sync job fans out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// All followers at once
    #[default]
    Parallel,
    /// One follower at a time
    Sequential,
}

/// Payload encoding on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadEncoding {
    Raw,
    Lz4,
}

/// A captured dataset ready to push.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Dataset name
    pub data_type: String,
    /// Region the data was read from
    pub source_region: String,
    pub captured_at: Timestamp,
    /// SHA3-256 of the raw payload
    pub digest: Hash256,
    pub encoding: PayloadEncoding,
    /// Raw payload size in bytes
    pub raw_len: usize,
    /// Encoded payload
    pub payload: Vec<u8>,
}

impl Snapshot {
    /// Wrap raw data, compressing it with LZ4 if asked.
    pub fn capture(source_region: &str, data_type: &str, raw: Vec<u8>, compress: bool) -> Self {
        let digest = Hash256::digest(&raw);
        let raw_len = raw.len();
        let (encoding, payload) = if compress {
            (PayloadEncoding::Lz4, lz4_flex::compress_prepend_size(&raw))
        } else {
            (PayloadEncoding::Raw, raw)
        };

        Self {
            data_type: data_type.to_string(),
            source_region: source_region.to_string(),
            captured_at: now(),
            digest,
            encoding,
            raw_len,
            payload,
        }
    }

    /// Decode the payload and check it against the digest.
    pub fn decode(&self) -> Result<Vec<u8>> {
        let raw = match self.encoding {
            PayloadEncoding::Raw => self.payload.clone(),
            PayloadEncoding::Lz4 => lz4_flex::decompress_size_prepended(&self.payload)?,
        };
        if Hash256::digest(&raw) != self.digest {
            return Err(Error::Compression(format!(
                "snapshot digest mismatch for {} from {}",
                self.data_type, self.source_region
            )));
        }
        Ok(raw)
    }
}

/// Data fetch/push capability supplied by the hosting environment.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Read a dataset from a region.
    async fn fetch_snapshot(&self, region_id: &str, data_type: &str) -> Result<Vec<u8>>;

    /// Write a captured snapshot into a region.
    async fn push_snapshot(&self, region_id: &str, snapshot: &Snapshot) -> Result<()>;
}

/// Result of one sync run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncJob {
    /// Job ID
    pub id: String,
    pub data_type: String,
    /// Primary at capture time
    pub source_region: String,
    /// Digest of the data every target received
    pub digest: Hash256,
    pub mode: SyncMode,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    /// Per-target outcome, in target order
    pub outcomes: Vec<RegionOutcome>,
    pub status: JobStatus,
}

impl SyncJob {
    /// Outcome for one region.
    pub fn outcome(&self, region_id: &str) -> Option<&RegionOutcome> {
        self.outcomes.iter().find(|o| o.region_id == region_id)
    }
}

/// Replicates primary data to follower regions.
pub struct StateSynchronizer {
    registry: Arc<RegionRegistry>,
    store: Arc<dyn SnapshotStore>,
    mode: SyncMode,
    timeout: Duration,
    compress: bool,
}

impl StateSynchronizer {
    /// Create a new synchronizer.
    pub fn new(registry: Arc<RegionRegistry>, store: Arc<dyn SnapshotStore>, timeout: Duration) -> Self {
        Self {
            registry,
            store,
            mode: SyncMode::Parallel,
            timeout,
            compress: false,
        }
    }

    /// Set the fan-out mode.
    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    /// LZ4-compress snapshots before pushing.
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Sync a dataset from the primary to all other active regions.
    pub async fn sync(&self, data_type: &str) -> Result<SyncJob> {
        self.sync_with_cancel(data_type, &CancellationToken::new()).await
    }

    /// Like [`StateSynchronizer::sync`], aborting remaining pushes when
    /// `cancel` fires.
    pub async fn sync_with_cancel(&self, data_type: &str, cancel: &CancellationToken) -> Result<SyncJob> {
        let started_at = now();
        let source = self.registry.primary_id().ok_or(Error::NoPrimaryConfigured)?;
        let targets: Vec<String> = self
            .registry
            .list_active()
            .into_iter()
            .filter(|r| r.id != source)
            .map(|r| r.id)
            .collect();

        let raw = match tokio::time::timeout(self.timeout, self.store.fetch_snapshot(&source, data_type)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                return Err(Error::SnapshotUnavailable {
                    region: source,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(Error::SnapshotUnavailable {
                    region: source,
                    reason: format!("fetch timed out after {}ms", self.timeout.as_millis()),
                })
            }
        };

        let snapshot = Arc::new(Snapshot::capture(&source, data_type, raw, self.compress));
        let push = |region_id: String| {
            let store = self.store.clone();
            let snapshot = snapshot.clone();
            async move { store.push_snapshot(&region_id, &snapshot).await }
        };

        let outcomes = match self.mode {
            SyncMode::Parallel => run_parallel("sync", targets, self.timeout, cancel, push).await,
            SyncMode::Sequential => run_sequential("sync", targets, self.timeout, cancel, push).await,
        };
        let status = JobStatus::from_outcomes(&outcomes);

        match &status {
            JobStatus::Success => info!(
                data_type,
                source = %source,
                targets = outcomes.len(),
                "sync complete"
            ),
            JobStatus::PartialFailure { failed } => warn!(
                data_type,
                source = %source,
                failed = ?failed,
                "sync finished with failures"
            ),
        }

        Ok(SyncJob {
            id: uuid::Uuid::new_v4().to_string(),
            data_type: data_type.to_string(),
            source_region: source,
            digest: snapshot.digest.clone(),
            mode: self.mode,
            started_at,
            finished_at: now(),
            outcomes,
            status,
        })
    }
}
