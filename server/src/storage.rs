//! Storage collaborator contract and the in-memory reference implementation.
//!
//! The pipeline needs exactly four things from a store: snapshot reads, an
//! atomic compare-and-version commit, ordered op ranges, and a `(src, seq)`
//! lookup for idempotent resubmission. Durability is the store's own
//! concern; [`MemoryStorage`] keeps everything in process for tests and
//! single-node deployments.

use async_trait::async_trait;
use dashmap::DashMap;
use tandem_engine::{Operation, Seq, Snapshot, Version};
use thiserror::Error;

/// Failure inside a storage collaborator. Surfaced to the submitter as-is;
/// the pipeline never retries storage errors on its own.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("storage: {0}")]
pub struct StorageError(pub String);

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Outcome of an atomic commit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The operation now occupies its version in the log.
    Committed,
    /// Another operation committed at that version first.
    Conflict,
}

/// Contract the submission pipeline consumes.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Current snapshot; an absent document reads as version 0 with no type.
    async fn get_snapshot(&self, collection: &str, id: &str) -> StorageResult<Snapshot>;

    /// Persist `op` and `new_snapshot` if and only if the stored version
    /// still equals the operation's intended version.
    async fn commit(
        &self,
        collection: &str,
        id: &str,
        op: &Operation,
        new_snapshot: &Snapshot,
    ) -> StorageResult<CommitOutcome>;

    /// Committed operations in `[from, to)`; `to = None` reads to the
    /// current version. May return fewer when the range runs past the log.
    async fn get_ops(
        &self,
        collection: &str,
        id: &str,
        from: Version,
        to: Option<Version>,
    ) -> StorageResult<Vec<Operation>>;

    /// The version a `(src, seq)` pair committed at, if it ever did.
    async fn committed_version(
        &self,
        collection: &str,
        id: &str,
        src: &str,
        seq: Seq,
    ) -> StorageResult<Option<Version>>;
}

#[derive(Debug, Default)]
struct DocRecord {
    snapshot: Snapshot,
    ops: Vec<Operation>,
}

/// In-process storage. The per-document entry lock of the map is what makes
/// `commit` atomic: version check and writes happen under one guard.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    docs: DashMap<(String, String), DocRecord>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(collection: &str, id: &str) -> (String, String) {
        (collection.to_string(), id.to_string())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get_snapshot(&self, collection: &str, id: &str) -> StorageResult<Snapshot> {
        Ok(self
            .docs
            .get(&Self::key(collection, id))
            .map(|record| record.snapshot.clone())
            .unwrap_or_default())
    }

    async fn commit(
        &self,
        collection: &str,
        id: &str,
        op: &Operation,
        new_snapshot: &Snapshot,
    ) -> StorageResult<CommitOutcome> {
        let version = op
            .version
            .ok_or_else(|| StorageError("commit without an intended version".into()))?;
        if new_snapshot.version != version + 1 {
            return Err(StorageError(format!(
                "snapshot version {} does not follow operation version {}",
                new_snapshot.version, version
            )));
        }

        let mut record = self.docs.entry(Self::key(collection, id)).or_default();
        if record.snapshot.version != version {
            return Ok(CommitOutcome::Conflict);
        }
        record.ops.push(op.clone());
        record.snapshot = new_snapshot.clone();
        Ok(CommitOutcome::Committed)
    }

    async fn get_ops(
        &self,
        collection: &str,
        id: &str,
        from: Version,
        to: Option<Version>,
    ) -> StorageResult<Vec<Operation>> {
        let Some(record) = self.docs.get(&Self::key(collection, id)) else {
            return Ok(Vec::new());
        };
        let to = to
            .unwrap_or(record.snapshot.version)
            .min(record.ops.len() as Version);
        if from >= to {
            return Ok(Vec::new());
        }
        Ok(record.ops[from as usize..to as usize].to_vec())
    }

    async fn committed_version(
        &self,
        collection: &str,
        id: &str,
        src: &str,
        seq: Seq,
    ) -> StorageResult<Option<Version>> {
        Ok(self
            .docs
            .get(&Self::key(collection, id))
            .and_then(|record| {
                record
                    .ops
                    .iter()
                    .find(|op| op.src == src && op.seq == seq)
                    .and_then(|op| op.version)
            }))
    }
}
