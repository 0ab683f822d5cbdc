//! The authority: submission pipeline and read paths.
//!
//! One [`Backend`] owns the OT type registry, the storage and pub/sub
//! collaborators, and the subscription hub. Submissions to different
//! documents proceed in parallel; submissions to the same document race on
//! the atomic commit and the losers transform-and-retry. There is no
//! per-document lock anywhere in this pipeline - the compare-and-version
//! semantics of [`Storage::commit`] are the only serialization point, so
//! multiple processes can serve the same document against a shared store.

use crate::error::{AppError, Result};
use crate::pubsub::PubSub;
use crate::storage::{CommitOutcome, Storage};
use crate::stream::{OpStream, SubscriptionHub};
use serde::Serialize;
use std::sync::Arc;
use tandem_engine::ot::{self, TransformSide, TypeRegistry};
use tandem_engine::{Operation, Snapshot, Version};

/// Default bound on transform-and-retry rounds per submission.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// A successful submission: where the operation landed, and what it had to
/// be transformed past to get there.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitOutcome {
    /// Position the operation occupies in the document's total order.
    pub version: Version,
    /// Committed operations the submission was transformed against, in
    /// order. Callers behind the current version use these to catch up
    /// before processing the acknowledgment.
    pub transformed_against: Vec<Operation>,
}

pub struct Backend {
    registry: Arc<TypeRegistry>,
    storage: Arc<dyn Storage>,
    pubsub: Arc<dyn PubSub>,
    subscriptions: SubscriptionHub,
    max_retries: u32,
}

impl Backend {
    pub fn new(
        registry: Arc<TypeRegistry>,
        storage: Arc<dyn Storage>,
        pubsub: Arc<dyn PubSub>,
    ) -> Self {
        let subscriptions = SubscriptionHub::new(Arc::clone(&pubsub));
        Self {
            registry,
            storage,
            pubsub,
            subscriptions,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Topics currently held open by subscriptions.
    pub fn active_topics(&self) -> usize {
        self.subscriptions.topic_count()
    }

    fn topic(collection: &str, id: &str) -> String {
        format!("{collection}/{id}")
    }

    /// Linearize one submission into the document's total order.
    ///
    /// Validation and version-from-the-future are fatal-immediate; a failed
    /// tentative apply is fatal for the submission; only commit conflicts
    /// retry, bounded by `max_retries`. After the commit the operation is
    /// broadcast on the document topic.
    pub async fn submit(
        &self,
        collection: &str,
        id: &str,
        mut op: Operation,
    ) -> Result<SubmitOutcome> {
        op.validate()?;

        // A resubmission of an already-committed operation acknowledges the
        // original commit instead of reapplying.
        if let Some(version) = self
            .storage
            .committed_version(collection, id, &op.src, op.seq)
            .await?
        {
            tracing::debug!(
                collection,
                id,
                src = %op.src,
                seq = op.seq,
                version,
                "resubmission of committed operation"
            );
            return Ok(SubmitOutcome {
                version,
                transformed_against: Vec::new(),
            });
        }

        stamp_commit_meta(&mut op);

        let mut transformed_against = Vec::new();
        let mut attempts: u32 = 0;
        loop {
            let snapshot = self.storage.get_snapshot(collection, id).await?;
            let current = snapshot.version;
            let intended = *op.version.get_or_insert(current);
            if intended > current {
                return Err(AppError::VersionFromFuture {
                    requested: intended,
                    current,
                });
            }

            if intended < current {
                let ty = match &snapshot.doc_type {
                    Some(name) => Some(Arc::clone(&self.registry.get(name)?.ty)),
                    None => None,
                };
                let committed = self
                    .storage
                    .get_ops(collection, id, intended, Some(current))
                    .await?;
                for applied in committed {
                    if applied.src == op.src && applied.seq == op.seq {
                        // our own earlier attempt won the race
                        let version = applied.version.ok_or_else(|| {
                            AppError::BadRequest("committed op without version".into())
                        })?;
                        return Ok(SubmitOutcome {
                            version,
                            transformed_against: Vec::new(),
                        });
                    }
                    ot::transform_operation(
                        ty.as_deref(),
                        &mut op,
                        &applied,
                        TransformSide::Right,
                    )?;
                    transformed_against.push(applied);
                }
            }

            // Tentative apply on a private copy: an operation that is unsafe
            // at this version fails here, before anything is persisted.
            let mut next = snapshot.clone();
            ot::apply_operation(&self.registry, &mut next, &op)?;
            next.version = current + 1;

            match self.storage.commit(collection, id, &op, &next).await? {
                CommitOutcome::Committed => {
                    self.pubsub
                        .publish(&Self::topic(collection, id), &op)
                        .await?;
                    tracing::info!(
                        collection,
                        id,
                        version = current,
                        kind = op.body.kind(),
                        "operation committed"
                    );
                    return Ok(SubmitOutcome {
                        version: current,
                        transformed_against,
                    });
                }
                CommitOutcome::Conflict => {
                    attempts += 1;
                    if attempts > self.max_retries {
                        tracing::warn!(collection, id, attempts, "submission retries exhausted");
                        return Err(AppError::RetryExhausted { attempts });
                    }
                    tracing::debug!(collection, id, attempts, "commit conflict, transforming");
                }
            }
        }
    }

    /// Current snapshot of a document.
    pub async fn fetch(&self, collection: &str, id: &str) -> Result<Snapshot> {
        Ok(self.storage.get_snapshot(collection, id).await?)
    }

    /// Committed operations in `[from, to)`.
    pub async fn get_ops(
        &self,
        collection: &str,
        id: &str,
        from: Version,
        to: Option<Version>,
    ) -> Result<Vec<Operation>> {
        Ok(self.storage.get_ops(collection, id, from, to).await?)
    }

    /// Open a gap-free operation stream starting at `from` (defaulting to
    /// the current version).
    ///
    /// The live listener registers before history is fetched, so an
    /// operation committed during the fetch is never lost - it waits in the
    /// listener queue and is deduplicated against the history on packing.
    pub async fn subscribe(
        &self,
        collection: &str,
        id: &str,
        from: Option<Version>,
    ) -> Result<OpStream> {
        let topic = Self::topic(collection, id);
        let listener = self.subscriptions.attach(&topic);

        let snapshot = self.storage.get_snapshot(collection, id).await?;
        let from = from.unwrap_or(snapshot.version);
        let history = if from < snapshot.version {
            self.storage
                .get_ops(collection, id, from, Some(snapshot.version))
                .await?
        } else {
            Vec::new()
        };

        tracing::debug!(collection, id, from, history = history.len(), "subscribed");
        Ok(OpStream::open(collection, id, from, history, listener)?)
    }
}

/// Stamp the commit timestamp into the operation metadata.
fn stamp_commit_meta(op: &mut Operation) {
    let ts = chrono::Utc::now().timestamp_millis();
    match op.meta.as_mut().and_then(|meta| meta.as_object_mut()) {
        Some(meta) => {
            meta.insert("ts".into(), ts.into());
        }
        None => op.meta = Some(serde_json::json!({ "ts": ts })),
    }
}
