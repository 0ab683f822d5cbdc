//! Version sequencing for a single document's operation stream.
//!
//! [`StreamState`] is the pure core of a subscription: it validates that
//! catch-up history is contiguous, then classifies each live operation
//! against the cursor. Buffering and delivery are the embedding's job; this
//! type only decides what an operation *is* relative to the stream.

use crate::{Error, Operation, Result, Version};

/// Sequencing state for one subscription.
///
/// Created at the consumer's starting version. Until [`pack`](Self::pack)
/// runs, live operations are expected to sit in the embedding's buffer (the
/// window where the live feed races the history fetch). After packing the
/// stream is pass-through: every operation is delivered exactly once, in
/// version order, or the stream fails loudly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamState {
    cursor: Version,
    packed: bool,
}

impl StreamState {
    /// Start a stream whose consumer expects `from` as the next version.
    pub fn new(from: Version) -> Self {
        Self {
            cursor: from,
            packed: false,
        }
    }

    /// Next version the consumer has not yet seen.
    pub fn cursor(&self) -> Version {
        self.cursor
    }

    pub fn is_packed(&self) -> bool {
        self.packed
    }

    /// Validate and absorb catch-up history.
    ///
    /// Every operation must carry exactly the expected next version; any
    /// mismatch is a stream-consistency error and poisons the subscription.
    /// Returns the operations ready to hand to the consumer.
    pub fn pack(&mut self, history: Vec<Operation>) -> Result<Vec<Operation>> {
        for op in &history {
            let version = op
                .version
                .ok_or_else(|| Error::MalformedOperation("committed op without version".into()))?;
            if version != self.cursor {
                return Err(Error::StreamGap {
                    expected: self.cursor,
                    got: version,
                });
            }
            self.cursor += 1;
        }
        self.packed = true;
        Ok(history)
    }

    /// Classify a live operation against the cursor.
    ///
    /// - `Ok(Some(op))`: the next expected version; the cursor advances.
    /// - `Ok(None)`: stale duplicate (already emitted during packing).
    /// - `Err(StreamGap)`: a version was skipped; the subscription is broken
    ///   and the consumer must resynchronize rather than continue.
    pub fn classify(&mut self, op: Operation) -> Result<Option<Operation>> {
        let version = op
            .version
            .ok_or_else(|| Error::MalformedOperation("committed op without version".into()))?;
        if version < self.cursor {
            return Ok(None);
        }
        if version == self.cursor {
            self.cursor += 1;
            return Ok(Some(op));
        }
        Err(Error::StreamGap {
            expected: self.cursor,
            got: version,
        })
    }
}
