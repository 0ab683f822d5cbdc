//! Client connection state machine.
//!
//! Documents never talk to a transport directly; they ask the connection
//! whether sending is currently possible, and they tag outgoing operations
//! with the connection's identity and sequence counter. The transport
//! binding itself (WebSocket or otherwise) lives outside the engine.

use crate::{Error, Result, Seq, Source};
use std::time::Duration;

/// Lifecycle states of a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Stopped,
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Stopped => "stopped",
        }
    }
}

/// Backoff schedule for resending a stuck in-flight operation.
///
/// Policy data, not protocol: resending early is harmless because commits
/// are idempotent on `(src, seq)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub factor: u32,
    pub max: Duration,
}

impl RetryPolicy {
    /// Delay before resend attempt number `retries` (0-based).
    pub fn delay(&self, retries: u32) -> Duration {
        let factor = self.factor.max(1);
        let multiplier = factor
            .checked_pow(retries.min(16))
            .unwrap_or(u32::MAX);
        self.base.saturating_mul(multiplier).min(self.max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            factor: 2,
            max: Duration::from_secs(30),
        }
    }
}

/// A client's identity and link state.
///
/// Owns the `(src, seq)` namespace for every operation this client sends:
/// `src` is the connection id, and `allocate_seq` hands out the per-writer
/// monotonic sequence numbers. An operation keeps its tag across
/// reconnects, which is what makes resubmission idempotent.
#[derive(Debug, Clone)]
pub struct Connection {
    id: Source,
    state: ConnectionState,
    next_seq: Seq,
    retry: RetryPolicy,
}

impl Connection {
    /// A fresh connection, starting in `Connecting`.
    pub fn new(id: impl Into<Source>) -> Self {
        Self {
            id: id.into(),
            state: ConnectionState::Connecting,
            next_seq: 0,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The writer identity used as `src` on outgoing operations.
    pub fn id(&self) -> &Source {
        &self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Whether documents may flush right now.
    pub fn can_send(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Request a state transition.
    ///
    /// Anything outside the allowed edges is a programming error, surfaced
    /// as [`Error::InvalidStateTransition`] rather than silently accepted.
    pub fn transition(&mut self, to: ConnectionState) -> Result<()> {
        use ConnectionState::*;
        let allowed = matches!(
            (self.state, to),
            (Disconnected, Connecting)
                | (Stopped, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (Connecting, Stopped)
                | (Connected, Stopped)
                | (Disconnected, Stopped)
        );
        if !allowed {
            return Err(Error::InvalidStateTransition {
                from: self.state.name(),
                to: to.name(),
            });
        }
        self.state = to;
        Ok(())
    }

    /// Allocate the next per-writer sequence number.
    pub fn allocate_seq(&mut self) -> Seq {
        self.next_seq += 1;
        self.next_seq
    }
}
