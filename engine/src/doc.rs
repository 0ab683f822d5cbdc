//! Client document state machine.
//!
//! A [`Doc`] holds an optimistic local copy of one document. Local edits
//! apply immediately and queue up for submission; remote operations arriving
//! from the authority are transformed against the queued work so both sides
//! converge on the same state. At most one operation is in flight at a time.
//!
//! The type is pure: it never touches the network. Outgoing operations are
//! returned from [`flush`](Doc::flush) and [`resend_due`](Doc::resend_due),
//! completion and change notifications accumulate as [`DocEvent`]s drained
//! with [`take_events`](Doc::take_events), and the embedding decides when to
//! call back in (on acknowledgment, rejection, remote delivery, reconnect).

use crate::connection::Connection;
use crate::ot::{OtType, RegisteredType, TransformSide, TypeRegistry};
use crate::{
    CollectionName, DocId, Error, OpBody, Operation, Result, Seq, Snapshot, Source, Version,
};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;

/// Handle identifying one locally submitted change, resolved by a later
/// [`DocEvent::OpAcked`] or [`DocEvent::OpFailed`].
pub type OpTicket = u64;

#[derive(Debug, Clone, PartialEq)]
enum PendingBody {
    Create { doc_type: String, data: Value },
    Edit { delta: Value },
    Delete,
    /// Composed away to nothing; tickets still resolve at flush time.
    Noop,
}

/// A queued local change: pending until sent, then the single in-flight slot.
#[derive(Debug, Clone)]
struct PendingEntry {
    body: PendingBody,
    tickets: Vec<OpTicket>,
    ty: Option<RegisteredType>,
    src: Option<Source>,
    seq: Option<Seq>,
    retries: u32,
}

/// Notifications produced by the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum DocEvent {
    /// A remote create took effect locally.
    Created,
    /// A remote edit was applied to the snapshot.
    Edited { delta: Value },
    /// A remote delete removed the document.
    Deleted,
    /// Locally submitted work committed; `version` is its position in the
    /// document's total order.
    OpAcked {
        tickets: Vec<OpTicket>,
        version: Version,
    },
    /// Locally submitted work failed and was undone.
    OpFailed {
        tickets: Vec<OpTicket>,
        error: Error,
    },
    /// Local state may disagree with the authority; the embedding should
    /// fetch the snapshot and hand it to [`Doc::apply_fetch`].
    ResyncNeeded,
}

/// Optimistic client state for one document.
pub struct Doc {
    collection: CollectionName,
    id: DocId,
    registry: Arc<TypeRegistry>,
    doc_type: Option<RegisteredType>,
    version: Option<Version>,
    data: Option<Value>,
    pending: VecDeque<PendingEntry>,
    inflight: Option<PendingEntry>,
    subscribed: bool,
    want_subscribe: bool,
    next_ticket: OpTicket,
    events: Vec<DocEvent>,
}

impl Doc {
    pub fn new(
        registry: Arc<TypeRegistry>,
        collection: impl Into<CollectionName>,
        id: impl Into<DocId>,
    ) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            registry,
            doc_type: None,
            version: None,
            data: None,
            pending: VecDeque::new(),
            inflight: None,
            subscribed: false,
            want_subscribe: false,
            next_ticket: 0,
            events: Vec::new(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the document currently exists locally.
    pub fn exists(&self) -> bool {
        self.doc_type.is_some()
    }

    pub fn type_name(&self) -> Option<&str> {
        self.doc_type.as_ref().map(|t| t.ty.name())
    }

    pub fn version(&self) -> Option<Version> {
        self.version
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// Whether any local change is pending or in flight.
    pub fn has_pending_writes(&self) -> bool {
        self.inflight.is_some() || !self.pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn subscribed(&self) -> bool {
        self.subscribed
    }

    pub fn set_subscribed(&mut self, subscribed: bool) {
        self.subscribed = subscribed;
    }

    pub fn want_subscribe(&self) -> bool {
        self.want_subscribe
    }

    pub fn set_want_subscribe(&mut self, want: bool) {
        self.want_subscribe = want;
    }

    /// Drain accumulated notifications.
    pub fn take_events(&mut self) -> Vec<DocEvent> {
        std::mem::take(&mut self.events)
    }

    /// Create the document locally and queue the create for submission.
    pub fn create(&mut self, type_name: &str, data: Value) -> Result<OpTicket> {
        if self.exists() {
            return Err(Error::DocAlreadyExists);
        }
        let registered = self.registry.get(type_name)?.clone();
        self.data = Some(registered.ty.create(data.clone())?);
        self.doc_type = Some(registered.clone());

        let ticket = self.issue_ticket();
        self.enqueue(
            PendingBody::Create {
                doc_type: type_name.to_string(),
                data,
            },
            ticket,
            Some(registered),
        );
        Ok(ticket)
    }

    /// Apply an edit locally and queue it for submission.
    pub fn submit_edit(&mut self, delta: Value) -> Result<OpTicket> {
        let registered = self.doc_type.clone().ok_or(Error::DocDoesNotExist)?;
        let delta = if registered.caps.normalize {
            registered.ty.normalize(delta)
        } else {
            delta
        };
        let data = self.data.clone().ok_or(Error::DocDoesNotExist)?;
        self.data = Some(registered.ty.apply(data, &delta)?);

        let ticket = self.issue_ticket();
        self.enqueue(PendingBody::Edit { delta }, ticket, Some(registered));
        Ok(ticket)
    }

    /// Delete the document locally and queue the delete for submission.
    pub fn delete(&mut self) -> Result<OpTicket> {
        if !self.exists() {
            return Err(Error::DocDoesNotExist);
        }
        self.doc_type = None;
        self.data = None;

        let ticket = self.issue_ticket();
        self.enqueue(PendingBody::Delete, ticket, None);
        Ok(ticket)
    }

    fn issue_ticket(&mut self) -> OpTicket {
        self.next_ticket += 1;
        self.next_ticket
    }

    /// Queue a change, merging into the last pending entry when possible.
    ///
    /// Only entries that have never been sent are merge candidates; an entry
    /// requeued after a disconnect keeps its `(src, seq)` tag and must go
    /// out verbatim.
    fn enqueue(&mut self, body: PendingBody, ticket: OpTicket, ty: Option<RegisteredType>) {
        if let Some(last) = self.pending.back_mut() {
            if last.seq.is_none() {
                let merged: Option<PendingBody> = match (&last.body, &body) {
                    (PendingBody::Noop, next) => Some(next.clone()),
                    (PendingBody::Edit { delta: first }, PendingBody::Edit { delta: second }) => {
                        last.ty
                            .as_ref()
                            .filter(|r| r.caps.compose)
                            .and_then(|r| r.ty.compose(first, second).ok())
                            .map(|delta| {
                                if delta == Value::Array(Vec::new()) {
                                    PendingBody::Noop
                                } else {
                                    PendingBody::Edit { delta }
                                }
                            })
                    }
                    (PendingBody::Create { doc_type, data }, PendingBody::Edit { delta }) => last
                        .ty
                        .as_ref()
                        .and_then(|r| r.ty.apply(data.clone(), delta).ok())
                        .map(|data| PendingBody::Create {
                            doc_type: doc_type.clone(),
                            data,
                        }),
                    (PendingBody::Create { .. }, PendingBody::Delete) => Some(PendingBody::Noop),
                    (PendingBody::Delete, PendingBody::Create { .. }) => Some(body.clone()),
                    _ => None,
                };
                if let Some(new_body) = merged {
                    last.body = new_body;
                    last.tickets.push(ticket);
                    if ty.is_some() {
                        last.ty = ty;
                    }
                    return;
                }
            }
        }
        self.pending.push_back(PendingEntry {
            body,
            tickets: vec![ticket],
            ty,
            src: None,
            seq: None,
            retries: 0,
        });
    }

    /// Send the next pending entry if the connection allows it.
    ///
    /// Leading no-op entries resolve their tickets without a round trip.
    /// The returned operation must reach the authority; the entry sits in
    /// the in-flight slot until acknowledgment, rejection, or disconnect
    /// hands it back.
    pub fn flush(&mut self, conn: &mut Connection) -> Option<Operation> {
        if !conn.can_send() || self.inflight.is_some() {
            return None;
        }
        while matches!(
            self.pending.front().map(|e| &e.body),
            Some(PendingBody::Noop)
        ) {
            if let Some(entry) = self.pending.pop_front() {
                self.events.push(DocEvent::OpAcked {
                    tickets: entry.tickets,
                    version: self.version.unwrap_or(0),
                });
            }
        }
        let mut entry = self.pending.pop_front()?;
        if entry.seq.is_none() {
            entry.src = Some(conn.id().clone());
            entry.seq = Some(conn.allocate_seq());
        }
        let op = self.operation_for(&entry);
        self.inflight = Some(entry);
        Some(op)
    }

    /// Rebuild the wire operation for an entry (first send or resend).
    fn operation_for(&self, entry: &PendingEntry) -> Operation {
        let body = match &entry.body {
            PendingBody::Create { doc_type, data } => OpBody::Create {
                doc_type: doc_type.clone(),
                data: data.clone(),
            },
            PendingBody::Edit { delta } => OpBody::Edit {
                delta: delta.clone(),
            },
            PendingBody::Delete => OpBody::Delete,
            PendingBody::Noop => OpBody::Edit {
                delta: Value::Array(Vec::new()),
            },
        };
        Operation {
            src: entry.src.clone().unwrap_or_default(),
            seq: entry.seq.unwrap_or_default(),
            version: self.version,
            body,
            meta: None,
        }
    }

    /// Resend the stuck in-flight operation, returning it with its retry
    /// count so the embedding can consult its backoff policy.
    pub fn resend_due(&mut self) -> Option<(Operation, u32)> {
        let mut entry = self.inflight.take()?;
        entry.retries += 1;
        let retries = entry.retries;
        let op = self.operation_for(&entry);
        self.inflight = Some(entry);
        Some((op, retries))
    }

    fn is_own_inflight(&self, op: &Operation) -> bool {
        self.inflight
            .as_ref()
            .map(|entry| {
                entry.src.as_deref() == Some(op.src.as_str()) && entry.seq == Some(op.seq)
            })
            .unwrap_or(false)
    }

    /// Ingest one committed operation from the document's subscription.
    pub fn handle_remote_op(&mut self, op: &Operation) -> Result<()> {
        let msg_version = op
            .version
            .ok_or_else(|| Error::MalformedOperation("committed op without version".into()))?;

        let Some(local_version) = self.version else {
            // Never synchronized; only the ack for our own optimistic create
            // carries enough information to adopt a version.
            if self.is_own_inflight(op) {
                return self.ack(msg_version);
            }
            self.events.push(DocEvent::ResyncNeeded);
            return Ok(());
        };

        if msg_version > local_version {
            // gap: never apply out of order
            self.events.push(DocEvent::ResyncNeeded);
            return Ok(());
        }
        if msg_version < local_version {
            // stale duplicate
            return Ok(());
        }
        if self.is_own_inflight(op) {
            return self.ack(msg_version);
        }
        self.integrate_foreign(op.clone(), msg_version)
    }

    /// Handle a direct submit response from the authority.
    ///
    /// `prior` is the list of committed operations the submission was
    /// transformed against; they are integrated first so the local version
    /// lines up with the committed one.
    pub fn handle_submit_ok(
        &mut self,
        committed_version: Version,
        prior: Vec<Operation>,
    ) -> Result<()> {
        if self.version.is_some() {
            for op in prior {
                let version = op.version.ok_or_else(|| {
                    Error::MalformedOperation("committed op without version".into())
                })?;
                if self.version.is_some_and(|local| version < local) {
                    continue;
                }
                self.integrate_foreign(op, version)?;
            }
        }
        self.ack(committed_version)
    }

    /// Acknowledge the in-flight operation at its committed version.
    ///
    /// The caller should flush again afterwards to send the next pending
    /// entry. A stale acknowledgment (nothing in flight) is ignored.
    pub fn ack(&mut self, committed_version: Version) -> Result<()> {
        let Some(entry) = self.inflight.take() else {
            return Ok(());
        };
        let was_create = matches!(entry.body, PendingBody::Create { .. });
        match self.version {
            _ if was_create => self.version = Some(committed_version + 1),
            None => self.version = Some(committed_version + 1),
            Some(local) if local == committed_version => self.version = Some(local + 1),
            Some(local) => {
                let error = Error::AckVersionMismatch {
                    expected: local,
                    actual: committed_version,
                };
                self.events.push(DocEvent::OpFailed {
                    tickets: entry.tickets,
                    error: error.clone(),
                });
                self.events.push(DocEvent::ResyncNeeded);
                return Err(error);
            }
        }
        self.events.push(DocEvent::OpAcked {
            tickets: entry.tickets,
            version: committed_version,
        });
        Ok(())
    }

    /// The authority rejected the in-flight operation.
    ///
    /// If the type can invert, the failed edit is undone in place: its
    /// inverse is carried past everything queued behind it, then applied.
    /// Otherwise all local work rolls back and the document resynchronizes
    /// from a fresh fetch.
    pub fn handle_rejection(&mut self, error: Error) {
        let Some(entry) = self.inflight.take() else {
            return;
        };
        if let (PendingBody::Edit { delta }, Some(registered)) = (&entry.body, entry.ty.clone()) {
            if registered.caps.invert {
                if self.undo_in_place(&registered, delta) {
                    self.events.push(DocEvent::OpFailed {
                        tickets: entry.tickets,
                        error,
                    });
                    return;
                }
            }
        }
        self.hard_rollback(entry, error);
    }

    fn undo_in_place(&mut self, registered: &RegisteredType, delta: &Value) -> bool {
        let Ok(mut inverse) = registered.ty.invert(delta) else {
            return false;
        };
        for later in &self.pending {
            let PendingBody::Edit { delta: later_delta } = &later.body else {
                return false;
            };
            match registered
                .ty
                .transform(&inverse, later_delta, TransformSide::Left)
            {
                Ok(next) => inverse = next,
                Err(_) => return false,
            }
        }
        let Some(data) = self.data.clone() else {
            return false;
        };
        match registered.ty.apply(data, &inverse) {
            Ok(new_data) => {
                self.data = Some(new_data);
                true
            }
            Err(_) => false,
        }
    }

    fn hard_rollback(&mut self, entry: PendingEntry, error: Error) {
        let mut tickets = entry.tickets;
        for dropped in std::mem::take(&mut self.pending) {
            tickets.extend(dropped.tickets);
        }
        self.events.push(DocEvent::OpFailed { tickets, error });
        self.doc_type = None;
        self.data = None;
        self.version = None;
        self.events.push(DocEvent::ResyncNeeded);
    }

    /// Install an authoritative snapshot (fetch response).
    ///
    /// Ignored while local writes are pending or in flight: the ack/reject
    /// flow owns the state until the queues drain.
    pub fn apply_fetch(&mut self, snapshot: &Snapshot) -> Result<()> {
        if self.has_pending_writes() {
            return Ok(());
        }
        match &snapshot.doc_type {
            Some(name) => {
                let registered = self.registry.get(name)?.clone();
                self.doc_type = Some(registered);
                self.data = snapshot.data.clone();
            }
            None => {
                self.doc_type = None;
                self.data = None;
            }
        }
        self.version = Some(snapshot.version);
        Ok(())
    }

    /// The connection dropped. Pending work survives verbatim: the in-flight
    /// entry rejoins the head of the queue with its `(src, seq)` tag intact,
    /// so the next flush resends exactly the same operation.
    pub fn handle_disconnect(&mut self) {
        self.subscribed = false;
        if let Some(entry) = self.inflight.take() {
            self.pending.push_front(entry);
        }
    }

    /// Rebase local queues past a foreign committed operation, then apply it.
    fn integrate_foreign(&mut self, mut incoming: Operation, msg_version: Version) -> Result<()> {
        if let Some(mut entry) = self.inflight.take() {
            match Self::transform_entry(&mut entry, &mut incoming) {
                Ok(()) => self.inflight = Some(entry),
                Err(error) => self.fail_entry(entry, error),
            }
        }
        let queued = std::mem::take(&mut self.pending);
        for mut entry in queued {
            match Self::transform_entry(&mut entry, &mut incoming) {
                Ok(()) => self.pending.push_back(entry),
                Err(error) => self.fail_entry(entry, error),
            }
        }

        self.version = Some(msg_version + 1);
        self.apply_committed(&incoming)
    }

    fn fail_entry(&mut self, entry: PendingEntry, error: Error) {
        let needs_resync = matches!(error, Error::InvalidDelta(_));
        self.events.push(DocEvent::OpFailed {
            tickets: entry.tickets,
            error,
        });
        if needs_resync {
            self.events.push(DocEvent::ResyncNeeded);
        }
    }

    /// Transform one queued entry and the incoming operation against each
    /// other. The committed operation takes the left side. An error means
    /// the entry cannot survive the incoming operation and must fail.
    fn transform_entry(entry: &mut PendingEntry, incoming: &mut Operation) -> Result<()> {
        match (&mut entry.body, &mut incoming.body) {
            (PendingBody::Noop, _) => Ok(()),
            (PendingBody::Edit { delta }, OpBody::Edit {
                delta: incoming_delta,
            }) => {
                let registered = entry.ty.as_ref().ok_or(Error::DocDoesNotExist)?;
                let (theirs, ours) = registered.ty.transform_x(incoming_delta, delta)?;
                *incoming_delta = theirs;
                *delta = ours;
                Ok(())
            }
            (PendingBody::Edit { .. } | PendingBody::Create { .. }, OpBody::Delete) => {
                Err(Error::DocWasDeleted)
            }
            (PendingBody::Delete, OpBody::Delete) => Ok(()),
            (PendingBody::Create { .. }, OpBody::Create { .. }) => Err(Error::DocAlreadyExists),
            (_, OpBody::Create { .. }) => Err(Error::DocDoesNotExist),
            (PendingBody::Create { .. }, OpBody::Edit { .. }) => Err(Error::DocAlreadyExists),
            (PendingBody::Delete, OpBody::Edit { .. }) => Ok(()),
        }
    }

    /// Apply a committed foreign operation to the local snapshot.
    fn apply_committed(&mut self, op: &Operation) -> Result<()> {
        match &op.body {
            OpBody::Create { doc_type, data } => {
                let registered = self.registry.get(doc_type)?.clone();
                self.data = Some(registered.ty.create(data.clone())?);
                self.doc_type = Some(registered);
                self.events.push(DocEvent::Created);
            }
            OpBody::Edit { delta } => {
                if let (Some(registered), Some(data)) = (self.doc_type.clone(), self.data.clone()) {
                    self.data = Some(registered.ty.apply(data, delta)?);
                    self.events.push(DocEvent::Edited {
                        delta: delta.clone(),
                    });
                }
                // else: deleted locally ahead of the authority; nothing to
                // apply the edit to, and our delete supersedes it
            }
            OpBody::Delete => {
                self.doc_type = None;
                self.data = None;
                self.events.push(DocEvent::Deleted);
            }
        }
        Ok(())
    }
}
