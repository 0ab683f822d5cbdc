//! OT type capabilities and the operation-level transform rules.
//!
//! An OT type is a pure value describing how one document representation
//! changes: it can apply a delta to a snapshot and rewrite one delta to
//! account for another, concurrent one. The engine never inspects deltas
//! itself; everything type-specific goes through [`OtType`].
//!
//! On top of the per-type capability, this module holds the rules shared by
//! the server submission pipeline and the client state machine for whole
//! operations (create/edit/delete), which the type knows nothing about.

mod json;
mod registry;

pub use json::JsonOt;
pub use registry::{RegisteredType, TypeRegistry};

use crate::{Error, OpBody, Operation, Result, Snapshot};
use serde_json::Value;

/// Which side an operation takes when transforming breaks ties.
///
/// The committed (or server-ordered) operation takes [`TransformSide::Left`];
/// the operation being rewritten to apply after it takes
/// [`TransformSide::Right`]. Insertion ties then resolve the same way on
/// every replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformSide {
    Left,
    Right,
}

/// Optional capabilities of an OT type, reported once at registration.
///
/// Callers branch on these flags instead of probing the optional methods:
/// invoking an unsupported method is a contract violation and returns
/// [`Error::MissingCapability`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub compose: bool,
    pub invert: bool,
    pub normalize: bool,
}

/// A document type: how to materialize, mutate and transform its data.
///
/// Implementations are pure and synchronous, with no knowledge of versions
/// or the network.
pub trait OtType: Send + Sync {
    /// Registered name, referenced by create operations.
    fn name(&self) -> &str;

    /// Which optional methods this type supports.
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Materialize initial document data from a create payload.
    fn create(&self, data: Value) -> Result<Value>;

    /// Apply a delta, producing the next document data.
    fn apply(&self, data: Value, delta: &Value) -> Result<Value>;

    /// Rewrite `delta` so it applies after `over` has been applied.
    fn transform(&self, delta: &Value, over: &Value, side: TransformSide) -> Result<Value>;

    /// Transform two concurrent deltas against each other.
    ///
    /// Returns `(left', right')` such that `apply(apply(d, left), right') ==
    /// apply(apply(d, right), left')`.
    fn transform_x(&self, left: &Value, right: &Value) -> Result<(Value, Value)> {
        let left_past_right = self.transform(left, right, TransformSide::Left)?;
        let right_past_left = self.transform(right, left, TransformSide::Right)?;
        Ok((left_past_right, right_past_left))
    }

    /// Merge two sequential deltas into one. Optional.
    fn compose(&self, _first: &Value, _second: &Value) -> Result<Value> {
        Err(Error::MissingCapability {
            type_name: self.name().to_string(),
            capability: "compose",
        })
    }

    /// Produce the delta that undoes `delta`. Optional.
    fn invert(&self, _delta: &Value) -> Result<Value> {
        Err(Error::MissingCapability {
            type_name: self.name().to_string(),
            capability: "invert",
        })
    }

    /// Canonicalize a delta. Optional; identity by default.
    fn normalize(&self, delta: Value) -> Value {
        delta
    }
}

/// Apply a whole operation to a snapshot's type and data.
///
/// Versions are untouched; advancing them is the caller's business (the
/// pipeline on commit, the client on receipt).
pub fn apply_operation(
    registry: &TypeRegistry,
    snapshot: &mut Snapshot,
    op: &Operation,
) -> Result<()> {
    match &op.body {
        OpBody::Create { doc_type, data } => {
            if snapshot.exists() {
                return Err(Error::DocAlreadyExists);
            }
            let registered = registry.get(doc_type)?;
            snapshot.data = Some(registered.ty.create(data.clone())?);
            snapshot.doc_type = Some(registered.ty.name().to_string());
        }
        OpBody::Edit { delta } => {
            let type_name = snapshot.doc_type.clone().ok_or(Error::DocDoesNotExist)?;
            let registered = registry.get(&type_name)?;
            let data = snapshot.data.clone().ok_or(Error::DocDoesNotExist)?;
            snapshot.data = Some(registered.ty.apply(data, delta)?);
        }
        OpBody::Delete => snapshot.clear(),
    }
    Ok(())
}

/// Rewrite `op` so it applies after `applied`, a committed operation at the
/// same version. On success `op`'s intended version advances past it.
///
/// The type is only consulted when both operations are edits; create and
/// delete interactions resolve at this level:
/// - anything but a delete transformed past a delete fails (the document is
///   gone; the caller re-fetches), while delete past delete keeps its own
///   commit slot;
/// - create past create is a document-already-exists conflict;
/// - edit or delete past a create means the caller targeted a version where
///   the document could not have existed.
pub fn transform_operation(
    ty: Option<&dyn OtType>,
    op: &mut Operation,
    applied: &Operation,
    side: TransformSide,
) -> Result<()> {
    match (&mut op.body, &applied.body) {
        (OpBody::Delete, OpBody::Delete) => {}
        (_, OpBody::Delete) => return Err(Error::DocWasDeleted),
        (OpBody::Create { .. }, OpBody::Create { .. }) => return Err(Error::DocAlreadyExists),
        (_, OpBody::Create { .. }) => return Err(Error::DocDoesNotExist),
        (OpBody::Create { .. }, OpBody::Edit { .. }) => return Err(Error::DocAlreadyExists),
        (OpBody::Edit { delta }, OpBody::Edit { delta: applied_delta }) => {
            let ty = ty.ok_or(Error::DocDoesNotExist)?;
            *delta = ty.transform(delta, applied_delta, side)?;
        }
        (OpBody::Delete, OpBody::Edit { .. }) => {}
    }
    if let Some(v) = op.version {
        op.version = Some(v + 1);
    }
    Ok(())
}
