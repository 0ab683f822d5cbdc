//! Operation types for expressing document changes.
//!
//! Every change travels as an [`Operation`] tagged with the writer identity
//! and a per-writer sequence number, so the pair `(src, seq)` identifies an
//! operation across resubmissions.

use crate::{Error, Result, Seq, Source, Version};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identity of an operation: writer plus per-writer sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId {
    pub src: Source,
    pub seq: Seq,
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.src, self.seq)
    }
}

/// The payload of an operation. Exactly one kind per operation, carried by
/// the type rather than by optional fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OpBody {
    /// Bring a document into existence with the named OT type.
    Create { doc_type: String, data: Value },
    /// A type-specific delta against the current snapshot.
    Edit { delta: Value },
    /// Remove the document; its version counter keeps running.
    Delete,
}

impl OpBody {
    /// Short tag used in logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            OpBody::Create { .. } => "create",
            OpBody::Edit { .. } => "edit",
            OpBody::Delete => "delete",
        }
    }
}

/// An operation intended to apply at a specific document version.
///
/// `version: None` means "apply at whatever the current version is"; the
/// authority resolves it during submission. Once committed, the operation
/// occupies exactly that position in the document's total order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Writer identity (the submitting connection)
    pub src: Source,
    /// Per-writer monotonic sequence number
    pub seq: Seq,
    /// Document version this operation applies at
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    /// The change itself
    #[serde(flatten)]
    pub body: OpBody,
    /// Optional metadata (commit timestamps and the like)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl Operation {
    /// Build a create operation.
    pub fn create(
        src: impl Into<Source>,
        seq: Seq,
        version: Option<Version>,
        doc_type: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            src: src.into(),
            seq,
            version,
            body: OpBody::Create {
                doc_type: doc_type.into(),
                data,
            },
            meta: None,
        }
    }

    /// Build an edit operation.
    pub fn edit(src: impl Into<Source>, seq: Seq, version: Option<Version>, delta: Value) -> Self {
        Self {
            src: src.into(),
            seq,
            version,
            body: OpBody::Edit { delta },
            meta: None,
        }
    }

    /// Build a delete operation.
    pub fn delete(src: impl Into<Source>, seq: Seq, version: Option<Version>) -> Self {
        Self {
            src: src.into(),
            seq,
            version,
            body: OpBody::Delete,
            meta: None,
        }
    }

    /// The `(src, seq)` identity of this operation.
    pub fn id(&self) -> OperationId {
        OperationId {
            src: self.src.clone(),
            seq: self.seq,
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(self.body, OpBody::Create { .. })
    }

    pub fn is_edit(&self) -> bool {
        matches!(self.body, OpBody::Edit { .. })
    }

    pub fn is_delete(&self) -> bool {
        matches!(self.body, OpBody::Delete)
    }

    /// Structural validation, run before any side effect.
    ///
    /// Failures here are fatal-immediate: the operation is never retried and
    /// nothing has been applied or persisted.
    pub fn validate(&self) -> Result<()> {
        if self.src.is_empty() {
            return Err(Error::MalformedOperation("empty src".into()));
        }
        match &self.body {
            OpBody::Create { doc_type, .. } if doc_type.is_empty() => {
                Err(Error::MalformedOperation("create with empty type".into()))
            }
            OpBody::Edit { delta } if delta.is_null() => {
                Err(Error::MalformedOperation("edit with null delta".into()))
            }
            _ => Ok(()),
        }
    }
}
