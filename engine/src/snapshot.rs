//! Snapshot - the materialized state of a single document.

use crate::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The current value of a document plus its version.
///
/// `doc_type: None` means the document does not exist (never created, or
/// deleted). The version counts every operation ever committed, so it keeps
/// increasing across delete and recreate.
///
/// Snapshots are value types: cloning produces a fully independent copy, and
/// every consumer works on its own copy rather than aliasing shared state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: Version,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Snapshot {
    /// A document that has never been created.
    pub fn absent() -> Self {
        Self {
            version: 0,
            doc_type: None,
            data: None,
        }
    }

    /// A live document at a given version.
    pub fn new(version: Version, doc_type: impl Into<String>, data: Value) -> Self {
        Self {
            version,
            doc_type: Some(doc_type.into()),
            data: Some(data),
        }
    }

    /// Whether the document currently exists.
    pub fn exists(&self) -> bool {
        self.doc_type.is_some()
    }

    /// Clear type and data, keeping the version counter.
    pub fn clear(&mut self) {
        self.doc_type = None;
        self.data = None;
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::absent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_snapshot() {
        let snapshot = Snapshot::absent();
        assert_eq!(snapshot.version, 0);
        assert!(!snapshot.exists());
    }

    #[test]
    fn clear_keeps_version() {
        let mut snapshot = Snapshot::new(7, "json", json!({"a": 1}));
        assert!(snapshot.exists());
        snapshot.clear();
        assert!(!snapshot.exists());
        assert_eq!(snapshot.version, 7);
    }

    #[test]
    fn clone_is_independent() {
        let original = Snapshot::new(1, "json", json!({"items": [1, 2, 3]}));
        let mut copy = original.clone();
        copy.data.as_mut().unwrap()["items"][0] = json!(99);
        assert_eq!(original.data.as_ref().unwrap()["items"][0], json!(1));
    }

    #[test]
    fn serialization_omits_absent_fields() {
        let text = serde_json::to_string(&Snapshot::absent()).unwrap();
        assert!(!text.contains("docType") && !text.contains("doc_type"));
        assert!(!text.contains("data"));

        let parsed: Snapshot = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, Snapshot::absent());
    }
}
