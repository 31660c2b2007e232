//! Queued write operation model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque field map carried by an operation.
pub type FieldMap = serde_json::Map<String, serde_json::Value>;

/// A unique identifier for an operation, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Create a new unique operation ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }

    /// Compact id usable as a document id for autoid creates.
    #[must_use]
    pub fn as_doc_id(&self) -> String {
        self.0.simple().to_string()
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

/// Whether the executor overwrites the whole document or merges fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeSemantics {
    Replace,
    #[default]
    MergeFields,
}

impl MergeSemantics {
    pub const fn is_merge(self) -> bool {
        matches!(self, Self::MergeFields)
    }
}

/// One pending write against the remote store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Unique identifier
    pub id: OperationId,
    /// Create, update or delete
    pub kind: OperationKind,
    /// Target collection
    pub collection: String,
    /// Target document; `None` for a create with a generated id
    pub doc_id: Option<String>,
    /// Full map for creates, partial map for updates, empty for deletes
    #[serde(default)]
    pub payload: FieldMap,
    /// Replace or merge on the remote side
    #[serde(default)]
    pub merge: MergeSemantics,
    /// Local enqueue timestamp (Unix ms)
    pub enqueued_at: i64,
    /// Failed attempts so far
    #[serde(default)]
    pub retries: u32,
}

impl Operation {
    fn new(
        kind: OperationKind,
        collection: impl Into<String>,
        doc_id: Option<String>,
        payload: FieldMap,
        merge: MergeSemantics,
    ) -> Self {
        Self {
            id: OperationId::new(),
            kind,
            collection: collection.into(),
            doc_id,
            payload,
            merge,
            enqueued_at: chrono::Utc::now().timestamp_millis(),
            retries: 0,
        }
    }

    /// Create (or overwrite) a document with a known id.
    #[must_use]
    pub fn create(collection: impl Into<String>, doc_id: impl Into<String>, payload: FieldMap) -> Self {
        Self::new(
            OperationKind::Create,
            collection,
            Some(doc_id.into()),
            payload,
            MergeSemantics::Replace,
        )
    }

    /// Create a document whose id is derived from the operation id.
    #[must_use]
    pub fn create_autoid(collection: impl Into<String>, payload: FieldMap) -> Self {
        Self::new(
            OperationKind::Create,
            collection,
            None,
            payload,
            MergeSemantics::Replace,
        )
    }

    /// Merge a partial field map into a document.
    #[must_use]
    pub fn update(collection: impl Into<String>, doc_id: impl Into<String>, payload: FieldMap) -> Self {
        Self::new(
            OperationKind::Update,
            collection,
            Some(doc_id.into()),
            payload,
            MergeSemantics::MergeFields,
        )
    }

    #[must_use]
    pub fn delete(collection: impl Into<String>, doc_id: impl Into<String>) -> Self {
        Self::new(
            OperationKind::Delete,
            collection,
            Some(doc_id.into()),
            FieldMap::new(),
            MergeSemantics::Replace,
        )
    }

    #[must_use]
    pub const fn with_merge(mut self, merge: MergeSemantics) -> Self {
        self.merge = merge;
        self
    }

    /// Key under which pending operations collapse.
    ///
    /// Autoid creates have no key: each one targets a distinct document.
    pub fn target_key(&self) -> Option<(&str, &str)> {
        self.doc_id
            .as_deref()
            .map(|doc_id| (self.collection.as_str(), doc_id))
    }

    /// Document id the executor writes to.
    pub fn resolved_doc_id(&self) -> String {
        self.doc_id.clone().unwrap_or_else(|| self.id.as_doc_id())
    }
}
