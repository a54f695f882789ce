//! Document store abstraction used as the signaling transport.
//!
//! The store is shared by every client. It only promises per-document
//! last-write-wins and that a subscriber never observes an older snapshot of
//! a document after a newer one. Nothing is promised across documents.

use super::error::{Result, StoreError};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use tokio::sync::mpsc;

/// A stored document: a JSON object.
pub type Document = Map<String, Value>;

/// Latest state of a document as seen by a subscriber. `None` means the
/// document does not exist (never written or deleted).
pub type DocumentSnapshot = Option<Document>;

/// Change notifications for a single document. The current state is always
/// delivered first, then one snapshot per change. Dropping the receiver
/// unsubscribes.
pub type DocumentStream = mpsc::UnboundedReceiver<DocumentSnapshot>;

/// Collections used by the calling core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    /// Session Records keyed by channel id.
    Calls,
    /// Inbox Records keyed by receiver user id.
    IncomingCalls,
    /// Responder profiles keyed by user id.
    Responders,
    /// Plain user profiles keyed by user id.
    Users,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Calls => "calls",
            Collection::IncomingCalls => "incomingCalls",
            Collection::Responders => "responders",
            Collection::Users => "users",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocRef {
    pub collection: Collection,
    pub id: String,
}

impl DocRef {
    pub fn new(collection: Collection, id: impl Into<String>) -> Self {
        Self {
            collection,
            id: id.into(),
        }
    }
}

impl fmt::Display for DocRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection.as_str(), self.id)
    }
}

/// Value written to a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Value(Value),
    /// Replaced by the store with its own clock at write time.
    ServerTimestamp,
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::Value(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Value(Value::String(value.to_string()))
    }
}

/// Fields of a write, in a stable order.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// Converts a serializable struct into write fields. `null` fields are
/// skipped so optional values are left untouched by partial updates.
pub fn fields_from<T: Serialize>(value: &T) -> Result<FieldMap> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k, FieldValue::Value(v)))
            .collect()),
        other => Err(StoreError::NotAnObject(other.to_string())),
    }
}

/// Precondition for the guarded writes: the document must exist and every
/// condition must hold, each one naming a field and the values it may
/// currently hold.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldGuard {
    conditions: Vec<(String, Vec<Value>)>,
}

impl FieldGuard {
    pub fn one_of<I, V>(field: impl Into<String>, allowed: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            conditions: vec![(field.into(), allowed.into_iter().map(Into::into).collect())],
        }
    }

    pub fn equals(field: impl Into<String>, expected: impl Into<Value>) -> Self {
        let expected: Value = expected.into();
        Self::one_of(field, [expected])
    }

    /// Add a condition; all of them must hold.
    pub fn and_one_of<I, V>(mut self, field: impl Into<String>, allowed: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.conditions
            .push((field.into(), allowed.into_iter().map(Into::into).collect()));
        self
    }

    pub fn and_equals(self, field: impl Into<String>, expected: impl Into<Value>) -> Self {
        let expected: Value = expected.into();
        self.and_one_of(field, [expected])
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.conditions.iter().all(|(field, allowed)| {
            doc.get(field)
                .is_some_and(|current| allowed.contains(current))
        })
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, doc: &DocRef) -> Result<DocumentSnapshot>;

    /// Full overwrite; creates the document if missing.
    async fn set(&self, doc: &DocRef, fields: FieldMap) -> Result<()>;

    /// Partial merge. Fails with [`StoreError::NotFound`] if the document
    /// does not exist.
    async fn update(&self, doc: &DocRef, fields: FieldMap) -> Result<()>;

    /// Partial merge applied only if `guard` holds, evaluated atomically with
    /// the write. Returns whether the write happened; a missing document is
    /// reported as `false`, not as an error.
    async fn compare_and_update(
        &self,
        doc: &DocRef,
        guard: FieldGuard,
        fields: FieldMap,
    ) -> Result<bool>;

    /// Deleting a document that does not exist succeeds.
    async fn delete(&self, doc: &DocRef) -> Result<()>;

    /// Delete only if `guard` holds, evaluated atomically with the delete.
    /// Returns whether the document was removed.
    async fn compare_and_delete(&self, doc: &DocRef, guard: FieldGuard) -> Result<bool>;

    async fn subscribe(&self, doc: &DocRef) -> Result<DocumentStream>;
}
