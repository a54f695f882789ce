use super::error::{Result, StoreError};
use super::traits::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::trace;
use std::sync::Mutex;
use tokio::sync::mpsc;

#[derive(Default)]
struct Entry {
    doc: DocumentSnapshot,
    subscribers: Vec<mpsc::UnboundedSender<DocumentSnapshot>>,
}

impl Entry {
    fn publish(&mut self) {
        let snapshot = self.doc.clone();
        self.subscribers
            .retain(|tx| tx.send(snapshot.clone()).is_ok());
    }
}

/// A process-local document store that several clients can share.
///
/// Writes to one document are serialized by the map shard lock, and the
/// resulting snapshot is pushed to subscribers while that lock is held, so
/// every subscriber sees the writes to a document in order.
pub struct InMemoryStore {
    docs: DashMap<DocRef, Entry>,
    clock: Mutex<DateTime<Utc>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            docs: DashMap::new(),
            clock: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    /// Server clock. Never goes backwards even if the wall clock does.
    fn server_now(&self) -> DateTime<Utc> {
        let mut last = self.clock.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now().max(*last);
        *last = now;
        now
    }

    fn resolve(&self, fields: FieldMap) -> Result<Document> {
        let mut out = Document::new();
        for (name, value) in fields {
            let value = match value {
                FieldValue::Value(v) => v,
                FieldValue::ServerTimestamp => serde_json::to_value(self.server_now())?,
            };
            out.insert(name, value);
        }
        Ok(out)
    }

    /// Number of live subscribers on a document.
    pub fn subscriber_count(&self, doc: &DocRef) -> usize {
        self.docs
            .get(doc)
            .map(|e| e.subscribers.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Ids of the existing documents in a collection.
    pub fn document_ids(&self, collection: Collection) -> Vec<String> {
        let mut ids: Vec<String> = self
            .docs
            .iter()
            .filter(|e| e.key().collection == collection && e.doc.is_some())
            .map(|e| e.key().id.clone())
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get(&self, doc: &DocRef) -> Result<DocumentSnapshot> {
        Ok(self.docs.get(doc).and_then(|e| e.doc.clone()))
    }

    async fn set(&self, doc: &DocRef, fields: FieldMap) -> Result<()> {
        let resolved = self.resolve(fields)?;
        let mut entry = self.docs.entry(doc.clone()).or_default();
        entry.doc = Some(resolved);
        entry.publish();
        trace!("set {}", doc);
        Ok(())
    }

    async fn update(&self, doc: &DocRef, fields: FieldMap) -> Result<()> {
        let resolved = self.resolve(fields)?;
        let mut entry = self
            .docs
            .get_mut(doc)
            .ok_or_else(|| StoreError::NotFound(doc.to_string()))?;
        let current = entry
            .doc
            .as_mut()
            .ok_or_else(|| StoreError::NotFound(doc.to_string()))?;
        current.extend(resolved);
        entry.publish();
        trace!("update {}", doc);
        Ok(())
    }

    async fn compare_and_update(
        &self,
        doc: &DocRef,
        guard: FieldGuard,
        fields: FieldMap,
    ) -> Result<bool> {
        let resolved = self.resolve(fields)?;
        let Some(mut entry) = self.docs.get_mut(doc) else {
            return Ok(false);
        };
        let Some(current) = entry.doc.as_mut() else {
            return Ok(false);
        };
        if !guard.matches(current) {
            trace!("guarded update on {} skipped", doc);
            return Ok(false);
        }
        current.extend(resolved);
        entry.publish();
        trace!("guarded update {}", doc);
        Ok(true)
    }

    async fn delete(&self, doc: &DocRef) -> Result<()> {
        let remove = match self.docs.get_mut(doc) {
            Some(mut entry) => {
                if entry.doc.take().is_some() {
                    entry.publish();
                }
                entry.subscribers.is_empty()
            }
            None => false,
        };
        if remove {
            self.docs.remove_if(doc, |_, e| e.doc.is_none() && e.subscribers.is_empty());
        }
        trace!("delete {}", doc);
        Ok(())
    }

    async fn compare_and_delete(&self, doc: &DocRef, guard: FieldGuard) -> Result<bool> {
        let remove = match self.docs.get_mut(doc) {
            Some(mut entry) => {
                if !entry.doc.as_ref().is_some_and(|current| guard.matches(current)) {
                    trace!("guarded delete on {} skipped", doc);
                    return Ok(false);
                }
                entry.doc = None;
                entry.publish();
                entry.subscribers.is_empty()
            }
            None => return Ok(false),
        };
        if remove {
            self.docs.remove_if(doc, |_, e| e.doc.is_none() && e.subscribers.is_empty());
        }
        trace!("guarded delete {}", doc);
        Ok(true)
    }

    async fn subscribe(&self, doc: &DocRef) -> Result<DocumentStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut entry = self.docs.entry(doc.clone()).or_default();
        // Initial snapshot; cannot fail since we hold the receiver.
        let _ = tx.send(entry.doc.clone());
        entry.subscribers.retain(|s| !s.is_closed());
        entry.subscribers.push(tx);
        Ok(rx)
    }
}
