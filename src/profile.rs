//! Caller display name and type lookup.

use crate::calls::CallerType;
use crate::calls::signaling::parse_document;
use crate::store::traits::{Collection, DocRef, DocumentStore};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub display_name: String,
    pub caller_type: CallerType,
}

#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    async fn lookup(&self, user_id: &str) -> Result<Option<Profile>, anyhow::Error>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileDocument {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

/// Profiles stored next to the call documents: a `responders/{id}` document
/// wins over a `users/{id}` one.
pub struct StoreProfileDirectory {
    store: Arc<dyn DocumentStore>,
}

impl StoreProfileDirectory {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    async fn read(
        &self,
        collection: Collection,
        user_id: &str,
    ) -> Result<Option<ProfileDocument>, anyhow::Error> {
        match self.store.get(&DocRef::new(collection, user_id)).await? {
            Some(doc) => Ok(Some(parse_document(doc)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ProfileDirectory for StoreProfileDirectory {
    async fn lookup(&self, user_id: &str) -> Result<Option<Profile>, anyhow::Error> {
        let (doc, caller_type) = match self.read(Collection::Responders, user_id).await? {
            Some(doc) => (doc, CallerType::Responder),
            None => match self.read(Collection::Users, user_id).await? {
                Some(doc) => (doc, CallerType::User),
                None => return Ok(None),
            },
        };
        let display_name = doc
            .display_name
            .or(doc.name)
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| user_id.to_string());
        Ok(Some(Profile {
            display_name,
            caller_type,
        }))
    }
}
