use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::calls::media::{ChannelProfile, LoopbackEngine, LoopbackMediaHub, MediaEngine};
use crate::calls::{CallManager, MediaEngineAdapter};
use crate::config::CallManagerConfig;
use crate::permissions::StaticPermissionGate;
use crate::profile::StoreProfileDirectory;
use crate::store::error::{Result, StoreError};
use crate::store::traits::{
    Collection, DocRef, DocumentSnapshot, DocumentStore, DocumentStream, FieldGuard, FieldMap,
};
use crate::store::InMemoryStore;
use crate::types::events::CallEvent;
use crate::LocalSessionView;

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Store operations that [`FlakyStore`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Set,
    Update,
    CompareAndUpdate,
    Delete,
    CompareAndDelete,
    Subscribe,
}

/// Wraps a store and fails selected operations on selected collections with
/// [`StoreError::Unavailable`].
pub struct FlakyStore {
    inner: Arc<dyn DocumentStore>,
    failing: Mutex<HashSet<(StoreOp, Collection)>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail(&self, op: StoreOp, collection: Collection) {
        self.failing.lock().unwrap().insert((op, collection));
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    fn check(&self, op: StoreOp, doc: &DocRef) -> Result<()> {
        if self.failing.lock().unwrap().contains(&(op, doc.collection)) {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn get(&self, doc: &DocRef) -> Result<DocumentSnapshot> {
        self.check(StoreOp::Get, doc)?;
        self.inner.get(doc).await
    }

    async fn set(&self, doc: &DocRef, fields: FieldMap) -> Result<()> {
        self.check(StoreOp::Set, doc)?;
        self.inner.set(doc, fields).await
    }

    async fn update(&self, doc: &DocRef, fields: FieldMap) -> Result<()> {
        self.check(StoreOp::Update, doc)?;
        self.inner.update(doc, fields).await
    }

    async fn compare_and_update(
        &self,
        doc: &DocRef,
        guard: FieldGuard,
        fields: FieldMap,
    ) -> Result<bool> {
        self.check(StoreOp::CompareAndUpdate, doc)?;
        self.inner.compare_and_update(doc, guard, fields).await
    }

    async fn delete(&self, doc: &DocRef) -> Result<()> {
        self.check(StoreOp::Delete, doc)?;
        self.inner.delete(doc).await
    }

    async fn compare_and_delete(&self, doc: &DocRef, guard: FieldGuard) -> Result<bool> {
        self.check(StoreOp::CompareAndDelete, doc)?;
        self.inner.compare_and_delete(doc, guard).await
    }

    async fn subscribe(&self, doc: &DocRef) -> Result<DocumentStream> {
        self.check(StoreOp::Subscribe, doc)?;
        self.inner.subscribe(doc).await
    }
}

/// A shared store and media hub that test clients connect to.
pub struct TestWorld {
    pub store: Arc<InMemoryStore>,
    pub hub: LoopbackMediaHub,
    pub config: CallManagerConfig,
}

impl TestWorld {
    pub fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        Self {
            store: Arc::new(InMemoryStore::new()),
            hub: LoopbackMediaHub::new(),
            config: CallManagerConfig {
                app_id: "test-app".to_string(),
                ..Default::default()
            },
        }
    }

    pub fn with_ring_timeout(mut self, timeout: Duration) -> Self {
        self.config.ring_timeout = Some(timeout);
        self
    }

    /// A signed-in client with a working loopback engine.
    pub async fn client(&self, user_id: &str) -> TestClient {
        self.client_on(self.store.clone(), user_id, true).await
    }

    /// A signed-in client whose media engine never loaded.
    pub async fn client_without_media(&self, user_id: &str) -> TestClient {
        self.client_on(self.store.clone(), user_id, false).await
    }

    pub async fn client_on(
        &self,
        store: Arc<dyn DocumentStore>,
        user_id: &str,
        with_media: bool,
    ) -> TestClient {
        let engine = with_media.then(|| self.hub.engine());
        let media = match engine.clone() {
            Some(engine) => {
                MediaEngineAdapter::load(
                    Some(engine as Arc<dyn MediaEngine>),
                    &self.config.app_id,
                    ChannelProfile::Communication,
                )
                .await
            }
            None => MediaEngineAdapter::unavailable(),
        };
        let permissions = Arc::new(StaticPermissionGate::default());
        let manager = CallManager::new(
            self.config.clone(),
            store.clone(),
            Arc::new(StoreProfileDirectory::new(store)),
            permissions.clone(),
            media,
        );
        manager
            .sign_in(user_id)
            .await
            .expect("sign in should succeed");
        TestClient {
            user_id: user_id.to_string(),
            manager,
            engine,
            permissions,
        }
    }
}

pub struct TestClient {
    pub user_id: String,
    pub manager: Arc<CallManager>,
    pub engine: Option<Arc<LoopbackEngine>>,
    pub permissions: Arc<StaticPermissionGate>,
}

impl TestClient {
    pub async fn wait_for_view<F>(&self, predicate: F) -> LocalSessionView
    where
        F: FnMut(&LocalSessionView) -> bool,
    {
        wait_for_view(&self.manager, predicate).await
    }

    pub async fn wait_idle(&self) -> LocalSessionView {
        self.wait_for_view(|v| v.is_idle()).await
    }
}

/// Wait until the manager's view satisfies `predicate`. Panics after a few
/// seconds.
pub async fn wait_for_view<F>(manager: &CallManager, mut predicate: F) -> LocalSessionView
where
    F: FnMut(&LocalSessionView) -> bool,
{
    let mut rx = manager.watch_view();
    let view = tokio::time::timeout(WAIT_TIMEOUT, rx.wait_for(|v| predicate(v)))
        .await
        .expect("timed out waiting for view")
        .expect("view channel closed");
    view.clone()
}

/// Wait for the first event matching `predicate`, skipping the others.
pub async fn wait_for_event<F>(rx: &mut broadcast::Receiver<CallEvent>, mut predicate: F) -> CallEvent
where
    F: FnMut(&CallEvent) -> bool,
{
    tokio::time::timeout(WAIT_TIMEOUT, async {
        loop {
            let event = rx.recv().await.expect("event bus closed");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Give spawned handlers a moment to run when asserting that nothing
/// happens.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}
