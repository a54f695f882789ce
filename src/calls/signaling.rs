//! Signaling channel over the shared document store.
//!
//! Session Records live in `calls/{channelId}` and Inbox Records in
//! `incomingCalls/{receiverId}`. Every status write is guarded on the current
//! status being non-terminal, so a terminal status is never overwritten, and
//! on the record still carrying the writer's call id, so a late write from
//! one call never lands on the next call between the same two users.

use super::state::{InboxRecord, SessionRecord, SessionStatus};
use crate::store::error::Result;
use crate::store::traits::{
    Collection, DocRef, Document, DocumentStore, DocumentStream, FieldGuard, FieldValue,
    fields_from,
};
use log::debug;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Channel id shared by both participants: the two ids sorted and joined,
/// so either side computes the same key without coordination.
pub fn channel_id_for(a: &str, b: &str) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}_{hi}")
}

/// Parse a stored document into a typed record.
pub fn parse_document<T: DeserializeOwned>(doc: Document) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}

/// Fresh identity for one call: 16 random bytes, hex encoded.
pub fn new_call_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// The record belongs to `call_id` and has not reached a terminal status.
fn live_call_guard(call_id: &str) -> FieldGuard {
    FieldGuard::one_of(
        "status",
        SessionStatus::NON_TERMINAL
            .iter()
            .map(|s| Value::from(s.as_str())),
    )
    .and_equals("callId", call_id)
}

#[derive(Clone)]
pub struct SignalingChannel {
    store: Arc<dyn DocumentStore>,
}

impl SignalingChannel {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn session_ref(channel_id: &str) -> DocRef {
        DocRef::new(Collection::Calls, channel_id)
    }

    pub fn inbox_ref(user_id: &str) -> DocRef {
        DocRef::new(Collection::IncomingCalls, user_id)
    }

    /// Write a new Session Record. `createdAt` is assigned by the store.
    pub async fn create_session(&self, record: &SessionRecord) -> Result<()> {
        let mut fields = fields_from(record)?;
        fields.insert("createdAt".into(), FieldValue::ServerTimestamp);
        self.store
            .set(&Self::session_ref(&record.channel_id), fields)
            .await
    }

    pub async fn get_session(&self, channel_id: &str) -> Result<Option<SessionRecord>> {
        self.store
            .get(&Self::session_ref(channel_id))
            .await?
            .map(parse_document)
            .transpose()
    }

    /// Move the session to `active`. Returns `false` if the record is gone,
    /// already terminal, or now belongs to another call.
    pub async fn mark_answered(&self, channel_id: &str, call_id: &str) -> Result<bool> {
        let fields = [
            ("status".to_string(), FieldValue::from(SessionStatus::Active.as_str())),
            ("answeredAt".to_string(), FieldValue::ServerTimestamp),
        ];
        self.store
            .compare_and_update(
                &Self::session_ref(channel_id),
                live_call_guard(call_id),
                fields.into_iter().collect(),
            )
            .await
    }

    /// Write a terminal status. Returns `false` if the record is gone, a
    /// terminal status is already in place, or a newer call has taken over
    /// the channel; all of these count as success.
    pub async fn mark_terminal(
        &self,
        channel_id: &str,
        call_id: &str,
        status: SessionStatus,
    ) -> Result<bool> {
        debug_assert!(status.is_terminal(), "{status} is not terminal");
        let fields = [
            ("status".to_string(), FieldValue::from(status.as_str())),
            ("endedAt".to_string(), FieldValue::ServerTimestamp),
        ];
        let written = self
            .store
            .compare_and_update(
                &Self::session_ref(channel_id),
                live_call_guard(call_id),
                fields.into_iter().collect(),
            )
            .await?;
        if !written {
            debug!(
                "Session {} already terminal, deleted or redialed; call {} left as is",
                channel_id, call_id
            );
        }
        Ok(written)
    }

    /// Remove the Session Record if it still belongs to `call_id`.
    pub async fn delete_session(&self, channel_id: &str, call_id: &str) -> Result<bool> {
        self.store
            .compare_and_delete(
                &Self::session_ref(channel_id),
                FieldGuard::equals("callId", call_id),
            )
            .await
    }

    /// Announce an incoming call to `receiver_id`.
    pub async fn announce(&self, receiver_id: &str, inbox: &InboxRecord) -> Result<()> {
        self.store
            .set(&Self::inbox_ref(receiver_id), fields_from(inbox)?)
            .await
    }

    pub async fn get_inbox(&self, user_id: &str) -> Result<Option<InboxRecord>> {
        self.store
            .get(&Self::inbox_ref(user_id))
            .await?
            .map(parse_document)
            .transpose()
    }

    /// Remove the Inbox Record of `user_id` if it still announces `call_id`.
    /// A newer announcement is left in place.
    pub async fn clear_inbox(&self, user_id: &str, call_id: &str) -> Result<bool> {
        self.store
            .compare_and_delete(&Self::inbox_ref(user_id), FieldGuard::equals("callId", call_id))
            .await
    }

    pub async fn watch_session(&self, channel_id: &str) -> Result<DocumentStream> {
        self.store.subscribe(&Self::session_ref(channel_id)).await
    }

    pub async fn watch_inbox(&self, user_id: &str) -> Result<DocumentStream> {
        self.store.subscribe(&Self::inbox_ref(user_id)).await
    }
}

/// A running subscription. Dropping the handle cancels it.
///
/// Cancellation is a signal, not an abort: a snapshot callback that is
/// already running finishes, even if it is the one dropping the handle.
pub struct SubscriptionHandle {
    key: String,
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn spawn<F, Fut>(key: impl Into<String>, mut stream: DocumentStream, mut on_change: F) -> Self
    where
        F: FnMut(Option<Document>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let label = key.clone();
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            scopeguard::defer! {
                debug!("Subscription {} closed", label);
            }
            loop {
                tokio::select! {
                    biased;
                    _ = &mut cancel_rx => break,
                    snapshot = stream.recv() => match snapshot {
                        Some(snapshot) => on_change(snapshot).await,
                        None => break,
                    },
                }
            }
        });
        Self {
            key,
            cancel: Some(cancel_tx),
            task,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel now; equivalent to dropping the handle.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::state::CallerType;
    use crate::store::InMemoryStore;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn make_channel() -> (Arc<InMemoryStore>, SignalingChannel) {
        let store = Arc::new(InMemoryStore::new());
        (store.clone(), SignalingChannel::new(store))
    }

    fn make_record(status: SessionStatus) -> SessionRecord {
        SessionRecord {
            channel_id: channel_id_for("alice", "bob"),
            call_id: new_call_id(),
            caller_id: "alice".into(),
            receiver_id: "bob".into(),
            caller_name: "Alice".into(),
            receiver_name: "Bob".into(),
            caller_type: CallerType::Responder,
            emergency_id: None,
            status,
            created_at: None,
            answered_at: None,
            ended_at: None,
        }
    }

    #[test]
    fn test_channel_id_is_symmetric() {
        let pairs = [
            ("alice", "bob"),
            ("uid-9", "uid-10"),
            ("Zed", "adam"),
            ("same", "same"),
            ("", "x"),
        ];
        for (a, b) in pairs {
            assert_eq!(channel_id_for(a, b), channel_id_for(b, a));
        }
        assert_eq!(channel_id_for("bob", "alice"), "alice_bob");
    }

    #[tokio::test]
    async fn test_create_session_assigns_created_at() {
        let (_, channel) = make_channel();
        let record = make_record(SessionStatus::Ringing);
        channel.create_session(&record).await.unwrap();

        let stored = channel.get_session(&record.channel_id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Ringing);
        assert!(stored.created_at.is_some());
        assert!(stored.answered_at.is_none());
    }

    #[tokio::test]
    async fn test_terminal_status_is_never_overwritten() {
        let (_, channel) = make_channel();
        let record = make_record(SessionStatus::Ringing);
        channel.create_session(&record).await.unwrap();

        assert!(
            channel
                .mark_terminal(&record.channel_id, &record.call_id, SessionStatus::Rejected)
                .await
                .unwrap()
        );
        assert!(
            !channel
                .mark_answered(&record.channel_id, &record.call_id)
                .await
                .unwrap()
        );
        assert!(
            !channel
                .mark_terminal(&record.channel_id, &record.call_id, SessionStatus::Ended)
                .await
                .unwrap()
        );

        let stored = channel.get_session(&record.channel_id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Rejected);
        assert!(stored.answered_at.is_none());
        assert!(stored.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_terminal_write_on_deleted_session_is_noop() {
        let (_, channel) = make_channel();
        assert!(
            !channel
                .mark_terminal("gone", "0000", SessionStatus::Ended)
                .await
                .unwrap()
        );
        assert!(!channel.clear_inbox("nobody", "0000").await.unwrap());
        assert!(!channel.delete_session("gone", "0000").await.unwrap());
    }

    #[test]
    fn test_call_ids_are_distinct() {
        let first = new_call_id();
        let second = new_call_id();
        assert_eq!(first.len(), 32);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_late_writes_from_previous_call_are_ignored() {
        let (_, channel) = make_channel();
        let first = make_record(SessionStatus::Active);
        channel.create_session(&first).await.unwrap();
        assert!(
            channel
                .mark_terminal(&first.channel_id, &first.call_id, SessionStatus::Ended)
                .await
                .unwrap()
        );

        // The caller redials on the same channel before the other side has
        // finished tearing down the first call.
        let second = make_record(SessionStatus::Ringing);
        assert_eq!(second.channel_id, first.channel_id);
        channel.create_session(&second).await.unwrap();
        channel
            .announce("bob", &InboxRecord::from(&second))
            .await
            .unwrap();

        assert!(
            !channel
                .mark_terminal(&first.channel_id, &first.call_id, SessionStatus::Ended)
                .await
                .unwrap()
        );
        assert!(
            !channel
                .mark_answered(&first.channel_id, &first.call_id)
                .await
                .unwrap()
        );
        assert!(!channel.clear_inbox("bob", &first.call_id).await.unwrap());
        assert!(
            !channel
                .delete_session(&first.channel_id, &first.call_id)
                .await
                .unwrap()
        );

        let stored = channel.get_session(&second.channel_id).await.unwrap().unwrap();
        assert_eq!(stored.call_id, second.call_id);
        assert_eq!(stored.status, SessionStatus::Ringing);
        let inbox = channel.get_inbox("bob").await.unwrap().unwrap();
        assert_eq!(inbox.call_id, second.call_id);

        assert!(channel.clear_inbox("bob", &second.call_id).await.unwrap());
        assert!(channel.get_inbox("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_answer_sets_answered_at_after_created_at() {
        let (_, channel) = make_channel();
        let record = make_record(SessionStatus::Ringing);
        channel.create_session(&record).await.unwrap();
        assert!(
            channel
                .mark_answered(&record.channel_id, &record.call_id)
                .await
                .unwrap()
        );

        let stored = channel.get_session(&record.channel_id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Active);
        assert!(stored.answered_at.unwrap() >= stored.created_at.unwrap());
    }

    #[tokio::test]
    async fn test_inbox_roundtrip() {
        let (_, channel) = make_channel();
        let record = make_record(SessionStatus::Ringing);
        channel
            .announce("bob", &InboxRecord::from(&record))
            .await
            .unwrap();

        let inbox = channel.get_inbox("bob").await.unwrap().unwrap();
        assert_eq!(inbox.channel_id, record.channel_id);
        assert_eq!(inbox.caller_type, CallerType::Responder);

        assert!(channel.clear_inbox("bob", &record.call_id).await.unwrap());
        assert!(channel.get_inbox("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_delivery() {
        let (store, channel) = make_channel();
        let record = make_record(SessionStatus::Ringing);
        let stream = channel.watch_session(&record.channel_id).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = SubscriptionHandle::spawn("test", stream, move |snapshot| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(snapshot.is_some());
            }
        });

        assert_eq!(rx.recv().await, Some(false));
        channel.create_session(&record).await.unwrap();
        assert_eq!(rx.recv().await, Some(true));

        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), async {
            while store.subscriber_count(&SignalingChannel::session_ref(&record.channel_id)) > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("subscription should be released");

        assert!(
            channel
                .delete_session(&record.channel_id, &record.call_id)
                .await
                .unwrap()
        );
        assert_eq!(rx.recv().await, None, "callback sender dropped with the task");
    }
}
