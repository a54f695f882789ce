use async_trait::async_trait;
use emergency_call::calls::media::{ChannelProfile, LoopbackMediaHub, MediaEngine};
use emergency_call::calls::{CallManager, MediaEngineAdapter, SignalingChannel};
use emergency_call::permissions::{PermissionGate, StaticPermissionGate};
use emergency_call::profile::{Profile, ProfileDirectory, StoreProfileDirectory};
use emergency_call::store::InMemoryStore;
use emergency_call::store::traits::DocumentStore;
use emergency_call::types::events::CallEvent;
use emergency_call::{CallManagerConfig, CallerType, LocalSessionView, SessionStatus};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;

mod test_utils {
    use super::*;

    pub(crate) struct Harness {
        pub store: Arc<InMemoryStore>,
        pub hub: LoopbackMediaHub,
        pub config: CallManagerConfig,
    }

    impl Harness {
        pub fn new(config_json: &str) -> Self {
            let _ = env_logger::builder().is_test(true).try_init();
            Self {
                store: Arc::new(InMemoryStore::new()),
                hub: LoopbackMediaHub::new(),
                config: CallManagerConfig::from_json(config_json).expect("valid config"),
            }
        }

        pub async fn manager_with(
            &self,
            user_id: &str,
            profiles: Arc<dyn ProfileDirectory>,
            permissions: Arc<dyn PermissionGate>,
        ) -> Arc<CallManager> {
            let media = MediaEngineAdapter::load(
                Some(self.hub.engine() as Arc<dyn MediaEngine>),
                &self.config.app_id,
                self.config.channel_profile,
            )
            .await;
            assert!(media.is_available());
            let manager = CallManager::new(
                self.config.clone(),
                self.store.clone(),
                profiles,
                permissions,
                media,
            );
            manager.sign_in(user_id).await.expect("sign in");
            manager
        }

        pub async fn manager(&self, user_id: &str) -> Arc<CallManager> {
            self.manager_with(
                user_id,
                Arc::new(StoreProfileDirectory::new(self.store.clone())),
                Arc::new(StaticPermissionGate::default()),
            )
            .await
        }
    }

    pub(crate) async fn wait_view<F>(manager: &CallManager, mut f: F) -> LocalSessionView
    where
        F: FnMut(&LocalSessionView) -> bool,
    {
        let mut rx = manager.watch_view();
        let view = timeout(Duration::from_secs(5), rx.wait_for(|v| f(v)))
            .await
            .expect("timed out waiting for view")
            .expect("view sender dropped");
        view.clone()
    }
}

use test_utils::{Harness, wait_view};

struct CountingGate {
    asked: AtomicUsize,
}

#[async_trait]
impl PermissionGate for CountingGate {
    async fn request_microphone_permission(&self) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        true
    }
}

struct UnreachableProfiles;

#[async_trait]
impl ProfileDirectory for UnreachableProfiles {
    async fn lookup(&self, _user_id: &str) -> Result<Option<Profile>, anyhow::Error> {
        Err(anyhow::anyhow!("profile service offline"))
    }
}

#[tokio::test]
async fn test_emergency_call_round_trip() {
    let harness = Harness::new(r#"{ "app_id": "ers", "channel_profile": "communication" }"#);
    let citizen = harness.manager("citizen-1").await;
    let responder = harness.manager("unit-12").await;
    let mut citizen_events = citizen.subscribe_events();

    let channel = citizen
        .start_call("unit-12", "Unit 12", Some("inc-2041"))
        .await
        .expect("call should start");

    let ringing = wait_view(&responder, |v| v.is_receiving_call).await;
    let data = ringing.call_data.expect("call data");
    assert_eq!(data.record.emergency_id.as_deref(), Some("inc-2041"));
    assert_eq!(data.record.caller_name, "citizen-1");
    assert_eq!(data.record.caller_type, CallerType::User);

    responder.answer_call().await.expect("answer");
    wait_view(&citizen, |v| v.is_in_call && v.remote_user_joined).await;
    assert_eq!(harness.hub.participants(&channel).len(), 2);

    responder.end_call().await;
    wait_view(&citizen, |v| v.is_idle()).await;

    let mut ended = None;
    while let Ok(Ok(event)) = timeout(Duration::from_secs(5), citizen_events.recv()).await {
        if let CallEvent::Ended { status, .. } = event {
            ended = Some(status);
            break;
        }
    }
    assert_eq!(ended, Some(SessionStatus::Ended));

    let record = SignalingChannel::new(harness.store.clone())
        .get_session(&channel)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, SessionStatus::Ended);
    assert!(record.answered_at.is_some() && record.ended_at.is_some());
    assert!(record.ended_at >= record.answered_at);

    citizen.shutdown().await;
    responder.shutdown().await;
}

#[tokio::test]
async fn test_custom_collaborators_are_used() {
    let harness = Harness::new("{}");
    let gate = Arc::new(CountingGate {
        asked: AtomicUsize::new(0),
    });
    let caller = harness
        .manager_with("alice", Arc::new(UnreachableProfiles), gate.clone())
        .await;
    let receiver = harness.manager("bob").await;

    caller.start_call("bob", "Bob", None).await.unwrap();
    let view = wait_view(&receiver, |v| v.is_receiving_call).await;

    // Lookup failure falls back to the user id.
    assert_eq!(view.call_data.unwrap().record.caller_name, "alice");
    assert_eq!(gate.asked.load(Ordering::SeqCst), 1);

    receiver.reject_call().await.unwrap();
    wait_view(&caller, |v| v.is_idle()).await;
}

#[tokio::test]
async fn test_configured_ring_timeout_ends_unanswered_call() {
    let harness = Harness::new(r#"{ "ring_timeout": 1 }"#);
    assert_eq!(harness.config.ring_timeout, Some(Duration::from_secs(1)));
    assert_eq!(harness.config.channel_profile, ChannelProfile::Communication);
    let caller = harness.manager("alice").await;
    let receiver = harness.manager("bob").await;

    let channel = caller.start_call("bob", "Bob", None).await.unwrap();
    wait_view(&receiver, |v| v.is_receiving_call).await;

    wait_view(&caller, |v| v.is_idle()).await;
    wait_view(&receiver, |v| v.is_idle()).await;
    let record = harness
        .store
        .get(&SignalingChannel::session_ref(&channel))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record["status"], "missed");
}
