//! In-process media engine.
//!
//! Engines created from the same [`LoopbackMediaHub`] see each other join and
//! leave channels, which is enough to drive the presence events the call
//! state machine reacts to. No audio is carried.

use super::engine::{ChannelProfile, MediaEngine, MediaError, MediaEvent, RemoteLeaveReason};
use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

type Sink = mpsc::UnboundedSender<MediaEvent>;

#[derive(Default)]
struct HubState {
    /// channel -> (user id -> that engine's event sink)
    channels: HashMap<String, HashMap<String, Option<Sink>>>,
}

/// Shared "network" for loopback engines.
#[derive(Clone, Default)]
pub struct LoopbackMediaHub {
    state: Arc<Mutex<HubState>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn notify(sink: &Option<Sink>, event: MediaEvent) {
    if let Some(sink) = sink {
        let _ = sink.send(event);
    }
}

impl LoopbackMediaHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engine(&self) -> Arc<LoopbackEngine> {
        Arc::new(LoopbackEngine {
            hub: self.clone(),
            sink: Mutex::new(None),
            joined: Mutex::new(None),
            initialized: AtomicBool::new(false),
            muted: AtomicBool::new(false),
            speaker: AtomicBool::new(false),
            fail_initialize: AtomicBool::new(false),
            fail_join: AtomicBool::new(false),
        })
    }

    /// Users currently in `channel`, sorted.
    pub fn participants(&self, channel: &str) -> Vec<String> {
        let state = lock(&self.state);
        let mut users: Vec<String> = state
            .channels
            .get(channel)
            .map(|members| members.keys().cloned().collect())
            .unwrap_or_default();
        users.sort();
        users
    }

    /// Simulate `user_id` losing connectivity: it is removed from every
    /// channel and the remaining members are told it dropped.
    pub fn drop_user(&self, user_id: &str) {
        let mut state = lock(&self.state);
        for members in state.channels.values_mut() {
            if members.remove(user_id).is_some() {
                for sink in members.values() {
                    notify(
                        sink,
                        MediaEvent::RemoteLeft {
                            user_id: user_id.to_string(),
                            reason: RemoteLeaveReason::Dropped,
                        },
                    );
                }
            }
        }
        state.channels.retain(|_, members| !members.is_empty());
    }

    fn join(&self, channel: &str, user_id: &str, sink: Option<Sink>) {
        let mut state = lock(&self.state);
        let members = state.channels.entry(channel.to_string()).or_default();
        for (other, other_sink) in members.iter() {
            if other == user_id {
                continue;
            }
            notify(
                other_sink,
                MediaEvent::RemoteJoined {
                    user_id: user_id.to_string(),
                },
            );
            notify(
                &sink,
                MediaEvent::RemoteJoined {
                    user_id: other.clone(),
                },
            );
        }
        members.insert(user_id.to_string(), sink);
    }

    fn leave(&self, channel: &str, user_id: &str) {
        let mut state = lock(&self.state);
        let Some(members) = state.channels.get_mut(channel) else {
            return;
        };
        if members.remove(user_id).is_none() {
            return;
        }
        for sink in members.values() {
            notify(
                sink,
                MediaEvent::RemoteLeft {
                    user_id: user_id.to_string(),
                    reason: RemoteLeaveReason::Quit,
                },
            );
        }
        if members.is_empty() {
            state.channels.remove(channel);
        }
    }
}

pub struct LoopbackEngine {
    hub: LoopbackMediaHub,
    sink: Mutex<Option<Sink>>,
    /// (channel, local user id)
    joined: Mutex<Option<(String, String)>>,
    initialized: AtomicBool,
    muted: AtomicBool,
    speaker: AtomicBool,
    fail_initialize: AtomicBool,
    fail_join: AtomicBool,
}

impl LoopbackEngine {
    /// Make `initialize` fail, as if the native library were broken.
    pub fn fail_initialize(&self, fail: bool) {
        self.fail_initialize.store(fail, Ordering::SeqCst);
    }

    /// Make `join` fail.
    pub fn fail_join(&self, fail: bool) {
        self.fail_join.store(fail, Ordering::SeqCst);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    pub fn is_speaker_on(&self) -> bool {
        self.speaker.load(Ordering::SeqCst)
    }

    pub fn joined_channel(&self) -> Option<String> {
        lock(&self.joined).as_ref().map(|(channel, _)| channel.clone())
    }

    /// Emit an engine error event.
    pub fn raise_error(&self, code: i32, message: &str) {
        notify(
            &lock(&self.sink),
            MediaEvent::Error {
                code,
                message: message.to_string(),
            },
        );
    }
}

#[async_trait]
impl MediaEngine for LoopbackEngine {
    async fn initialize(&self, app_id: &str, profile: ChannelProfile) -> Result<(), MediaError> {
        if self.fail_initialize.load(Ordering::SeqCst) {
            return Err(MediaError::Engine {
                code: -1,
                message: "native library failed to load".into(),
            });
        }
        debug!("Loopback engine initialized for app {} ({:?})", app_id, profile);
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn register_events(&self, sink: mpsc::UnboundedSender<MediaEvent>) {
        *lock(&self.sink) = Some(sink);
    }

    async fn join(&self, channel: &str, local_user_id: &str) -> Result<(), MediaError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(MediaError::NotInitialized);
        }
        if self.fail_join.load(Ordering::SeqCst) {
            return Err(MediaError::Join {
                channel: channel.to_string(),
                reason: "join rejected".into(),
            });
        }
        let previous = lock(&self.joined).replace((channel.to_string(), local_user_id.to_string()));
        if let Some((old_channel, old_user)) = previous {
            self.hub.leave(&old_channel, &old_user);
        }
        let sink = lock(&self.sink).clone();
        self.hub.join(channel, local_user_id, sink);
        Ok(())
    }

    async fn leave(&self) -> Result<(), MediaError> {
        let joined = lock(&self.joined).take();
        if let Some((channel, user)) = joined {
            self.hub.leave(&channel, &user);
        }
        Ok(())
    }

    async fn mute_local(&self, muted: bool) -> Result<(), MediaError> {
        self.muted.store(muted, Ordering::SeqCst);
        Ok(())
    }

    async fn set_speakerphone(&self, enabled: bool) -> Result<(), MediaError> {
        self.speaker.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    async fn release(&self) {
        let _ = self.leave().await;
        self.initialized.store(false, Ordering::SeqCst);
        lock(&self.sink).take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn joined_engine(
        hub: &LoopbackMediaHub,
        channel: &str,
        user: &str,
    ) -> (Arc<LoopbackEngine>, mpsc::UnboundedReceiver<MediaEvent>) {
        let engine = hub.engine();
        let (tx, rx) = mpsc::unbounded_channel();
        engine.register_events(tx);
        engine
            .initialize("app", ChannelProfile::Communication)
            .await
            .unwrap();
        engine.join(channel, user).await.unwrap();
        (engine, rx)
    }

    #[tokio::test]
    async fn test_peers_see_each_other_join_and_leave() {
        let hub = LoopbackMediaHub::new();
        let (_alice, mut alice_rx) = joined_engine(&hub, "a_b", "alice").await;
        let (bob, mut bob_rx) = joined_engine(&hub, "a_b", "bob").await;

        assert_eq!(
            alice_rx.recv().await.unwrap(),
            MediaEvent::RemoteJoined {
                user_id: "bob".into()
            }
        );
        assert_eq!(
            bob_rx.recv().await.unwrap(),
            MediaEvent::RemoteJoined {
                user_id: "alice".into()
            }
        );

        bob.leave().await.unwrap();
        assert_eq!(
            alice_rx.recv().await.unwrap(),
            MediaEvent::RemoteLeft {
                user_id: "bob".into(),
                reason: RemoteLeaveReason::Quit
            }
        );
        assert_eq!(hub.participants("a_b"), vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_drop_user_reports_dropped() {
        let hub = LoopbackMediaHub::new();
        let (_alice, mut alice_rx) = joined_engine(&hub, "a_b", "alice").await;
        let (_bob, _bob_rx) = joined_engine(&hub, "a_b", "bob").await;
        alice_rx.recv().await.unwrap();

        hub.drop_user("bob");
        assert_eq!(
            alice_rx.recv().await.unwrap(),
            MediaEvent::RemoteLeft {
                user_id: "bob".into(),
                reason: RemoteLeaveReason::Dropped
            }
        );
    }

    #[tokio::test]
    async fn test_join_requires_initialize() {
        let hub = LoopbackMediaHub::new();
        let engine = hub.engine();
        assert!(matches!(
            engine.join("a_b", "alice").await,
            Err(MediaError::NotInitialized)
        ));
        assert!(hub.participants("a_b").is_empty());
    }
}
