//! Availability-aware wrapper around a [`MediaEngine`].

use super::engine::{ChannelProfile, MediaEngine, MediaError, MediaEvent};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Wraps an engine that may be missing at runtime.
///
/// Availability is decided once by [`MediaEngineAdapter::load`]. An
/// unavailable adapter refuses to join and treats every other call as a
/// no-op, so callers never need to special-case a missing engine outside of
/// the join path.
pub struct MediaEngineAdapter {
    engine: Option<Arc<dyn MediaEngine>>,
    joined: AtomicBool,
    events: Mutex<Option<mpsc::UnboundedReceiver<MediaEvent>>>,
}

impl MediaEngineAdapter {
    /// An adapter with no engine behind it.
    pub fn unavailable() -> Self {
        Self {
            engine: None,
            joined: AtomicBool::new(false),
            events: Mutex::new(None),
        }
    }

    /// Register for events and initialize `engine`. An engine that is absent
    /// or fails to initialize yields an unavailable adapter.
    pub async fn load(
        engine: Option<Arc<dyn MediaEngine>>,
        app_id: &str,
        profile: ChannelProfile,
    ) -> Self {
        let Some(engine) = engine else {
            warn!("Media engine library not loaded; calling disabled");
            return Self::unavailable();
        };

        let (tx, rx) = mpsc::unbounded_channel();
        engine.register_events(tx);

        if let Err(e) = engine.initialize(app_id, profile).await {
            warn!("Media engine failed to initialize: {}", e);
            engine.release().await;
            return Self::unavailable();
        }

        info!("Media engine initialized ({:?})", profile);
        Self {
            engine: Some(engine),
            joined: AtomicBool::new(false),
            events: Mutex::new(Some(rx)),
        }
    }

    pub fn is_available(&self) -> bool {
        self.engine.is_some()
    }

    pub fn is_joined(&self) -> bool {
        self.joined.load(Ordering::Acquire)
    }

    /// Hand over the event stream. Only the first caller gets it.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<MediaEvent>> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    pub async fn join(&self, channel: &str, local_user_id: &str) -> Result<(), MediaError> {
        let engine = self.engine.as_ref().ok_or(MediaError::Unavailable)?;
        engine.join(channel, local_user_id).await?;
        self.joined.store(true, Ordering::Release);
        debug!("Joined media channel {} as {}", channel, local_user_id);
        Ok(())
    }

    /// Leave the current channel, if any.
    pub async fn leave(&self) -> Result<(), MediaError> {
        let Some(engine) = self.engine.as_ref() else {
            return Ok(());
        };
        if !self.joined.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        engine.leave().await
    }

    /// Returns `Ok(false)` when there is no engine to apply the setting to.
    pub async fn mute_local(&self, muted: bool) -> Result<bool, MediaError> {
        match self.engine.as_ref() {
            Some(engine) => engine.mute_local(muted).await.map(|_| true),
            None => Ok(false),
        }
    }

    /// Returns `Ok(false)` when there is no engine to apply the setting to.
    pub async fn set_speakerphone(&self, enabled: bool) -> Result<bool, MediaError> {
        match self.engine.as_ref() {
            Some(engine) => engine.set_speakerphone(enabled).await.map(|_| true),
            None => Ok(false),
        }
    }

    pub async fn release(&self) {
        if let Some(engine) = self.engine.as_ref() {
            if let Err(e) = self.leave().await {
                warn!("Leaving media channel during release failed: {}", e);
            }
            engine.release().await;
        }
    }
}
