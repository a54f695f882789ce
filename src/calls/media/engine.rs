//! Capability interface of the real-time audio engine.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;

/// Channel profile requested at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelProfile {
    /// One-to-one voice.
    #[default]
    Communication,
    LiveBroadcasting,
}

/// Why a remote participant left the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteLeaveReason {
    /// The peer left the channel on purpose.
    Quit,
    /// The peer stopped responding.
    Dropped,
}

/// Events delivered by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    RemoteJoined {
        user_id: String,
    },
    RemoteLeft {
        user_id: String,
        reason: RemoteLeaveReason,
    },
    Error {
        code: i32,
        message: String,
    },
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media engine unavailable")]
    Unavailable,

    #[error("media engine not initialized")]
    NotInitialized,

    #[error("failed to join channel {channel}: {reason}")]
    Join { channel: String, reason: String },

    #[error("engine error {code}: {message}")]
    Engine { code: i32, message: String },
}

/// A native real-time audio engine.
///
/// Implementations push [`MediaEvent`]s into the sink handed to
/// [`MediaEngine::register_events`]; the sink may be closed at any time.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn initialize(&self, app_id: &str, profile: ChannelProfile) -> Result<(), MediaError>;

    fn register_events(&self, sink: mpsc::UnboundedSender<MediaEvent>);

    async fn join(&self, channel: &str, local_user_id: &str) -> Result<(), MediaError>;

    async fn leave(&self) -> Result<(), MediaError>;

    async fn mute_local(&self, muted: bool) -> Result<(), MediaError>;

    async fn set_speakerphone(&self, enabled: bool) -> Result<(), MediaError>;

    /// Release native resources. The engine is unusable afterwards.
    async fn release(&self);
}
