//! Call-related error types.

use super::media::MediaError;
use crate::store::StoreError;
use thiserror::Error;

/// Outcome of a failed call operation, reported to the UI layer.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("not signed in")]
    NotAuthenticated,

    #[error("media engine unavailable")]
    MediaUnavailable,

    #[error("microphone permission denied")]
    PermissionDenied,

    #[error("signaling write failed: {0}")]
    SignalingWriteFailed(#[from] StoreError),

    #[error("failed to join media channel: {0}")]
    EngineJoinFailed(#[source] MediaError),

    #[error("already in a call")]
    AlreadyInCall,

    #[error("no incoming call")]
    NoIncomingCall,

    #[error("call {0} is no longer available")]
    CallGone(String),
}
