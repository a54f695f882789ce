//! Voice call signaling over a shared document store.
//!
//! Two clients agree on call state using only document writes and change
//! notifications. There is no direct channel between them before media is
//! set up.
//!
//! # Architecture
//!
//! - [`SignalingChannel`]: typed Session/Inbox Record access and subscriptions
//! - [`LocalSessionView`] & [`SessionRecord`]: local projection and shared record
//! - [`CallManager`]: the session state machine driving signaling and media
//! - [`IncomingCallDetector`]: turns inbox announcements into ringing calls
//! - [`MediaEngineAdapter`]: guards the optional native audio engine
//!
//! # Lifecycle
//!
//! Caller: `Idle → Calling → Active → Idle`. Receiver:
//! `Idle → Receiving → Active → Idle`. Any non-idle state returns to idle on
//! hang-up, rejection, remote termination or loss of the remote media peer.
//!
//! A pair of users always meets on the same channel id; each call on it gets
//! its own call id, carried in both records.

mod error;
mod handler;
mod manager;
pub mod media;
pub mod signaling;
mod state;

pub use error::CallError;
pub use handler::IncomingCallDetector;
pub use manager::CallManager;
pub use media::{MediaEngine, MediaEngineAdapter, MediaError, MediaEvent};
pub use signaling::{SignalingChannel, SubscriptionHandle, channel_id_for, new_call_id};
pub use state::{
    CallData, CallPhase, CallerType, InboxRecord, InvalidTransition, LocalSessionView,
    SessionRecord, SessionStatus, ViewTransition,
};
