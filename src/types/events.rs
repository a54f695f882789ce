use crate::calls::{CallData, SessionStatus};
use tokio::sync::broadcast;

// The size of the broadcast channel buffer.
const CHANNEL_CAPACITY: usize = 100;

/// Notifications for the UI layer. The Local Session View remains the source
/// of truth; events only say that something happened.
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    /// Someone is calling us.
    Incoming(CallData),
    /// Our outgoing call is ringing on the other side.
    Outgoing(CallData),
    /// The call became active (answered locally or remotely).
    Answered { channel_id: String },
    /// Another client signed in as the same user answered the call that was
    /// ringing here. Nothing was written on our behalf.
    AnsweredElsewhere { channel_id: String },
    RemoteJoined { channel_id: String, user_id: String },
    /// Local teardown finished. `status` is the terminal status we wrote or
    /// observed.
    Ended {
        channel_id: String,
        status: SessionStatus,
    },
    MediaError { code: i32, message: String },
}

#[derive(Debug)]
pub struct EventBus {
    pub calls: broadcast::Sender<CallEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            calls: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.calls.subscribe()
    }

    /// Publish; having no listener is fine.
    pub fn dispatch(&self, event: CallEvent) {
        let _ = self.calls.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
