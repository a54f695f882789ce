//! Incoming call detection.

use super::manager::CallManager;
use super::signaling::{SignalingChannel, SubscriptionHandle, parse_document};
use super::state::{InboxRecord, SessionStatus};
use crate::store::error::Result;
use crate::store::traits::Document;
use log::{debug, trace, warn};
use std::sync::Weak;

/// Watches the signed-in user's Inbox Record for the lifetime of the session
/// and hands ringing announcements to the [`CallManager`].
///
/// An absent inbox is not acted on: clearing a ringing call is driven by the
/// Session Record, not by the announcement disappearing.
pub struct IncomingCallDetector {
    user_id: String,
    _subscription: SubscriptionHandle,
}

impl IncomingCallDetector {
    pub async fn start(
        manager: Weak<CallManager>,
        signaling: &SignalingChannel,
        user_id: &str,
    ) -> Result<Self> {
        let stream = signaling.watch_inbox(user_id).await?;
        let subscription = SubscriptionHandle::spawn(
            SignalingChannel::inbox_ref(user_id).to_string(),
            stream,
            move |snapshot| {
                let manager = manager.clone();
                async move {
                    if let Some(manager) = manager.upgrade() {
                        Self::on_inbox_snapshot(&manager, snapshot).await;
                    }
                }
            },
        );
        debug!("Watching incoming calls for {}", user_id);
        Ok(Self {
            user_id: user_id.to_string(),
            _subscription: subscription,
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    async fn on_inbox_snapshot(manager: &CallManager, snapshot: Option<Document>) {
        let Some(doc) = snapshot else {
            trace!("Inbox empty");
            return;
        };
        let inbox: InboxRecord = match parse_document(doc) {
            Ok(inbox) => inbox,
            Err(e) => {
                warn!("Ignoring malformed inbox record: {}", e);
                return;
            }
        };
        if inbox.status != SessionStatus::Ringing {
            debug!(
                "Inbox for {} is {}, not ringing",
                inbox.channel_id, inbox.status
            );
            return;
        }
        if !manager.view().is_idle() {
            debug!(
                "Already in a call; not surfacing {} from {}",
                inbox.channel_id, inbox.caller_id
            );
            return;
        }
        manager.receive_incoming(inbox).await;
    }
}
