//! Call manager: the per-client session state machine.
//!
//! Every entry point (user action, Session Record notification, media event,
//! ring deadline) runs under one async mutex, so the Local Session View is
//! only ever mutated by one handler at a time. Remote handlers are written
//! as functions of the latest observed Session Record, never of local
//! history, which keeps both parties convergent under reordering and
//! duplicate delivery.
//!
//! Two users always share the same channel id, so every call also carries a
//! call id. Notifications, timers and writes are tied to the call id they were
//! created for, and anything addressed to a different call is dropped.

use super::error::CallError;
use super::handler::IncomingCallDetector;
use super::media::{MediaEngineAdapter, MediaEvent};
use super::signaling::{
    SignalingChannel, SubscriptionHandle, channel_id_for, new_call_id, parse_document,
};
use super::state::{
    CallData, CallPhase, CallerType, InboxRecord, LocalSessionView, SessionRecord, SessionStatus,
    ViewTransition,
};
use crate::config::CallManagerConfig;
use crate::permissions::PermissionGate;
use crate::profile::{Profile, ProfileDirectory};
use crate::store::traits::{Document, DocumentStore, DocumentStream};
use crate::types::events::{CallEvent, EventBus};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, Weak};
use tokio::sync::{Mutex, RwLock, broadcast, watch};
use tokio::task::JoinHandle;

fn lock<T>(m: &StdMutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Manages the call lifecycle for one signed-in client.
pub struct CallManager {
    config: CallManagerConfig,
    signaling: SignalingChannel,
    profiles: Arc<dyn ProfileDirectory>,
    permissions: Arc<dyn PermissionGate>,
    media: MediaEngineAdapter,
    /// Signed-in user id.
    user: RwLock<Option<String>>,
    view: watch::Sender<LocalSessionView>,
    events: EventBus,
    /// Serializes all handlers.
    op_lock: Mutex<()>,
    session_subscription: StdMutex<Option<SubscriptionHandle>>,
    detector: StdMutex<Option<IncomingCallDetector>>,
    ring_timer: StdMutex<Option<JoinHandle<()>>>,
    media_pump: StdMutex<Option<JoinHandle<()>>>,
    self_ref: Weak<CallManager>,
}

impl CallManager {
    /// Create a call manager. `media` should come from
    /// [`MediaEngineAdapter::load`]; its event stream is consumed here.
    pub fn new(
        config: CallManagerConfig,
        store: Arc<dyn DocumentStore>,
        profiles: Arc<dyn ProfileDirectory>,
        permissions: Arc<dyn PermissionGate>,
        media: MediaEngineAdapter,
    ) -> Arc<Self> {
        let manager = Arc::new_cyclic(|self_ref| Self {
            config,
            signaling: SignalingChannel::new(store),
            profiles,
            permissions,
            media,
            user: RwLock::new(None),
            view: watch::channel(LocalSessionView::default()).0,
            events: EventBus::new(),
            op_lock: Mutex::new(()),
            session_subscription: StdMutex::new(None),
            detector: StdMutex::new(None),
            ring_timer: StdMutex::new(None),
            media_pump: StdMutex::new(None),
            self_ref: self_ref.clone(),
        });

        if let Some(mut events) = manager.media.take_events() {
            let weak = Arc::downgrade(&manager);
            let pump = tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    let Some(manager) = weak.upgrade() else {
                        break;
                    };
                    manager.on_media_event(event).await;
                }
                debug!("Media event pump stopped");
            });
            *lock(&manager.media_pump) = Some(pump);
        }

        manager
    }

    // -- read-only surface -------------------------------------------------

    pub fn view(&self) -> LocalSessionView {
        self.view.borrow().clone()
    }

    /// Receiver that observes every change of the Local Session View.
    pub fn watch_view(&self) -> watch::Receiver<LocalSessionView> {
        self.view.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    pub fn is_media_available(&self) -> bool {
        self.media.is_available()
    }

    pub async fn current_user(&self) -> Option<String> {
        self.user.read().await.clone()
    }

    pub fn config(&self) -> &CallManagerConfig {
        &self.config
    }

    // -- session lifetime --------------------------------------------------

    /// Attach the manager to `user_id` and start listening for incoming calls.
    pub async fn sign_in(&self, user_id: &str) -> Result<(), CallError> {
        let _op = self.op_lock.lock().await;

        let previous = self.user.read().await.clone();
        if previous.as_deref().is_some_and(|p| p != user_id) {
            self.teardown(SessionStatus::Ended, None).await;
        }

        let detector =
            IncomingCallDetector::start(self.self_ref.clone(), &self.signaling, user_id).await?;
        *self.user.write().await = Some(user_id.to_string());
        // Replacing drops (and so cancels) the previous detector.
        *lock(&self.detector) = Some(detector);

        info!("Signed in as {}", user_id);
        Ok(())
    }

    /// End any call, stop listening for incoming calls and forget the user.
    pub async fn sign_out(&self) {
        let _op = self.op_lock.lock().await;
        if !self.is_idle() {
            self.teardown(SessionStatus::Ended, None).await;
        }
        lock(&self.detector).take();
        if let Some(user) = self.user.write().await.take() {
            info!("Signed out {}", user);
        }
    }

    /// Sign out and release the media engine. Call once on process exit.
    pub async fn shutdown(&self) {
        self.sign_out().await;
        self.media.release().await;
        if let Some(pump) = lock(&self.media_pump).take() {
            pump.abort();
        }
    }

    // -- user actions ------------------------------------------------------

    /// Start an outgoing call and return its channel id.
    ///
    /// Preconditions are checked in order (signed in, not already in a
    /// call, media engine available, microphone granted) and the first
    /// failure returns before anything is written.
    pub async fn start_call(
        &self,
        receiver_id: &str,
        receiver_name: &str,
        emergency_id: Option<&str>,
    ) -> Result<String, CallError> {
        let _op = self.op_lock.lock().await;

        let caller_id = self.current_user().await.ok_or(CallError::NotAuthenticated)?;
        if !self.is_idle() {
            return Err(CallError::AlreadyInCall);
        }
        if !self.media.is_available() {
            return Err(CallError::MediaUnavailable);
        }
        if !self.permissions.request_microphone_permission().await {
            return Err(CallError::PermissionDenied);
        }

        let channel_id = channel_id_for(&caller_id, receiver_id);
        let caller = self.resolve_profile(&caller_id).await;
        let call_id = new_call_id();
        let record = SessionRecord {
            channel_id: channel_id.clone(),
            call_id: call_id.clone(),
            caller_id: caller_id.clone(),
            receiver_id: receiver_id.to_string(),
            caller_name: caller.display_name,
            receiver_name: receiver_name.to_string(),
            caller_type: caller.caller_type,
            emergency_id: emergency_id.map(str::to_string),
            status: SessionStatus::Ringing,
            created_at: None,
            answered_at: None,
            ended_at: None,
        };

        if let Err(e) = self.signaling.create_session(&record).await {
            warn!("Failed to create session {}: {}", channel_id, e);
            return Err(e.into());
        }
        if let Err(e) = self
            .signaling
            .announce(receiver_id, &InboxRecord::from(&record))
            .await
        {
            warn!("Failed to announce call {} to {}: {}", channel_id, receiver_id, e);
            self.discard_session(&channel_id, &call_id, None).await;
            return Err(e.into());
        }
        let stream = match self.signaling.watch_session(&channel_id).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to subscribe to session {}: {}", channel_id, e);
                self.discard_session(&channel_id, &call_id, Some(receiver_id)).await;
                return Err(e.into());
            }
        };
        self.install_session_subscription(&channel_id, &call_id, stream);

        let data = CallData::outgoing(record);
        self.transition(ViewTransition::Dialed(data.clone()));

        if let Err(e) = self.media.join(&channel_id, &caller_id).await {
            warn!("Failed to join media channel {}: {}", channel_id, e);
            self.teardown(SessionStatus::Ended, None).await;
            return Err(CallError::EngineJoinFailed(e));
        }

        self.arm_ring_timer(&channel_id, &call_id);
        info!(
            "Calling {} on channel {} (call {}){}",
            receiver_id,
            channel_id,
            call_id,
            emergency_id
                .map(|id| format!(" (emergency {id})"))
                .unwrap_or_default()
        );
        self.events.dispatch(CallEvent::Outgoing(data));
        Ok(channel_id)
    }

    /// Answer the call that is currently ringing.
    pub async fn answer_call(&self) -> Result<(), CallError> {
        let _op = self.op_lock.lock().await;

        let data = {
            let view = self.view.borrow();
            if !view.is_receiving_call {
                return Err(CallError::NoIncomingCall);
            }
            view.call_data.clone()
        }
        .ok_or(CallError::NoIncomingCall)?;
        let user = self.current_user().await.ok_or(CallError::NotAuthenticated)?;
        if !self.permissions.request_microphone_permission().await {
            return Err(CallError::PermissionDenied);
        }
        if !self.media.is_available() {
            return Err(CallError::MediaUnavailable);
        }

        let channel_id = data.channel_id().to_string();
        let call_id = data.call_id().to_string();
        match self.signaling.mark_answered(&channel_id, &call_id).await {
            Ok(true) => {}
            Ok(false) => {
                info!("Call {} ended before it could be answered", channel_id);
                self.teardown(SessionStatus::Ended, None).await;
                self.resurface_incoming().await;
                return Err(CallError::CallGone(channel_id));
            }
            Err(e) => {
                warn!("Failed to answer call {}: {}", channel_id, e);
                return Err(e.into());
            }
        }

        self.ensure_session_subscription(&channel_id, &call_id).await;
        self.transition(ViewTransition::LocalAnswered);
        if let Err(e) = self.signaling.clear_inbox(&user, &call_id).await {
            warn!("Failed to clear inbox of {}: {}", user, e);
        }

        if let Err(e) = self.media.join(&channel_id, &user).await {
            warn!("Failed to join media channel {}: {}", channel_id, e);
            self.teardown(SessionStatus::Ended, None).await;
            return Err(CallError::EngineJoinFailed(e));
        }

        info!("Answered call {} from {}", channel_id, data.peer_id());
        self.events.dispatch(CallEvent::Answered { channel_id });
        Ok(())
    }

    /// Hang up from any state. Never fails; backend errors are logged.
    pub async fn end_call(&self) {
        let _op = self.op_lock.lock().await;
        if self.is_idle() {
            debug!("end_call with no call in progress");
            return;
        }
        self.teardown(SessionStatus::Ended, None).await;
        self.resurface_incoming().await;
    }

    /// Decline the call that is currently ringing.
    pub async fn reject_call(&self) -> Result<(), CallError> {
        let _op = self.op_lock.lock().await;
        if !self.view.borrow().is_receiving_call {
            return Err(CallError::NoIncomingCall);
        }
        let user = self.current_user().await;
        self.teardown(SessionStatus::Rejected, user.as_deref()).await;
        self.resurface_incoming().await;
        Ok(())
    }

    /// Flip local mute. Returns the resulting state.
    pub async fn toggle_mute(&self) -> bool {
        let _op = self.op_lock.lock().await;
        let muted = !self.view.borrow().is_muted;
        match self.media.mute_local(muted).await {
            Ok(true) => {
                self.transition(ViewTransition::MuteChanged(muted));
            }
            Ok(false) => debug!("No media engine; mute ignored"),
            Err(e) => warn!("Failed to change mute: {}", e),
        }
        self.view.borrow().is_muted
    }

    /// Flip speakerphone routing. Returns the resulting state.
    pub async fn toggle_speaker(&self) -> bool {
        let _op = self.op_lock.lock().await;
        let enabled = !self.view.borrow().is_speaker_on;
        match self.media.set_speakerphone(enabled).await {
            Ok(true) => {
                self.transition(ViewTransition::SpeakerChanged(enabled));
            }
            Ok(false) => debug!("No media engine; speaker ignored"),
            Err(e) => warn!("Failed to change speaker route: {}", e),
        }
        self.view.borrow().is_speaker_on
    }

    // -- remote observation ------------------------------------------------

    /// Called by the Incoming Call Detector for a ringing Inbox Record.
    pub(crate) async fn receive_incoming(&self, inbox: InboxRecord) {
        let _op = self.op_lock.lock().await;
        self.surface_incoming(inbox).await;
    }

    async fn surface_incoming(&self, inbox: InboxRecord) {
        if !self.is_idle() {
            debug!("Busy; ignoring incoming call {}", inbox.channel_id);
            return;
        }
        let Some(user) = self.current_user().await else {
            return;
        };

        // Terminal decisions come from the Session Record, not the inbox copy.
        let record = match self.signaling.get_session(&inbox.channel_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!("Inbox points at missing session {}", inbox.channel_id);
                return;
            }
            Err(e) => {
                warn!("Failed to read session {}: {}", inbox.channel_id, e);
                return;
            }
        };
        if record.status != SessionStatus::Ringing {
            debug!(
                "Session {} is {}, not ringing; ignoring inbox",
                record.channel_id, record.status
            );
            return;
        }
        if record.call_id != inbox.call_id {
            debug!(
                "Inbox announces call {} but session {} holds call {}",
                inbox.call_id, record.channel_id, record.call_id
            );
            return;
        }
        if record.receiver_id != user {
            warn!(
                "Session {} is addressed to {}, not {}",
                record.channel_id, record.receiver_id, user
            );
            return;
        }

        let stream = match self.signaling.watch_session(&record.channel_id).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to subscribe to session {}: {}", record.channel_id, e);
                return;
            }
        };
        self.install_session_subscription(&record.channel_id, &record.call_id, stream);

        let data = CallData::incoming(record);
        self.transition(ViewTransition::IncomingRang(data.clone()));
        info!(
            "Incoming call {} from {} ({:?})",
            data.channel_id(),
            data.record.caller_name,
            data.record.caller_type
        );
        self.events.dispatch(CallEvent::Incoming(data));
    }

    /// Pick up an announcement that arrived while this client was busy. The
    /// detector drops those, so this runs whenever a call ends.
    async fn resurface_incoming(&self) {
        let Some(user) = self.current_user().await else {
            return;
        };
        match self.signaling.get_inbox(&user).await {
            Ok(Some(inbox)) if inbox.status == SessionStatus::Ringing => {
                debug!("Inbox of {} still announces {}", user, inbox.channel_id);
                self.surface_incoming(inbox).await;
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to read inbox of {}: {}", user, e),
        }
    }

    async fn on_session_snapshot(
        &self,
        channel_id: &str,
        call_id: &str,
        snapshot: Option<Document>,
    ) {
        let _op = self.op_lock.lock().await;
        let current = self.view.borrow().call_id() == Some(call_id);
        if !current {
            debug!("Ignoring stale notification for call {} on {}", call_id, channel_id);
            return;
        }

        let record = match snapshot.map(parse_document::<SessionRecord>).transpose() {
            Ok(record) => record,
            Err(e) => {
                warn!("Ignoring malformed session {}: {}", channel_id, e);
                return;
            }
        };

        match record {
            None => {
                info!("Session {} was deleted", channel_id);
                self.teardown(SessionStatus::Ended, None).await;
            }
            Some(record) if record.call_id != call_id => {
                info!(
                    "Session {} now holds call {}; dropping call {}",
                    channel_id, record.call_id, call_id
                );
                if let Some(data) = self.abandon().await {
                    self.events.dispatch(CallEvent::Ended {
                        channel_id: data.record.channel_id,
                        status: SessionStatus::Ended,
                    });
                }
            }
            Some(record) if record.status.is_terminal() => {
                info!("Session {} is {}", channel_id, record.status);
                self.teardown(record.status, None).await;
            }
            Some(record)
                if record.status == SessionStatus::Active
                    && self.view.borrow().phase() == CallPhase::Receiving =>
            {
                // Only the receiver moves a call to active, and this client
                // has not answered, so another client of the same user did.
                info!("Call {} was answered elsewhere", channel_id);
                if self.abandon().await.is_some() {
                    self.events.dispatch(CallEvent::AnsweredElsewhere {
                        channel_id: channel_id.to_string(),
                    });
                }
            }
            Some(record) if record.status == SessionStatus::Active => {
                let was_in_call = self.view.borrow().is_in_call;
                self.cancel_ring_timer();
                self.transition(ViewTransition::RemoteAnswered);
                self.transition(ViewTransition::RecordObserved(record));
                if !was_in_call {
                    info!("Call {} answered", channel_id);
                    self.events.dispatch(CallEvent::Answered {
                        channel_id: channel_id.to_string(),
                    });
                }
            }
            Some(record) => {
                self.transition(ViewTransition::RecordObserved(record));
            }
        }

        if self.is_idle() {
            self.resurface_incoming().await;
        }
    }

    async fn on_media_event(&self, event: MediaEvent) {
        let _op = self.op_lock.lock().await;
        let Some(data) = self.view.borrow().call_data.clone() else {
            debug!("Media event with no call: {:?}", event);
            return;
        };

        match event {
            MediaEvent::RemoteJoined { user_id } => {
                if user_id != data.peer_id() {
                    debug!("Ignoring join of {} on {}", user_id, data.channel_id());
                    return;
                }
                if self.transition(ViewTransition::RemoteJoined) {
                    debug!("{} joined media on {}", user_id, data.channel_id());
                    self.events.dispatch(CallEvent::RemoteJoined {
                        channel_id: data.channel_id().to_string(),
                        user_id,
                    });
                }
            }
            MediaEvent::RemoteLeft { user_id, reason } => {
                if user_id != data.peer_id() {
                    debug!("Ignoring leave of {} on {}", user_id, data.channel_id());
                    return;
                }
                let phase = self.view.borrow().phase();
                match phase {
                    CallPhase::Active => {
                        info!(
                            "{} left media on {} ({:?}); ending call",
                            user_id,
                            data.channel_id(),
                            reason
                        );
                        self.teardown(SessionStatus::Ended, None).await;
                        self.resurface_incoming().await;
                    }
                    // The peer has not answered this call, so its presence
                    // was left over from an earlier call on the channel.
                    CallPhase::Calling => {
                        debug!(
                            "{} left {} before answering call {}",
                            user_id,
                            data.channel_id(),
                            data.call_id()
                        );
                        self.transition(ViewTransition::RemoteLeft);
                    }
                    CallPhase::Receiving | CallPhase::Idle => {
                        debug!("Ignoring leave of {} while {:?}", user_id, phase);
                    }
                }
            }
            MediaEvent::Error { code, message } => {
                warn!("Media engine error {}: {}", code, message);
                self.events.dispatch(CallEvent::MediaError { code, message });
            }
        }
    }

    async fn on_ring_timeout(&self, channel_id: &str, call_id: &str) {
        let _op = self.op_lock.lock().await;
        let still_ringing = {
            let view = self.view.borrow();
            view.is_calling && view.call_id() == Some(call_id)
        };
        if !still_ringing {
            return;
        }
        // Detach rather than abort: this task is the timer.
        lock(&self.ring_timer).take();
        info!("Call {} was not answered in time", channel_id);
        self.teardown(SessionStatus::Missed, None).await;
        self.resurface_incoming().await;
    }

    // -- internals ---------------------------------------------------------

    fn is_idle(&self) -> bool {
        self.view.borrow().is_idle()
    }

    /// Apply a view transition, logging (not failing) if it does not apply.
    fn transition(&self, transition: ViewTransition) -> bool {
        let mut rejected = None;
        self.view.send_if_modified(|view| match view.apply(transition) {
            Ok(()) => true,
            Err(e) => {
                rejected = Some(e);
                false
            }
        });
        match rejected {
            Some(e) => {
                debug!("View unchanged: {}", e);
                false
            }
            None => true,
        }
    }

    async fn resolve_profile(&self, user_id: &str) -> Profile {
        let fallback = || Profile {
            display_name: user_id.to_string(),
            caller_type: CallerType::User,
        };
        match self.profiles.lookup(user_id).await {
            Ok(Some(profile)) => profile,
            Ok(None) => fallback(),
            Err(e) => {
                warn!("Profile lookup for {} failed: {}", user_id, e);
                fallback()
            }
        }
    }

    fn session_key(channel_id: &str, call_id: &str) -> String {
        format!("{}@{}", SignalingChannel::session_ref(channel_id), call_id)
    }

    fn install_session_subscription(
        &self,
        channel_id: &str,
        call_id: &str,
        stream: DocumentStream,
    ) {
        let weak = self.self_ref.clone();
        let channel = channel_id.to_string();
        let call = call_id.to_string();
        let handle = SubscriptionHandle::spawn(
            Self::session_key(channel_id, call_id),
            stream,
            move |snapshot| {
                let weak = weak.clone();
                let channel = channel.clone();
                let call = call.clone();
                async move {
                    if let Some(manager) = weak.upgrade() {
                        manager.on_session_snapshot(&channel, &call, snapshot).await;
                    }
                }
            },
        );
        if let Some(old) = lock(&self.session_subscription).replace(handle) {
            debug!("Replaced subscription {}", old.key());
        }
    }

    async fn ensure_session_subscription(&self, channel_id: &str, call_id: &str) {
        let key = Self::session_key(channel_id, call_id);
        let present = lock(&self.session_subscription)
            .as_ref()
            .is_some_and(|h| h.key() == key && !h.is_finished());
        if present {
            return;
        }
        match self.signaling.watch_session(channel_id).await {
            Ok(stream) => self.install_session_subscription(channel_id, call_id, stream),
            Err(e) => warn!("Failed to subscribe to session {}: {}", channel_id, e),
        }
    }

    fn cancel_session_subscription(&self) {
        if let Some(handle) = lock(&self.session_subscription).take() {
            debug!("Cancelling subscription {}", handle.key());
            handle.cancel();
        }
    }

    fn arm_ring_timer(&self, channel_id: &str, call_id: &str) {
        let Some(timeout) = self.config.ring_timeout else {
            return;
        };
        let weak = self.self_ref.clone();
        let channel = channel_id.to_string();
        let call = call_id.to_string();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(manager) = weak.upgrade() {
                manager.on_ring_timeout(&channel, &call).await;
            }
        });
        if let Some(old) = lock(&self.ring_timer).replace(timer) {
            old.abort();
        }
    }

    fn cancel_ring_timer(&self) {
        if let Some(timer) = lock(&self.ring_timer).take() {
            timer.abort();
        }
    }

    /// Best-effort removal of records written by a `start_call` that failed
    /// part way.
    async fn discard_session(
        &self,
        channel_id: &str,
        call_id: &str,
        announced_to: Option<&str>,
    ) {
        if let Some(receiver) = announced_to
            && let Err(e) = self.signaling.clear_inbox(receiver, call_id).await
        {
            warn!("Failed to remove inbox of {}: {}", receiver, e);
        }
        if let Err(e) = self.signaling.delete_session(channel_id, call_id).await {
            warn!("Failed to remove orphaned session {}: {}", channel_id, e);
        }
    }

    async fn release_media(&self, view: &LocalSessionView) {
        if let Err(e) = self.media.leave().await {
            warn!("Failed to leave media channel: {}", e);
        }
        if view.is_muted
            && let Err(e) = self.media.mute_local(false).await
        {
            warn!("Failed to reset mute: {}", e);
        }
        if view.is_speaker_on
            && let Err(e) = self.media.set_speakerphone(false).await
        {
            warn!("Failed to reset speaker route: {}", e);
        }
    }

    fn reset_local(&self) {
        self.cancel_session_subscription();
        self.cancel_ring_timer();
        self.transition(ViewTransition::Reset);
    }

    /// Shared teardown for hang-up, rejection, remote termination and media
    /// loss. Each step runs regardless of the others failing, and the view
    /// always ends up idle.
    ///
    /// `inbox_of` picks whose Inbox Record is removed; `None` means the
    /// call's receiver. Both writes only apply while the records still carry
    /// this call's id.
    async fn teardown(&self, status: SessionStatus, inbox_of: Option<&str>) {
        let view = self.view();
        self.release_media(&view).await;

        if let Some(data) = view.call_data.as_ref() {
            let channel_id = data.channel_id();
            if let Err(e) = self
                .signaling
                .mark_terminal(channel_id, data.call_id(), status)
                .await
            {
                warn!("Failed to mark session {} {}: {}", channel_id, status, e);
            }
            let inbox_user = inbox_of.unwrap_or(data.record.receiver_id.as_str());
            if let Err(e) = self.signaling.clear_inbox(inbox_user, data.call_id()).await {
                warn!("Failed to clear inbox of {}: {}", inbox_user, e);
            }
        }

        self.reset_local();

        if let Some(data) = view.call_data {
            info!("Call {} finished ({})", data.channel_id(), status);
            self.events.dispatch(CallEvent::Ended {
                channel_id: data.record.channel_id,
                status,
            });
        }
    }

    /// Drop the current call locally without writing anything, for when the
    /// Session Record has already moved on without this client. Returns the
    /// call that was dropped.
    async fn abandon(&self) -> Option<CallData> {
        let view = self.view();
        self.release_media(&view).await;
        self.reset_local();
        view.call_data
    }
}

impl Drop for CallManager {
    fn drop(&mut self) {
        if let Some(pump) = lock(&self.media_pump).take() {
            pump.abort();
        }
        if let Some(timer) = lock(&self.ring_timer).take() {
            timer.abort();
        }
    }
}
