//! Session records and the local session view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Authoritative lifecycle status stored in a Session Record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Ringing,
    Active,
    Ended,
    Rejected,
    Missed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Ringing => "ringing",
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
            SessionStatus::Rejected => "rejected",
            SessionStatus::Missed => "missed",
        }
    }

    /// Terminal statuses never change once written.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Ended | SessionStatus::Rejected | SessionStatus::Missed
        )
    }

    pub const NON_TERMINAL: [SessionStatus; 2] = [SessionStatus::Ringing, SessionStatus::Active];
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallerType {
    #[default]
    User,
    Responder,
}

/// Per-call document, keyed by channel id.
///
/// The channel id is reused every time the same two users call each other,
/// so `call_id` tells one call on a channel apart from the next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub channel_id: String,
    pub call_id: String,
    pub caller_id: String,
    pub receiver_id: String,
    pub caller_name: String,
    pub receiver_name: String,
    pub caller_type: CallerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emergency_id: Option<String>,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

/// Per-user announcement of an incoming call, keyed by receiver id.
/// Carries enough to render the prompt without reading the Session Record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxRecord {
    pub channel_id: String,
    pub call_id: String,
    pub caller_id: String,
    pub caller_name: String,
    pub caller_type: CallerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emergency_id: Option<String>,
    pub status: SessionStatus,
}

impl From<&SessionRecord> for InboxRecord {
    fn from(record: &SessionRecord) -> Self {
        Self {
            channel_id: record.channel_id.clone(),
            call_id: record.call_id.clone(),
            caller_id: record.caller_id.clone(),
            caller_name: record.caller_name.clone(),
            caller_type: record.caller_type,
            emergency_id: record.emergency_id.clone(),
            status: record.status,
        }
    }
}

/// A Session Record as seen by one party. `is_outgoing` is local only.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallData {
    #[serde(flatten)]
    pub record: SessionRecord,
    pub is_outgoing: bool,
}

impl CallData {
    pub fn outgoing(record: SessionRecord) -> Self {
        Self {
            record,
            is_outgoing: true,
        }
    }

    pub fn incoming(record: SessionRecord) -> Self {
        Self {
            record,
            is_outgoing: false,
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.record.channel_id
    }

    pub fn call_id(&self) -> &str {
        &self.record.call_id
    }

    /// Whether `record` describes this call rather than an earlier or later
    /// one on the same channel.
    pub fn is_same_call(&self, record: &SessionRecord) -> bool {
        self.record.channel_id == record.channel_id && self.record.call_id == record.call_id
    }

    /// The other participant.
    pub fn peer_id(&self) -> &str {
        if self.is_outgoing {
            &self.record.receiver_id
        } else {
            &self.record.caller_id
        }
    }

    pub fn peer_name(&self) -> &str {
        if self.is_outgoing {
            &self.record.receiver_name
        } else {
            &self.record.caller_name
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallPhase {
    Idle,
    Calling,
    Receiving,
    Active,
}

/// In-memory projection of call state for one client.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalSessionView {
    pub is_calling: bool,
    pub is_in_call: bool,
    pub is_receiving_call: bool,
    pub call_data: Option<CallData>,
    pub remote_user_joined: bool,
    pub is_muted: bool,
    pub is_speaker_on: bool,
}

/// Changes applied to a [`LocalSessionView`].
#[derive(Debug, Clone)]
pub enum ViewTransition {
    Dialed(CallData),
    IncomingRang(CallData),
    LocalAnswered,
    /// The Session Record was observed as `active` by the side that placed
    /// the call.
    RemoteAnswered,
    RemoteJoined,
    /// The peer left the media channel before the call was answered.
    RemoteLeft,
    /// A fresh copy of the Session Record for the current call.
    RecordObserved(SessionRecord),
    MuteChanged(bool),
    SpeakerChanged(bool),
    Reset,
}

impl LocalSessionView {
    pub fn phase(&self) -> CallPhase {
        if self.is_in_call {
            CallPhase::Active
        } else if self.is_calling {
            CallPhase::Calling
        } else if self.is_receiving_call {
            CallPhase::Receiving
        } else {
            CallPhase::Idle
        }
    }

    pub fn is_idle(&self) -> bool {
        self.phase() == CallPhase::Idle && self.call_data.is_none()
    }

    pub fn channel_id(&self) -> Option<&str> {
        self.call_data.as_ref().map(CallData::channel_id)
    }

    pub fn call_id(&self) -> Option<&str> {
        self.call_data.as_ref().map(CallData::call_id)
    }

    /// At most one of the call flags may be set.
    pub fn is_consistent(&self) -> bool {
        [self.is_calling, self.is_in_call, self.is_receiving_call]
            .iter()
            .filter(|flag| **flag)
            .count()
            <= 1
    }

    /// Apply a transition. Returns error if the transition is invalid in the
    /// current phase; the view is left unchanged in that case.
    pub fn apply(&mut self, transition: ViewTransition) -> Result<(), InvalidTransition> {
        match (self.phase(), transition) {
            (CallPhase::Idle, ViewTransition::Dialed(data)) => {
                *self = Self {
                    is_calling: true,
                    call_data: Some(data),
                    is_muted: self.is_muted,
                    is_speaker_on: self.is_speaker_on,
                    ..Self::default()
                };
            }
            (CallPhase::Idle, ViewTransition::IncomingRang(data)) => {
                *self = Self {
                    is_receiving_call: true,
                    call_data: Some(data),
                    is_muted: self.is_muted,
                    is_speaker_on: self.is_speaker_on,
                    ..Self::default()
                };
            }
            (CallPhase::Receiving, ViewTransition::LocalAnswered)
            | (CallPhase::Calling | CallPhase::Active, ViewTransition::RemoteAnswered) => {
                self.is_calling = false;
                self.is_receiving_call = false;
                self.is_in_call = true;
                if let Some(data) = self.call_data.as_mut() {
                    data.record.status = SessionStatus::Active;
                }
            }
            (CallPhase::Calling | CallPhase::Active, ViewTransition::RemoteJoined) => {
                self.remote_user_joined = true;
            }
            (CallPhase::Calling, ViewTransition::RemoteLeft) => {
                self.remote_user_joined = false;
            }
            (phase, ViewTransition::RecordObserved(record))
                if phase != CallPhase::Idle
                    && self
                        .call_data
                        .as_ref()
                        .is_some_and(|data| data.is_same_call(&record)) =>
            {
                if let Some(data) = self.call_data.as_mut() {
                    data.record = record;
                }
            }
            (_, ViewTransition::MuteChanged(muted)) => self.is_muted = muted,
            (_, ViewTransition::SpeakerChanged(on)) => self.is_speaker_on = on,
            (_, ViewTransition::Reset) => *self = Self::default(),
            (current, transition) => {
                return Err(InvalidTransition {
                    current_state: format!("{:?}", current),
                    attempted: format!("{:?}", transition),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}
