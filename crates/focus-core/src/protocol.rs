//! Wire frames and the server event union.
//!
//! Every frame on the socket is a JSON object:
//!
//! ```json
//! { "event": "task_toggled", "payload": { "taskId": "t1", "completed": true }, "seq": 5 }
//! ```
//!
//! Client frames omit `seq`; server event frames always carry it. Older
//! servers put the body under `data` instead of `payload`, which is accepted
//! as an alias. A handful of control frames (`ping`, `pong`, `connected`)
//! are consumed by the connection layer and never reach the reconciler.
//!
//! [`parse_inbound`] is the validation boundary: anything that leaves it as
//! an [`InboundFrame::Event`] has a known event name, a well-typed payload,
//! and a sequence number.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{Result, SyncError};
use crate::ids::{SessionId, TaskId, UserId};
use crate::model::SessionReport;

// ─────────────────────────────────────────────────────────────────────────────
// Event names
// ─────────────────────────────────────────────────────────────────────────────

/// `task_added`
pub const TASK_ADDED: &str = "task_added";
/// `task_deleted`
pub const TASK_DELETED: &str = "task_deleted";
/// `task_toggled`
pub const TASK_TOGGLED: &str = "task_toggled";
/// `participant_joined`
pub const PARTICIPANT_JOINED: &str = "participant_joined";
/// `participant_left`
pub const PARTICIPANT_LEFT: &str = "participant_left";
/// `cycle_advanced`
pub const CYCLE_ADVANCED: &str = "cycle_advanced";
/// `leaderboard_updated`
pub const LEADERBOARD_UPDATED: &str = "leaderboard_updated";
/// `session_completed`
pub const SESSION_COMPLETED: &str = "session_completed";

/// Reserved bus event carrying connection state transitions.
pub const CONNECTION_STATE_CHANGED: &str = "connection_state_changed";
/// Reserved bus event carrying dropped-frame reports.
pub const PROTOCOL_ERROR: &str = "protocol_error";
/// Reserved bus event carrying user-visible notices.
pub const SYNC_NOTICE: &str = "sync_notice";

/// Heartbeat probe.
pub const PING: &str = "ping";
/// Heartbeat reply.
pub const PONG: &str = "pong";

/// All server event names, in the order of the protocol table.
pub const SERVER_EVENT_NAMES: &[&str] = &[
    TASK_ADDED,
    TASK_DELETED,
    TASK_TOGGLED,
    PARTICIPANT_JOINED,
    PARTICIPANT_LEFT,
    CYCLE_ADVANCED,
    LEADERBOARD_UPDATED,
    SESSION_COMPLETED,
];

/// Control frames the connection layer swallows after the handshake.
const CONTROL_EVENTS: &[&str] = &["connected", "connection.established"];

// ─────────────────────────────────────────────────────────────────────────────
// Payloads
// ─────────────────────────────────────────────────────────────────────────────

/// `task_added` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAdded {
    /// Server-assigned task ID.
    pub task_id: TaskId,
    /// Title.
    pub title: String,
    /// Owner.
    pub owner_id: UserId,
}

/// `task_deleted` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDeleted {
    /// Task removed.
    pub task_id: TaskId,
}

/// `task_toggled` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskToggled {
    /// Task changed.
    pub task_id: TaskId,
    /// New completion flag.
    pub completed: bool,
}

/// `participant_joined` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantJoined {
    /// Joining user.
    pub user_id: UserId,
    /// Display name.
    pub user_name: String,
    /// Avatar URL.
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// `participant_left` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantLeft {
    /// Leaving user.
    pub user_id: UserId,
}

/// `cycle_advanced` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleAdvanced {
    /// New cycle number.
    pub cycle: u32,
}

/// One row of a `leaderboard_updated` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardUpdate {
    /// Participant.
    pub user_id: UserId,
    /// Authoritative score; when absent the local formula applies.
    #[serde(default)]
    pub score: Option<i64>,
    /// Completed task count.
    #[serde(default)]
    pub tasks_completed: u32,
    /// Focus minutes.
    #[serde(default)]
    pub focus_time: u32,
    /// Server-side rank (informational).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    /// Display name (informational).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    /// Avatar URL (informational).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// `leaderboard_updated` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardUpdated {
    /// Updated rows.
    pub entries: Vec<LeaderboardUpdate>,
}

/// `session_completed` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCompleted {
    /// When the server finalized the session.
    pub completed_at: DateTime<Utc>,
    /// Final statistics.
    #[serde(default)]
    pub final_report: Option<SessionReport>,
}

// ─────────────────────────────────────────────────────────────────────────────
// ServerEvent
// ─────────────────────────────────────────────────────────────────────────────

/// Authoritative server event, one variant per protocol event name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerEvent {
    /// A task was created.
    TaskAdded(TaskAdded),
    /// A task was removed.
    TaskDeleted(TaskDeleted),
    /// A task's completion flag changed.
    TaskToggled(TaskToggled),
    /// A participant joined.
    ParticipantJoined(ParticipantJoined),
    /// A participant left.
    ParticipantLeft(ParticipantLeft),
    /// The session moved to a new cycle.
    CycleAdvanced(CycleAdvanced),
    /// Leaderboard metrics changed.
    LeaderboardUpdated(LeaderboardUpdated),
    /// The session was finalized.
    SessionCompleted(SessionCompleted),
}

impl ServerEvent {
    /// Wire name of this event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::TaskAdded(_) => TASK_ADDED,
            Self::TaskDeleted(_) => TASK_DELETED,
            Self::TaskToggled(_) => TASK_TOGGLED,
            Self::ParticipantJoined(_) => PARTICIPANT_JOINED,
            Self::ParticipantLeft(_) => PARTICIPANT_LEFT,
            Self::CycleAdvanced(_) => CYCLE_ADVANCED,
            Self::LeaderboardUpdated(_) => LEADERBOARD_UPDATED,
            Self::SessionCompleted(_) => SESSION_COMPLETED,
        }
    }

    /// Decode a payload for the named event.
    ///
    /// Unknown names and payloads that do not match the expected shape are
    /// both protocol errors.
    pub fn from_parts(name: &str, payload: Value) -> Result<Self> {
        fn decode<T: serde::de::DeserializeOwned>(name: &str, payload: Value) -> Result<T> {
            serde_json::from_value(payload).map_err(|e| SyncError::Protocol {
                message: format!("invalid {name} payload: {e}"),
            })
        }

        Ok(match name {
            TASK_ADDED => Self::TaskAdded(decode(name, payload)?),
            TASK_DELETED => Self::TaskDeleted(decode(name, payload)?),
            TASK_TOGGLED => Self::TaskToggled(decode(name, payload)?),
            PARTICIPANT_JOINED => Self::ParticipantJoined(decode(name, payload)?),
            PARTICIPANT_LEFT => Self::ParticipantLeft(decode(name, payload)?),
            CYCLE_ADVANCED => Self::CycleAdvanced(decode(name, payload)?),
            LEADERBOARD_UPDATED => Self::LeaderboardUpdated(decode(name, payload)?),
            SESSION_COMPLETED => Self::SessionCompleted(decode(name, payload)?),
            other => {
                return Err(SyncError::Protocol {
                    message: format!("unknown event: {other}"),
                });
            }
        })
    }

    /// Encode the payload back to JSON.
    pub fn payload(&self) -> Value {
        let encoded = match self {
            Self::TaskAdded(p) => serde_json::to_value(p),
            Self::TaskDeleted(p) => serde_json::to_value(p),
            Self::TaskToggled(p) => serde_json::to_value(p),
            Self::ParticipantJoined(p) => serde_json::to_value(p),
            Self::ParticipantLeft(p) => serde_json::to_value(p),
            Self::CycleAdvanced(p) => serde_json::to_value(p),
            Self::LeaderboardUpdated(p) => serde_json::to_value(p),
            Self::SessionCompleted(p) => serde_json::to_value(p),
        };
        encoded.unwrap_or(Value::Null)
    }
}

/// A validated server event with its ordering metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SequencedEvent {
    /// Per-session sequence number assigned by the server.
    pub seq: u64,
    /// Session the event belongs to, when the server tags it.
    pub session_id: Option<SessionId>,
    /// The event itself.
    pub event: ServerEvent,
}

impl SequencedEvent {
    /// Build an untagged sequenced event.
    pub fn new(seq: u64, event: ServerEvent) -> Self {
        Self {
            seq,
            session_id: None,
            event,
        }
    }

    /// Serialize as a server frame (used by tests and tooling).
    pub fn to_frame(&self) -> WireFrame {
        WireFrame {
            event: self.event.name().to_owned(),
            payload: self.event.payload(),
            seq: Some(self.seq),
            session_id: self.session_id.clone(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Frames
// ─────────────────────────────────────────────────────────────────────────────

/// Raw JSON frame, either direction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFrame {
    /// Event name.
    pub event: String,
    /// Event-specific body.
    #[serde(default, alias = "data")]
    pub payload: Value,
    /// Server-assigned sequence number; absent on client frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    /// Session tag on server frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

impl WireFrame {
    /// Build an outbound client frame (no `seq`).
    pub fn outbound(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
            seq: None,
            session_id: None,
        }
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| SyncError::Protocol {
            message: format!("failed to encode frame: {e}"),
        })
    }
}

/// Classified inbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundFrame {
    /// Validated server event.
    Event(SequencedEvent),
    /// Server heartbeat probe; answer with `pong`.
    Ping,
    /// Heartbeat reply.
    Pong,
    /// Other recognized control frame (handshake notices).
    Control(String),
}

/// Parse and validate an inbound text frame.
pub fn parse_inbound(text: &str) -> Result<InboundFrame> {
    let frame: WireFrame = serde_json::from_str(text).map_err(|e| SyncError::Protocol {
        message: format!("malformed frame: {e}"),
    })?;

    match frame.event.as_str() {
        PING => return Ok(InboundFrame::Ping),
        PONG => return Ok(InboundFrame::Pong),
        name if CONTROL_EVENTS.contains(&name) => return Ok(InboundFrame::Control(frame.event)),
        _ => {}
    }

    let event = ServerEvent::from_parts(&frame.event, frame.payload)?;
    let seq = frame.seq.ok_or_else(|| SyncError::Protocol {
        message: format!("{} frame without seq", frame.event),
    })?;

    Ok(InboundFrame::Event(SequencedEvent {
        seq,
        session_id: frame.session_id,
        event,
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
