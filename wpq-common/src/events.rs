//! Realtime event types for the WPQ event system
//!
//! Provides the shared event definitions carried over SSE / polling and the
//! in-process EventBus used by the server to fan them out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{Attendee, PreferenceScores};

/// Session change notifications
///
/// Serialized adjacently tagged: `{"type": "response_received", "data": {...}}`.
/// Every variant names the session by code so a client subscribed to one
/// session can cheaply discard anything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum QuizEvent {
    /// Someone joined the session (before answering)
    ///
    /// Triggers:
    /// - Dashboard: attendee count, generation distribution
    AttendeeJoined {
        session_code: String,
        /// Full attendee record as stored at join time
        attendee: Attendee,
    },

    /// An answer was recorded (or overwritten) for one question
    ResponseReceived {
        session_code: String,
        attendee_id: Uuid,
        question_index: u32,
        answer_id: String,
    },

    /// Attendee finished the quiz; scores were computed by the server
    AttendeeCompleted {
        session_code: String,
        attendee_id: Uuid,
        scores: PreferenceScores,
        completed_at: DateTime<Utc>,
    },

    /// Presenter removed an attendee
    AttendeeDeleted {
        session_code: String,
        attendee_id: Uuid,
    },

    /// Presenter ended the session
    SessionEnded {
        session_code: String,
        ended_at: DateTime<Utc>,
    },
}

impl QuizEvent {
    /// Get event type as string, matching the serialized tag
    pub fn event_type(&self) -> &'static str {
        match self {
            QuizEvent::AttendeeJoined { .. } => "attendee_joined",
            QuizEvent::ResponseReceived { .. } => "response_received",
            QuizEvent::AttendeeCompleted { .. } => "attendee_completed",
            QuizEvent::AttendeeDeleted { .. } => "attendee_deleted",
            QuizEvent::SessionEnded { .. } => "session_ended",
        }
    }

    /// Code of the session this event belongs to
    pub fn session_code(&self) -> &str {
        match self {
            QuizEvent::AttendeeJoined { session_code, .. }
            | QuizEvent::ResponseReceived { session_code, .. }
            | QuizEvent::AttendeeCompleted { session_code, .. }
            | QuizEvent::AttendeeDeleted { session_code, .. }
            | QuizEvent::SessionEnded { session_code, .. } => session_code,
        }
    }
}

/// An event stamped with its position in the server's global sequence
///
/// The sequence number doubles as the SSE event id and the polling cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub seq: u64,
    pub event: QuizEvent,
}

/// SSE event name of the handshake frame sent when a stream opens
pub const CONNECTED_EVENT: &str = "connected";

/// Central event distribution bus
///
/// Uses tokio::broadcast internally:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers (one per SSE connection)
/// - Lagged message detection for slow subscribers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, envelope: EventEnvelope) {
        let _ = self.tx.send(envelope);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
