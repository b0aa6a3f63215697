//! Pending optimistic-update ledger
//!
//! A marker is recorded when a local write is applied to the cache ahead of
//! the store, and consumed when the matching broadcast event arrives. Markers
//! are keyed by a typed [`PendingKey`], never by concatenated strings, and
//! count outstanding writes so that writing the same key twice expects two
//! broadcasts.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};
use uuid::Uuid;
use wpq_common::events::QuizEvent;

/// Identity of one optimistic write
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PendingKey {
    Response {
        session_id: Uuid,
        attendee_id: Uuid,
        question_index: u32,
    },
    Completion {
        session_id: Uuid,
        attendee_id: Uuid,
    },
    Deletion {
        session_id: Uuid,
        attendee_id: Uuid,
    },
    SessionEnd {
        session_id: Uuid,
    },
}

impl PendingKey {
    pub fn session_id(&self) -> Uuid {
        match self {
            PendingKey::Response { session_id, .. }
            | PendingKey::Completion { session_id, .. }
            | PendingKey::Deletion { session_id, .. }
            | PendingKey::SessionEnd { session_id } => *session_id,
        }
    }

    /// Key a broadcast event would confirm, if it confirms a write at all
    ///
    /// Joins are never optimistic, so `attendee_joined` has no key.
    pub fn for_event(session_id: Uuid, event: &QuizEvent) -> Option<PendingKey> {
        match event {
            QuizEvent::AttendeeJoined { .. } => None,
            QuizEvent::ResponseReceived {
                attendee_id,
                question_index,
                ..
            } => Some(PendingKey::Response {
                session_id,
                attendee_id: *attendee_id,
                question_index: *question_index,
            }),
            QuizEvent::AttendeeCompleted { attendee_id, .. } => Some(PendingKey::Completion {
                session_id,
                attendee_id: *attendee_id,
            }),
            QuizEvent::AttendeeDeleted { attendee_id, .. } => Some(PendingKey::Deletion {
                session_id,
                attendee_id: *attendee_id,
            }),
            QuizEvent::SessionEnded { .. } => Some(PendingKey::SessionEnd { session_id }),
        }
    }
}

/// When a key was last written and how many of its broadcasts are outstanding
#[derive(Debug, Clone, Copy)]
struct Marker {
    at: Instant,
    outstanding: u32,
}

/// Outstanding optimistic writes and when they were made
#[derive(Debug, Default)]
pub struct PendingUpdates {
    markers: HashMap<PendingKey, Marker>,
}

impl PendingUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&mut self, key: PendingKey) {
        self.mark_at(key, Instant::now());
    }

    /// Record a write; re-marking refreshes the timestamp and adds one outstanding broadcast
    pub fn mark_at(&mut self, key: PendingKey, at: Instant) {
        let marker = self.markers.entry(key).or_insert(Marker { at, outstanding: 0 });
        marker.at = at;
        marker.outstanding += 1;
    }

    /// Consume one outstanding write, returning whether there was one
    pub fn take(&mut self, key: &PendingKey) -> bool {
        let Some(marker) = self.markers.get_mut(key) else {
            return false;
        };
        marker.outstanding -= 1;
        if marker.outstanding == 0 {
            self.markers.remove(key);
        }
        true
    }

    pub fn contains(&self, key: &PendingKey) -> bool {
        self.markers.contains_key(key)
    }

    /// Writes to `key` still awaiting their broadcast
    pub fn outstanding(&self, key: &PendingKey) -> u32 {
        self.markers.get(key).map_or(0, |m| m.outstanding)
    }

    /// Whether any marker for the session is older than `window`
    pub fn has_stale(&self, session_id: Uuid, now: Instant, window: Duration) -> bool {
        self.markers
            .iter()
            .any(|(key, m)| key.session_id() == session_id && now.saturating_duration_since(m.at) > window)
    }

    /// Drop markers older than `window`, returning the sessions they belonged to
    pub fn sweep(&mut self, now: Instant, window: Duration) -> BTreeSet<Uuid> {
        let mut affected = BTreeSet::new();
        self.markers.retain(|key, m| {
            let stale = now.saturating_duration_since(m.at) > window;
            if stale {
                affected.insert(key.session_id());
            }
            !stale
        });
        affected
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn clear(&mut self) {
        self.markers.clear();
    }
}
