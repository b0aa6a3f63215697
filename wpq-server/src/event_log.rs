//! Sequenced event log
//!
//! Every published event gets the next value of one global sequence and is
//! retained per session (bounded) so polling clients and reconnecting SSE
//! clients can catch up from a cursor.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tracing::debug;
use wpq_common::events::{EventBus, EventEnvelope, QuizEvent};

pub struct EventLog {
    capacity: usize,
    inner: Mutex<LogState>,
}

#[derive(Default)]
struct LogState {
    last_seq: u64,
    sessions: HashMap<String, VecDeque<EventEnvelope>>,
}

impl EventLog {
    /// `capacity`: events retained per session
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(LogState::default()),
        }
    }

    /// Sequence, retain, then broadcast
    ///
    /// Sequencing and retention happen under one lock so per-session order
    /// always matches sequence order.
    pub fn publish(&self, bus: &EventBus, event: QuizEvent) -> EventEnvelope {
        let envelope = {
            let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            state.last_seq += 1;
            let envelope = EventEnvelope {
                seq: state.last_seq,
                event,
            };
            let retained = state
                .sessions
                .entry(envelope.event.session_code().to_string())
                .or_default();
            retained.push_back(envelope.clone());
            while retained.len() > self.capacity {
                retained.pop_front();
            }
            envelope
        };

        debug!(
            seq = envelope.seq,
            session_code = %envelope.event.session_code(),
            "Publishing {}",
            envelope.event.event_type()
        );
        bus.emit_lossy(envelope.clone());
        envelope
    }

    /// Retained events for `session_code` with `seq > since`
    pub fn since(&self, session_code: &str, since: u64) -> Vec<EventEnvelope> {
        let state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state
            .sessions
            .get(session_code)
            .map(|events| events.iter().filter(|e| e.seq > since).cloned().collect())
            .unwrap_or_default()
    }

    /// Highest sequence number retained for `session_code` (0 if none)
    pub fn latest_seq(&self, session_code: &str) -> u64 {
        let state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state
            .sessions
            .get(session_code)
            .and_then(|events| events.back())
            .map(|e| e.seq)
            .unwrap_or(0)
    }
}
