//! In-memory session cache
//!
//! Mirrors sessions and attendees from the store. Referential integrity is
//! enforced here: an attendee is only held while its session is. Every
//! mutation that changes state bumps a version counter, published on a
//! `watch` channel for observers. Analytics for the current session are
//! memoized against `(current session, version)` and expire after a TTL.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;
use wpq_common::models::{Attendee, PreferenceScores, Session, SessionSnapshot};

use crate::analytics::{self, SessionAnalytics};

/// Field-wise update for [`SessionCache::update_attendee`]
///
/// `None` leaves a field untouched. Responses are merged per question.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttendeePatch {
    pub name: Option<String>,
    pub generation: Option<String>,
    pub responses: BTreeMap<u32, String>,
    pub preferences: Option<PreferenceScores>,
    pub completed: Option<bool>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AttendeePatch {
    /// One answer
    pub fn response(question_index: u32, answer_id: impl Into<String>) -> Self {
        let mut responses = BTreeMap::new();
        responses.insert(question_index, answer_id.into());
        Self {
            responses,
            ..Default::default()
        }
    }

    /// Completion with scores
    pub fn completion(scores: PreferenceScores, completed_at: DateTime<Utc>) -> Self {
        Self {
            preferences: Some(scores),
            completed: Some(true),
            completed_at: Some(completed_at),
            ..Default::default()
        }
    }

    fn apply(&self, attendee: &mut Attendee) {
        if let Some(name) = &self.name {
            attendee.name = name.clone();
        }
        if let Some(generation) = &self.generation {
            attendee.generation = Some(generation.clone());
        }
        for (index, answer) in &self.responses {
            attendee.responses.insert(*index, answer.clone());
        }
        if let Some(preferences) = self.preferences {
            attendee.preferences = Some(preferences);
        }
        if let Some(completed) = self.completed {
            attendee.completed = completed;
        }
        if let Some(completed_at) = self.completed_at {
            attendee.completed_at.get_or_insert(completed_at);
        }
    }
}

struct Memo {
    session: Option<Uuid>,
    version: u64,
    computed_at: Instant,
    value: Arc<SessionAnalytics>,
}

pub struct SessionCache {
    sessions: HashMap<Uuid, Session>,
    attendees: HashMap<Uuid, Attendee>,
    current_session: Option<Uuid>,
    version: u64,
    version_tx: watch::Sender<u64>,
    memo_ttl: Duration,
    memo: Mutex<Option<Memo>>,
}

impl SessionCache {
    pub fn new(memo_ttl: Duration) -> Self {
        let (version_tx, _) = watch::channel(0);
        Self {
            sessions: HashMap::new(),
            attendees: HashMap::new(),
            current_session: None,
            version: 0,
            version_tx,
            memo_ttl,
            memo: Mutex::new(None),
        }
    }

    fn bump(&mut self) {
        self.version += 1;
        self.version_tx.send_replace(self.version);
    }

    /// Monotonic change counter
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Observe version changes
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version_tx.subscribe()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn session(&self, id: Uuid) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Lookup by share code (case-insensitive)
    pub fn session_by_code(&self, code: &str) -> Option<&Session> {
        self.sessions
            .values()
            .find(|s| s.code.eq_ignore_ascii_case(code.trim()))
    }

    pub fn attendee(&self, id: Uuid) -> Option<&Attendee> {
        self.attendees.get(&id)
    }

    pub fn current_session_id(&self) -> Option<Uuid> {
        self.current_session
    }

    pub fn current_session(&self) -> Option<&Session> {
        self.current_session.and_then(|id| self.sessions.get(&id))
    }

    /// Attendees of one session, ordered by join time then id
    pub fn attendees_of(&self, session_id: Uuid) -> Vec<&Attendee> {
        let mut attendees: Vec<&Attendee> = self
            .attendees
            .values()
            .filter(|a| a.session_id == session_id)
            .collect();
        attendees.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then(a.id.cmp(&b.id)));
        attendees
    }

    pub fn current_attendees(&self) -> Vec<&Attendee> {
        match self.current_session {
            Some(id) => self.attendees_of(id),
            None => Vec::new(),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn attendee_count(&self) -> usize {
        self.attendees.len()
    }

    /// Derived views of the current session, memoized
    pub fn analytics(&self) -> Arc<SessionAnalytics> {
        let mut memo = self.memo.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(m) = memo.as_ref() {
            if m.session == self.current_session
                && m.version == self.version
                && m.computed_at.elapsed() < self.memo_ttl
            {
                return m.value.clone();
            }
        }

        let attendees: Vec<Attendee> = self.current_attendees().into_iter().cloned().collect();
        let value = Arc::new(analytics::compute(&attendees));
        *memo = Some(Memo {
            session: self.current_session,
            version: self.version,
            computed_at: Instant::now(),
            value: value.clone(),
        });
        value
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Replace or insert by id
    pub fn upsert_session(&mut self, session: Session) {
        if self.sessions.get(&session.id) == Some(&session) {
            return;
        }
        self.sessions.insert(session.id, session);
        self.bump();
    }

    /// Remove a session and its attendees; clears the current pointer if it was current
    pub fn remove_session(&mut self, id: Uuid) -> bool {
        if self.sessions.remove(&id).is_none() {
            return false;
        }
        self.attendees.retain(|_, a| a.session_id != id);
        if self.current_session == Some(id) {
            self.current_session = None;
        }
        self.bump();
        true
    }

    /// Mark a cached session ended (first end time wins)
    pub fn end_session(&mut self, id: Uuid, ended_at: DateTime<Utc>) -> bool {
        let Some(session) = self.sessions.get_mut(&id) else {
            return false;
        };
        if !session.active && session.ended_at.is_some() {
            return true;
        }
        session.end(ended_at);
        self.bump();
        true
    }

    /// Select the session exposed through the current-* views
    ///
    /// Selecting a session that is not cached is refused.
    pub fn set_current_session(&mut self, id: Option<Uuid>) -> bool {
        if let Some(id) = id {
            if !self.sessions.contains_key(&id) {
                return false;
            }
        }
        if self.current_session != id {
            self.current_session = id;
            self.bump();
        }
        true
    }

    /// Replace a session's cached state with a store snapshot
    pub fn replace_snapshot(&mut self, snapshot: SessionSnapshot) {
        let session_id = snapshot.session.id;
        let keep: HashSet<Uuid> = snapshot.attendees.iter().map(|a| a.id).collect();

        self.sessions.insert(session_id, snapshot.session);
        self.attendees
            .retain(|id, a| a.session_id != session_id || keep.contains(id));
        for attendee in snapshot.attendees {
            self.attendees.insert(attendee.id, attendee);
        }

        debug!(session_id = %session_id, attendees = keep.len(), "Cache hydrated from snapshot");
        self.bump();
    }

    // ========================================================================
    // Attendees
    // ========================================================================

    /// Replace or insert by id; refused when the owning session is not cached
    pub fn upsert_attendee(&mut self, attendee: Attendee) -> bool {
        if !self.sessions.contains_key(&attendee.session_id) {
            debug!(attendee_id = %attendee.id, "Refusing attendee for uncached session");
            return false;
        }
        if self.attendees.get(&attendee.id) == Some(&attendee) {
            return true;
        }
        self.attendees.insert(attendee.id, attendee);
        self.bump();
        true
    }

    /// Merge into an existing record, or insert if new
    pub fn merge_attendee(&mut self, attendee: &Attendee) -> bool {
        let Some(existing) = self.attendees.get(&attendee.id) else {
            return self.upsert_attendee(attendee.clone());
        };

        let mut merged = existing.clone();
        merged.merge_from(attendee);
        if &merged != existing {
            self.attendees.insert(merged.id, merged);
            self.bump();
        }
        true
    }

    /// Merge fields into an existing attendee; false if unknown
    pub fn update_attendee(&mut self, id: Uuid, patch: &AttendeePatch) -> bool {
        let Some(existing) = self.attendees.get(&id) else {
            return false;
        };

        let mut updated = existing.clone();
        patch.apply(&mut updated);
        if &updated != existing {
            self.attendees.insert(id, updated);
            self.bump();
        }
        true
    }

    pub fn remove_attendee(&mut self, id: Uuid) -> Option<Attendee> {
        let removed = self.attendees.remove(&id);
        if removed.is_some() {
            self.bump();
        }
        removed
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_with_session() -> (SessionCache, Session) {
        let mut cache = SessionCache::default();
        let session = Session::new("ABCDEF", "Offsite");
        cache.upsert_session(session.clone());
        cache.set_current_session(Some(session.id));
        (cache, session)
    }

    #[test]
    fn test_attendee_requires_cached_session() {
        let mut cache = SessionCache::default();
        let orphan = Attendee::new(Uuid::new_v4(), "Orphan", None);

        assert!(!cache.upsert_attendee(orphan));
        assert_eq!(cache.attendee_count(), 0);
        assert_eq!(cache.version(), 0);
    }

    #[test]
    fn test_remove_session_cascades_and_clears_current() {
        let (mut cache, session) = cache_with_session();
        cache.upsert_attendee(Attendee::new(session.id, "Ann", None));
        cache.upsert_attendee(Attendee::new(session.id, "Ben", None));

        assert!(cache.remove_session(session.id));
        assert_eq!(cache.attendee_count(), 0);
        assert_eq!(cache.current_session_id(), None);
        assert!(cache.current_attendees().is_empty());
    }

    #[test]
    fn test_set_current_session_refuses_unknown() {
        let (mut cache, session) = cache_with_session();
        assert!(!cache.set_current_session(Some(Uuid::new_v4())));
        assert_eq!(cache.current_session_id(), Some(session.id));
        assert!(cache.set_current_session(None));
        assert!(cache.current_session().is_none());
    }

    #[test]
    fn test_update_attendee_merges_fields() {
        let (mut cache, session) = cache_with_session();
        let mut attendee = Attendee::new(session.id, "Cal", Some("gen_x".into()));
        attendee.record_response(0, "a");
        let id = attendee.id;
        cache.upsert_attendee(attendee);

        assert!(cache.update_attendee(id, &AttendeePatch::response(1, "c")));
        assert!(!cache.update_attendee(Uuid::new_v4(), &AttendeePatch::response(1, "c")));

        let updated = cache.attendee(id).unwrap();
        assert_eq!(updated.responses.len(), 2);
        assert_eq!(updated.responses[&1], "c");
        assert_eq!(updated.generation.as_deref(), Some("gen_x"));
        assert_eq!(updated.name, "Cal");
    }

    #[test]
    fn test_version_only_moves_on_change() {
        let (mut cache, session) = cache_with_session();
        let attendee = Attendee::new(session.id, "Dee", None);
        let id = attendee.id;

        cache.upsert_attendee(attendee.clone());
        let after_insert = cache.version();

        cache.upsert_attendee(attendee.clone());
        cache.merge_attendee(&attendee);
        cache.update_attendee(id, &AttendeePatch::default());
        assert_eq!(cache.version(), after_insert);

        cache.update_attendee(id, &AttendeePatch::response(0, "b"));
        assert_eq!(cache.version(), after_insert + 1);
    }

    #[test]
    fn test_subscribers_observe_version() {
        let (mut cache, session) = cache_with_session();
        let rx = cache.subscribe();

        cache.upsert_attendee(Attendee::new(session.id, "Eve", None));
        assert_eq!(*rx.borrow(), cache.version());
    }

    #[test]
    fn test_replace_snapshot_drops_missing_attendees() {
        let (mut cache, session) = cache_with_session();
        let stays = Attendee::new(session.id, "Stays", None);
        let goes = Attendee::new(session.id, "Goes", None);
        cache.upsert_attendee(stays.clone());
        cache.upsert_attendee(goes.clone());

        let mut ended = session.clone();
        ended.end(Utc::now());
        cache.replace_snapshot(SessionSnapshot {
            session: ended,
            attendees: vec![stays.clone()],
        });

        assert!(cache.attendee(stays.id).is_some());
        assert!(cache.attendee(goes.id).is_none());
        assert!(!cache.current_session().unwrap().active);
    }

    #[test]
    fn test_analytics_memoized_until_version_changes() {
        let (mut cache, session) = cache_with_session();
        cache.upsert_attendee(Attendee::new(session.id, "Fay", None));

        let first = cache.analytics();
        let second = cache.analytics();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.total_count, 1);

        cache.upsert_attendee(Attendee::new(session.id, "Gus", None));
        let third = cache.analytics();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(third.total_count, 2);
    }

    #[test]
    fn test_analytics_expire_after_ttl() {
        let mut cache = SessionCache::new(Duration::ZERO);
        let session = Session::new("QWERTY", "Zero TTL");
        cache.upsert_session(session.clone());
        cache.set_current_session(Some(session.id));

        let first = cache.analytics();
        let second = cache.analytics();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first, second);
    }

    #[test]
    fn test_analytics_scoped_to_current_session() {
        let (mut cache, session) = cache_with_session();
        let other = Session::new("ZXCVBN", "Other");
        cache.upsert_session(other.clone());
        cache.upsert_attendee(Attendee::new(session.id, "Hal", None));
        cache.upsert_attendee(Attendee::new(other.id, "Ida", None));
        cache.upsert_attendee(Attendee::new(other.id, "Jon", None));

        assert_eq!(cache.analytics().total_count, 1);
        cache.set_current_session(Some(other.id));
        assert_eq!(cache.analytics().total_count, 2);
    }
}
