//! Realtime reconciliation layer
//!
//! [`SessionSync`] is the single owner of a [`SessionCache`]. Local writes
//! are applied optimistically and recorded in [`PendingUpdates`]; when the
//! broadcast of that write comes back over the channel the marker is
//! consumed and the event is not applied, since the cache already holds that
//! write or a newer local one. Every cache mutation driven by an event is an
//! idempotent upsert or merge, so duplicated or reordered delivery converges
//! to the same state.
//!
//! Divergence is never repaired field by field: a session whose markers went
//! stale, whose write failed, or which received an event that could not be
//! applied is flagged and re-fetched whole from the store.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wpq_common::config::ClientConfig;
use wpq_common::events::QuizEvent;
use wpq_common::questions::QuestionBank;
use wpq_common::scoring::calculate_scores_or_default;
use wpq_common::{Attendee, PreferenceScores, Session};

use crate::analytics::SessionAnalytics;
use crate::cache::{AttendeePatch, SessionCache};
use crate::channel::ChannelEvent;
use crate::connection::{BackoffPolicy, ConnectionState, CONNECTION_LOST};
use crate::error::{ClientError, ClientResult};
use crate::pending::{PendingKey, PendingUpdates};
use crate::retry::retry_transient;
use crate::store::SessionStore;

/// Timing knobs for [`SessionSync`]
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Age after which an unconfirmed optimistic write is considered lost
    pub pending_window: Duration,
    pub reconcile_interval: Duration,
    pub memo_ttl: Duration,
    /// Backoff for store writes
    pub write_policy: BackoffPolicy,
}

impl SyncOptions {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            pending_window: Duration::from_millis(config.pending_window_ms),
            reconcile_interval: Duration::from_millis(config.reconcile_interval_ms.max(1)),
            memo_ttl: Duration::from_millis(config.memo_ttl_ms),
            write_policy: BackoffPolicy::from_config(config),
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

/// Result of applying one realtime event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Event from another client, applied to the cache
    Applied,
    /// Broadcast of our own write; marker consumed
    Confirmed,
    /// Nothing to do (unknown session, already-removed attendee, ...)
    Ignored,
}

pub struct SessionSync<S: SessionStore + ?Sized> {
    store: Arc<S>,
    cache: SessionCache,
    pending: PendingUpdates,
    refetch: BTreeSet<Uuid>,
    connection: ConnectionState,
    questions: QuestionBank,
    options: SyncOptions,
}

impl<S: SessionStore + ?Sized> SessionSync<S> {
    pub fn new(store: Arc<S>, options: SyncOptions) -> Self {
        Self {
            store,
            cache: SessionCache::new(options.memo_ttl),
            pending: PendingUpdates::new(),
            refetch: BTreeSet::new(),
            connection: ConnectionState::Disconnected,
            questions: QuestionBank::standard(),
            options,
        }
    }

    // ========================================================================
    // Getters
    // ========================================================================

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    pub fn analytics(&self) -> Arc<SessionAnalytics> {
        self.cache.analytics()
    }

    pub fn pending(&self) -> &PendingUpdates {
        &self.pending
    }

    pub fn connection_state(&self) -> &ConnectionState {
        &self.connection
    }

    pub fn needs_refetch(&self, session_id: Uuid) -> bool {
        self.refetch.contains(&session_id)
    }

    pub fn questions(&self) -> &QuestionBank {
        &self.questions
    }

    // ========================================================================
    // Hydration
    // ========================================================================

    /// Load a session from the store and make it current
    pub async fn hydrate(&mut self, code: &str) -> ClientResult<Uuid> {
        let session_id = self.refresh_by_code(code).await?;
        self.cache.set_current_session(Some(session_id));
        info!(
            session_code = %code,
            attendees = self.cache.current_attendees().len(),
            "Session hydrated"
        );
        Ok(session_id)
    }

    async fn refresh_by_code(&mut self, code: &str) -> ClientResult<Uuid> {
        match self.store.fetch_session(code).await {
            Ok(snapshot) => {
                let session_id = snapshot.session.id;
                self.cache.replace_snapshot(snapshot);
                self.refetch.remove(&session_id);
                Ok(session_id)
            }
            Err(ClientError::NotFound(what)) => {
                if let Some(id) = self.cache.session_by_code(code).map(|s| s.id) {
                    self.cache.remove_session(id);
                    self.refetch.remove(&id);
                }
                Err(ClientError::NotFound(what))
            }
            Err(e) => Err(e),
        }
    }

    /// Re-fetch one cached session without changing the current selection
    async fn refresh(&mut self, session_id: Uuid) -> ClientResult<()> {
        let Some(code) = self.cache.session(session_id).map(|s| s.code.clone()) else {
            self.refetch.remove(&session_id);
            return Ok(());
        };
        debug!(session_code = %code, "Re-fetching session");
        self.refresh_by_code(&code).await.map(|_| ())
    }

    // ========================================================================
    // Non-optimistic writes
    // ========================================================================

    pub async fn create_session(&mut self, name: &str) -> ClientResult<Session> {
        let session = self.store.create_session(name).await?;
        self.cache.upsert_session(session.clone());
        Ok(session)
    }

    /// Join a session; the store assigns the id, so nothing is applied early
    pub async fn join(&mut self, code: &str, name: &str, generation: Option<String>) -> ClientResult<Attendee> {
        let attendee = self.store.join(code, name, generation).await?;
        if !self.cache.merge_attendee(&attendee) {
            // Session not cached yet
            self.refresh_by_code(code).await?;
            self.cache.merge_attendee(&attendee);
        }
        Ok(attendee)
    }

    // ========================================================================
    // Optimistic writes
    // ========================================================================

    fn session_of(&self, attendee_id: Uuid) -> ClientResult<(Attendee, Session)> {
        let attendee = self
            .cache
            .attendee(attendee_id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("Attendee {}", attendee_id)))?;
        let session = self
            .cache
            .session(attendee.session_id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("Session {}", attendee.session_id)))?;
        Ok((attendee, session))
    }

    /// Drop the marker of a failed write and schedule a re-fetch
    fn write_failed(&mut self, key: &PendingKey, operation: &str, err: &ClientError) {
        warn!(
            operation,
            session_id = %key.session_id(),
            error = %err,
            "Optimistic write failed, session will be re-fetched"
        );
        self.pending.take(key);
        self.refetch.insert(key.session_id());
    }

    /// Record (or overwrite) one answer
    pub async fn submit_response(
        &mut self,
        attendee_id: Uuid,
        question_index: u32,
        answer_id: &str,
    ) -> ClientResult<()> {
        let (attendee, session) = self.session_of(attendee_id)?;
        if !session.active {
            return Err(ClientError::InvalidInput(format!("Session {} has ended", session.code)));
        }
        if attendee.completed {
            return Err(ClientError::InvalidInput(format!(
                "Attendee {} already completed the quiz",
                attendee_id
            )));
        }
        self.questions.validate_answer(question_index, answer_id)?;

        let key = PendingKey::Response {
            session_id: session.id,
            attendee_id,
            question_index,
        };
        self.cache
            .update_attendee(attendee_id, &AttendeePatch::response(question_index, answer_id));
        self.pending.mark(key.clone());

        let store = &self.store;
        let code = session.code.as_str();
        let result = retry_transient("submit_response", &self.options.write_policy, || {
            store.submit_response(code, attendee_id, question_index, answer_id)
        })
        .await;

        match result {
            Ok(stored) => {
                self.cache.merge_attendee(&stored);
                Ok(())
            }
            Err(e) => {
                self.write_failed(&key, "submit_response", &e);
                Err(e)
            }
        }
    }

    /// Score locally and mark complete; the store computes the same scores
    pub async fn complete_attendee(&mut self, attendee_id: Uuid) -> ClientResult<PreferenceScores> {
        let (attendee, session) = self.session_of(attendee_id)?;
        if attendee.completed {
            return Ok(attendee.preferences.unwrap_or(PreferenceScores::ZERO));
        }

        let responses = self.questions.responses_for(&attendee.responses);
        let scores = calculate_scores_or_default(&responses, &self.questions);

        let key = PendingKey::Completion {
            session_id: session.id,
            attendee_id,
        };
        self.cache.update_attendee(
            attendee_id,
            &AttendeePatch::completion(scores, wpq_common::time::now()),
        );
        self.pending.mark(key.clone());

        let store = &self.store;
        let code = session.code.as_str();
        let result = retry_transient("complete_attendee", &self.options.write_policy, || {
            store.complete_attendee(code, attendee_id)
        })
        .await;

        match result {
            Ok(stored) => {
                self.cache.merge_attendee(&stored);
                Ok(stored.preferences.unwrap_or(scores))
            }
            Err(e) => {
                self.write_failed(&key, "complete_attendee", &e);
                Err(e)
            }
        }
    }

    /// Remove an attendee; deleting one the store no longer has succeeds
    pub async fn delete_attendee(&mut self, attendee_id: Uuid) -> ClientResult<()> {
        let (_, session) = self.session_of(attendee_id)?;

        let key = PendingKey::Deletion {
            session_id: session.id,
            attendee_id,
        };
        self.cache.remove_attendee(attendee_id);
        self.pending.mark(key.clone());

        let store = &self.store;
        let code = session.code.as_str();
        let result = retry_transient("delete_attendee", &self.options.write_policy, || {
            store.delete_attendee(code, attendee_id)
        })
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(ClientError::NotFound(_)) => {
                // Already gone; no broadcast will confirm it
                self.pending.take(&key);
                Ok(())
            }
            Err(e) => {
                self.write_failed(&key, "delete_attendee", &e);
                Err(e)
            }
        }
    }

    /// End a cached session
    pub async fn end_session(&mut self, session_id: Uuid) -> ClientResult<Session> {
        let session = self
            .cache
            .session(session_id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("Session {}", session_id)))?;
        if !session.active {
            return Ok(session);
        }

        let key = PendingKey::SessionEnd { session_id };
        self.cache.end_session(session_id, wpq_common::time::now());
        self.pending.mark(key.clone());

        let store = &self.store;
        let code = session.code.as_str();
        let result = retry_transient("end_session", &self.options.write_policy, || {
            store.end_session(code)
        })
        .await;

        match result {
            Ok(stored) => {
                self.cache.upsert_session(stored.clone());
                Ok(stored)
            }
            Err(e) => {
                self.write_failed(&key, "end_session", &e);
                Err(e)
            }
        }
    }

    // ========================================================================
    // Realtime events
    // ========================================================================

    /// Apply one broadcast event
    pub fn apply_event(&mut self, event: &QuizEvent) -> EventOutcome {
        let Some(session_id) = self.cache.session_by_code(event.session_code()).map(|s| s.id) else {
            debug!(session_code = %event.session_code(), "Event for uncached session ignored");
            return EventOutcome::Ignored;
        };

        if self
            .pending
            .has_stale(session_id, Instant::now(), self.options.pending_window)
        {
            debug!(session_id = %session_id, "Stale pending markers, flagging re-fetch");
            self.refetch.insert(session_id);
        }

        let confirmed = PendingKey::for_event(session_id, event)
            .map(|key| self.pending.take(&key))
            .unwrap_or(false);

        // The optimistic copy already holds our own write, or a newer one
        if confirmed {
            return EventOutcome::Confirmed;
        }

        if self.apply_to_cache(session_id, event) {
            EventOutcome::Applied
        } else {
            EventOutcome::Ignored
        }
    }

    fn apply_to_cache(&mut self, session_id: Uuid, event: &QuizEvent) -> bool {
        match event {
            QuizEvent::AttendeeJoined { attendee, .. } => {
                if attendee.session_id != session_id {
                    warn!(attendee_id = %attendee.id, "Joined event names a different session id");
                    self.refetch.insert(session_id);
                    return false;
                }
                self.cache.merge_attendee(attendee)
            }
            QuizEvent::ResponseReceived {
                attendee_id,
                question_index,
                answer_id,
                ..
            } => self.update_or_refetch(
                session_id,
                *attendee_id,
                &AttendeePatch::response(*question_index, answer_id.clone()),
            ),
            QuizEvent::AttendeeCompleted {
                attendee_id,
                scores,
                completed_at,
                ..
            } => self.update_or_refetch(
                session_id,
                *attendee_id,
                &AttendeePatch::completion(*scores, *completed_at),
            ),
            QuizEvent::AttendeeDeleted { attendee_id, .. } => {
                self.cache.remove_attendee(*attendee_id).is_some()
            }
            QuizEvent::SessionEnded { ended_at, .. } => self.cache.end_session(session_id, *ended_at),
        }
    }

    fn update_or_refetch(&mut self, session_id: Uuid, attendee_id: Uuid, patch: &AttendeePatch) -> bool {
        if self.cache.update_attendee(attendee_id, patch) {
            return true;
        }
        // Missed the join (or a delete raced); the store knows better
        debug!(attendee_id = %attendee_id, "Event for unknown attendee, flagging re-fetch");
        self.refetch.insert(session_id);
        false
    }

    /// React to a channel notification
    ///
    /// Returns `Err(ClientError::Fatal)` once the channel has given up.
    pub async fn handle_channel_event(&mut self, event: ChannelEvent) -> ClientResult<()> {
        match event {
            ChannelEvent::Connecting { attempt } => {
                debug!(attempt, "Realtime channel connecting");
                self.connection = ConnectionState::Connecting;
            }
            ChannelEvent::Connected => {
                self.connection = ConnectionState::Connected;
                // Catch up on anything missed while disconnected
                if let Some(session_id) = self.cache.current_session_id() {
                    if let Err(e) = self.refresh(session_id).await {
                        warn!(error = %e, "Catch-up fetch after reconnect failed");
                        self.refetch.insert(session_id);
                    }
                }
            }
            ChannelEvent::Disconnected { reason } => {
                warn!(reason = %reason, "Realtime channel disconnected");
                self.connection = ConnectionState::Disconnected;
            }
            ChannelEvent::Event(event) => {
                let outcome = self.apply_event(&event);
                debug!(event = event.event_type(), outcome = ?outcome, "Realtime event handled");
            }
            ChannelEvent::Fatal { attempts } => {
                self.connection = ConnectionState::Failed(CONNECTION_LOST.to_string());
                return Err(ClientError::Fatal(format!(
                    "{} (after {} attempts)",
                    CONNECTION_LOST, attempts
                )));
            }
        }
        Ok(())
    }

    /// Periodic sweep: expire stale markers, re-fetch flagged sessions
    ///
    /// Returns the number of sessions re-fetched. Sessions whose fetch fails
    /// stay flagged for the next sweep.
    pub async fn reconcile(&mut self) -> ClientResult<usize> {
        let stale = self.pending.sweep(Instant::now(), self.options.pending_window);
        if !stale.is_empty() {
            debug!(sessions = stale.len(), "Dropped stale pending markers");
        }
        self.refetch.extend(stale);

        let flagged: Vec<Uuid> = self.refetch.iter().copied().collect();
        let mut refreshed = 0;
        for session_id in flagged {
            match self.refresh(session_id).await {
                Ok(()) => refreshed += 1,
                Err(ClientError::NotFound(_)) => refreshed += 1,
                Err(e) => warn!(session_id = %session_id, error = %e, "Re-fetch failed, will retry"),
            }
        }
        Ok(refreshed)
    }

    /// Run until the channel closes or fails
    pub async fn drive(&mut self, rx: mpsc::Receiver<ChannelEvent>) -> ClientResult<()> {
        self.drive_with(rx, |_| {}).await
    }

    /// Like [`drive`](Self::drive), calling `on_change` whenever the cache version moved
    pub async fn drive_with<F>(&mut self, mut rx: mpsc::Receiver<ChannelEvent>, mut on_change: F) -> ClientResult<()>
    where
        F: FnMut(&SessionCache),
    {
        let mut ticker = tokio::time::interval(self.options.reconcile_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut seen_version = self.cache.version();

        loop {
            tokio::select! {
                next = rx.recv() => match next {
                    Some(event) => self.handle_channel_event(event).await?,
                    None => {
                        info!("Realtime channel closed");
                        return Ok(());
                    }
                },
                _ = ticker.tick() => {
                    self.reconcile().await?;
                }
            }

            if self.cache.version() != seen_version {
                seen_version = self.cache.version();
                on_change(&self.cache);
            }
        }
    }

    /// Forget pending markers and re-fetch flags; the caller aborts the channel task
    pub fn teardown(&mut self) {
        self.pending.clear();
        self.refetch.clear();
        self.connection = ConnectionState::Disconnected;
    }
}
