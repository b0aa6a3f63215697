//! Integration tests for the reconciliation layer
//!
//! Tests cover:
//! - Hydration and catch-up after reconnect
//! - Optimistic writes confirmed by their own broadcast (no double-apply)
//! - Idempotent application of every event type
//! - Write failure, stale markers and re-fetch
//! - Derived aggregates over the reconciled cache
//! - Reconnect backoff ending in the terminal state

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;
use wpq_client::channel::{ChannelEvent, MessageStream, RealtimeChannel, Transport};
use wpq_client::connection::{BackoffPolicy, ConnectionState, CONNECTION_LOST};
use wpq_client::sync::SyncOptions;
use wpq_client::{ClientError, ClientResult, EventOutcome, SessionStore, SessionSync};
use wpq_common::events::QuizEvent;
use wpq_common::questions::QuestionBank;
use wpq_common::scoring::calculate_scores_or_default;
use wpq_common::{Attendee, Generation, PreferenceScores, Session, SessionSnapshot};

// =============================================================================
// Fake store
// =============================================================================

#[derive(Default)]
struct FakeState {
    sessions: HashMap<String, SessionSnapshot>,
    /// Broadcasts the real server would have published
    events: Vec<QuizEvent>,
    failing_writes: u32,
    write_calls: u32,
}

struct FakeStore {
    state: Mutex<FakeState>,
    questions: QuestionBank,
}

impl FakeStore {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState::default()),
            questions: QuestionBank::standard(),
        })
    }

    fn seed_session(&self, code: &str) -> Session {
        let session = Session::new(code, format!("Session {}", code));
        self.state.lock().unwrap().sessions.insert(
            code.to_string(),
            SessionSnapshot {
                session: session.clone(),
                attendees: Vec::new(),
            },
        );
        session
    }

    /// Add an attendee without publishing anything (a missed event)
    fn insert_silently(&self, code: &str, attendee: Attendee) {
        let mut state = self.state.lock().unwrap();
        state.sessions.get_mut(code).unwrap().attendees.push(attendee);
    }

    fn fail_next_writes(&self, count: u32) {
        self.state.lock().unwrap().failing_writes = count;
    }

    fn write_calls(&self) -> u32 {
        self.state.lock().unwrap().write_calls
    }

    fn take_events(&self) -> Vec<QuizEvent> {
        std::mem::take(&mut self.state.lock().unwrap().events)
    }

    fn begin_write(state: &mut FakeState) -> ClientResult<()> {
        state.write_calls += 1;
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(ClientError::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }
        Ok(())
    }

    fn with_attendee<T>(
        &self,
        code: &str,
        attendee_id: Uuid,
        f: impl FnOnce(&mut Attendee, &mut Vec<QuizEvent>, &QuestionBank) -> T,
    ) -> ClientResult<T> {
        let mut guard = self.state.lock().unwrap();
        Self::begin_write(&mut guard)?;
        let state = &mut *guard;
        let snapshot = state
            .sessions
            .get_mut(code)
            .ok_or_else(|| ClientError::NotFound(code.to_string()))?;
        let attendee = snapshot
            .attendees
            .iter_mut()
            .find(|a| a.id == attendee_id)
            .ok_or_else(|| ClientError::NotFound(attendee_id.to_string()))?;
        Ok(f(attendee, &mut state.events, &self.questions))
    }
}

#[async_trait]
impl SessionStore for FakeStore {
    async fn fetch_session(&self, code: &str) -> ClientResult<SessionSnapshot> {
        self.state
            .lock()
            .unwrap()
            .sessions
            .get(code)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(code.to_string()))
    }

    async fn create_session(&self, name: &str) -> ClientResult<Session> {
        let session = Session::new("NEWSES", name);
        let mut state = self.state.lock().unwrap();
        Self::begin_write(&mut state)?;
        state.sessions.insert(
            session.code.clone(),
            SessionSnapshot {
                session: session.clone(),
                attendees: Vec::new(),
            },
        );
        Ok(session)
    }

    async fn end_session(&self, code: &str) -> ClientResult<Session> {
        let mut guard = self.state.lock().unwrap();
        Self::begin_write(&mut guard)?;
        let state = &mut *guard;
        let snapshot = state
            .sessions
            .get_mut(code)
            .ok_or_else(|| ClientError::NotFound(code.to_string()))?;
        if snapshot.session.active {
            let ended_at = chrono::Utc::now();
            snapshot.session.end(ended_at);
            state.events.push(QuizEvent::SessionEnded {
                session_code: code.to_string(),
                ended_at,
            });
        }
        Ok(snapshot.session.clone())
    }

    async fn join(&self, code: &str, name: &str, generation: Option<String>) -> ClientResult<Attendee> {
        let mut guard = self.state.lock().unwrap();
        Self::begin_write(&mut guard)?;
        let state = &mut *guard;
        let snapshot = state
            .sessions
            .get_mut(code)
            .ok_or_else(|| ClientError::NotFound(code.to_string()))?;
        let attendee = Attendee::new(snapshot.session.id, name, generation);
        snapshot.attendees.push(attendee.clone());
        state.events.push(QuizEvent::AttendeeJoined {
            session_code: code.to_string(),
            attendee: attendee.clone(),
        });
        Ok(attendee)
    }

    async fn submit_response(
        &self,
        code: &str,
        attendee_id: Uuid,
        question_index: u32,
        answer_id: &str,
    ) -> ClientResult<Attendee> {
        self.with_attendee(code, attendee_id, |attendee, events, _| {
            attendee.record_response(question_index, answer_id);
            events.push(QuizEvent::ResponseReceived {
                session_code: code.to_string(),
                attendee_id,
                question_index,
                answer_id: answer_id.to_string(),
            });
            attendee.clone()
        })
    }

    async fn complete_attendee(&self, code: &str, attendee_id: Uuid) -> ClientResult<Attendee> {
        self.with_attendee(code, attendee_id, |attendee, events, questions| {
            if !attendee.completed {
                let responses = questions.responses_for(&attendee.responses);
                let scores = calculate_scores_or_default(&responses, questions);
                let completed_at = chrono::Utc::now();
                attendee.mark_completed(scores, completed_at);
                events.push(QuizEvent::AttendeeCompleted {
                    session_code: code.to_string(),
                    attendee_id,
                    scores,
                    completed_at,
                });
            }
            attendee.clone()
        })
    }

    async fn delete_attendee(&self, code: &str, attendee_id: Uuid) -> ClientResult<()> {
        let mut guard = self.state.lock().unwrap();
        Self::begin_write(&mut guard)?;
        let state = &mut *guard;
        let snapshot = state
            .sessions
            .get_mut(code)
            .ok_or_else(|| ClientError::NotFound(code.to_string()))?;
        let before = snapshot.attendees.len();
        snapshot.attendees.retain(|a| a.id != attendee_id);
        if snapshot.attendees.len() == before {
            return Err(ClientError::NotFound(attendee_id.to_string()));
        }
        state.events.push(QuizEvent::AttendeeDeleted {
            session_code: code.to_string(),
            attendee_id,
        });
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn test_options() -> SyncOptions {
    SyncOptions {
        pending_window: Duration::from_secs(5),
        reconcile_interval: Duration::from_millis(50),
        memo_ttl: Duration::from_secs(1),
        write_policy: BackoffPolicy::new(Duration::from_millis(1), Duration::from_millis(4), 2),
    }
}

async fn setup(code: &str) -> (Arc<FakeStore>, SessionSync<FakeStore>, Session) {
    let store = FakeStore::new();
    let session = store.seed_session(code);
    let mut sync = SessionSync::new(store.clone(), test_options());
    sync.hydrate(code).await.expect("Should hydrate");
    (store, sync, session)
}

/// Join through the sync layer and drain the join broadcast
async fn join(sync: &mut SessionSync<FakeStore>, store: &FakeStore, code: &str, name: &str, generation: Option<&str>) -> Uuid {
    let attendee = sync
        .join(code, name, generation.map(str::to_string))
        .await
        .expect("Should join");
    for event in store.take_events() {
        sync.apply_event(&event);
    }
    attendee.id
}

/// Attendee created by another client, as it arrives over the channel
fn foreign_join(session: &Session, name: &str, generation: Option<&str>) -> (Attendee, QuizEvent) {
    let attendee = Attendee::new(session.id, name, generation.map(str::to_string));
    let event = QuizEvent::AttendeeJoined {
        session_code: session.code.clone(),
        attendee: attendee.clone(),
    };
    (attendee, event)
}

fn cache_state(sync: &SessionSync<FakeStore>) -> (Option<Session>, Vec<Attendee>) {
    let cache = sync.cache();
    (
        cache.current_session().cloned(),
        cache.current_attendees().into_iter().cloned().collect(),
    )
}

// =============================================================================
// Hydration
// =============================================================================

#[tokio::test]
async fn test_hydrate_selects_session() {
    let (_, sync, session) = setup("HYDRAT").await;

    assert_eq!(sync.cache().current_session_id(), Some(session.id));
    assert!(sync.cache().current_attendees().is_empty());
    assert_eq!(sync.analytics().total_count, 0);
    assert_eq!(sync.analytics().response_rate, 0);
}

#[tokio::test]
async fn test_hydrate_unknown_session_is_not_found() {
    let store = FakeStore::new();
    let mut sync = SessionSync::new(store, test_options());

    let err = sync.hydrate("NOPE00").await.unwrap_err();
    assert!(matches!(err, ClientError::NotFound(_)));
    assert!(sync.cache().current_session().is_none());
}

#[tokio::test]
async fn test_reconnect_catches_up_missed_changes() {
    let (store, mut sync, session) = setup("CATCHU").await;
    store.insert_silently("CATCHU", Attendee::new(session.id, "Missed", None));

    sync.handle_channel_event(ChannelEvent::Disconnected {
        reason: "reset".into(),
    })
    .await
    .unwrap();
    assert_eq!(sync.connection_state(), &ConnectionState::Disconnected);

    sync.handle_channel_event(ChannelEvent::Connecting { attempt: 2 })
        .await
        .unwrap();
    assert_eq!(sync.connection_state(), &ConnectionState::Connecting);
    // Nothing fetched until the stream is actually up
    assert!(sync.cache().current_attendees().is_empty());

    sync.handle_channel_event(ChannelEvent::Connected).await.unwrap();
    assert_eq!(sync.connection_state(), &ConnectionState::Connected);
    assert_eq!(sync.cache().current_attendees().len(), 1);
    assert_eq!(sync.cache().current_attendees()[0].name, "Missed");
}

// =============================================================================
// Optimistic writes and confirmation
// =============================================================================

#[tokio::test]
async fn test_response_confirmation_does_not_double_apply() {
    let (store, mut sync, _) = setup("OPTIMI").await;
    let attendee = join(&mut sync, &store, "OPTIMI", "Ava", None).await;

    sync.submit_response(attendee, 0, "a").await.unwrap();
    assert_eq!(sync.pending().len(), 1);
    assert_eq!(sync.cache().attendee(attendee).unwrap().responses.len(), 1);
    let version = sync.cache().version();

    let events = store.take_events();
    assert_eq!(events.len(), 1);
    assert_eq!(sync.apply_event(&events[0]), EventOutcome::Confirmed);

    assert!(sync.pending().is_empty());
    let cached = sync.cache().attendee(attendee).unwrap();
    assert_eq!(cached.responses.len(), 1);
    assert_eq!(cached.responses[&0], "a");
    assert_eq!(sync.cache().version(), version);

    // Redelivery after the marker is consumed is still harmless
    assert_eq!(sync.apply_event(&events[0]), EventOutcome::Applied);
    assert_eq!(sync.cache().attendee(attendee).unwrap().responses.len(), 1);
}

#[tokio::test]
async fn test_superseded_answer_confirmation_keeps_newer_value() {
    let (store, mut sync, _) = setup("NEWERA").await;
    let attendee = join(&mut sync, &store, "NEWERA", "Ada", None).await;

    sync.submit_response(attendee, 0, "a").await.unwrap();
    sync.submit_response(attendee, 0, "b").await.unwrap();
    assert_eq!(sync.cache().attendee(attendee).unwrap().responses[&0], "b");

    let events = store.take_events();
    assert_eq!(events.len(), 2);

    assert_eq!(sync.apply_event(&events[0]), EventOutcome::Confirmed);
    assert_eq!(sync.cache().attendee(attendee).unwrap().responses[&0], "b");
    assert!(!sync.pending().is_empty());

    assert_eq!(sync.apply_event(&events[1]), EventOutcome::Confirmed);
    assert_eq!(sync.cache().attendee(attendee).unwrap().responses[&0], "b");
    assert!(sync.pending().is_empty());
}

#[tokio::test]
async fn test_completion_confirmation_keeps_aggregates_single() {
    let (store, mut sync, _) = setup("COMPLT").await;
    let first = join(&mut sync, &store, "COMPLT", "Ben", Some("gen_x")).await;
    join(&mut sync, &store, "COMPLT", "Cy", Some("gen_z")).await;

    for index in 0..12 {
        sync.submit_response(first, index, "a").await.unwrap();
    }
    let scores = sync.complete_attendee(first).await.unwrap();
    assert_eq!(scores, PreferenceScores::new(10, 10, 10, 10));

    let before = sync.analytics();
    assert_eq!(before.completed_count, 1);
    assert_eq!(before.response_rate, 50);

    let outcomes: Vec<EventOutcome> = store
        .take_events()
        .iter()
        .map(|event| sync.apply_event(event))
        .collect();
    assert_eq!(outcomes.len(), 13);
    assert!(outcomes.iter().all(|o| *o == EventOutcome::Confirmed));
    assert!(sync.pending().is_empty());

    let after = sync.analytics();
    assert_eq!(after.completed_count, 1);
    assert_eq!(after.response_rate, 50);
    assert_eq!(after.mean_scores.rounded(), PreferenceScores::new(10, 10, 10, 10));
}

#[tokio::test]
async fn test_delete_confirmed_by_broadcast() {
    let (store, mut sync, _) = setup("DELETE").await;
    let attendee = join(&mut sync, &store, "DELETE", "Dot", None).await;

    sync.delete_attendee(attendee).await.unwrap();
    assert!(sync.cache().attendee(attendee).is_none());

    let events = store.take_events();
    assert_eq!(sync.apply_event(&events[0]), EventOutcome::Confirmed);
    assert!(sync.pending().is_empty());
    assert!(sync.cache().attendee(attendee).is_none());
}

#[tokio::test]
async fn test_end_session_confirmed_by_broadcast() {
    let (store, mut sync, session) = setup("ENDSES").await;

    let ended = sync.end_session(session.id).await.unwrap();
    assert!(!ended.active);
    assert!(!sync.cache().current_session().unwrap().active);

    let events = store.take_events();
    assert_eq!(sync.apply_event(&events[0]), EventOutcome::Confirmed);

    // Answers are refused locally once the session has ended
    let (_, other_event) = foreign_join(&session, "Late", None);
    sync.apply_event(&other_event);
    let late = sync.cache().current_attendees()[0].id;
    assert!(matches!(
        sync.submit_response(late, 0, "a").await,
        Err(ClientError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_invalid_answer_rejected_before_write() {
    let (store, mut sync, _) = setup("INVALD").await;
    let attendee = join(&mut sync, &store, "INVALD", "Eli", None).await;
    let calls = store.write_calls();

    let err = sync.submit_response(attendee, 0, "z").await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidInput(_)));
    assert_eq!(store.write_calls(), calls);
    assert!(sync.pending().is_empty());
}

// =============================================================================
// Events from other clients
// =============================================================================

#[tokio::test]
async fn test_each_event_type_is_idempotent() {
    let (_, mut sync, session) = setup("IDEMPO").await;
    let (attendee, joined) = foreign_join(&session, "Fox", Some("millennial"));

    let events = vec![
        joined,
        QuizEvent::ResponseReceived {
            session_code: session.code.clone(),
            attendee_id: attendee.id,
            question_index: 2,
            answer_id: "c".into(),
        },
        QuizEvent::AttendeeCompleted {
            session_code: session.code.clone(),
            attendee_id: attendee.id,
            scores: PreferenceScores::new(1, 2, 3, 4),
            completed_at: chrono::Utc::now(),
        },
        QuizEvent::AttendeeDeleted {
            session_code: session.code.clone(),
            attendee_id: attendee.id,
        },
        QuizEvent::SessionEnded {
            session_code: session.code.clone(),
            ended_at: chrono::Utc::now(),
        },
    ];

    for event in &events {
        assert_eq!(sync.apply_event(event), EventOutcome::Applied, "{}", event.event_type());
        let once = cache_state(&sync);
        sync.apply_event(event);
        let twice = cache_state(&sync);
        assert_eq!(once, twice, "{} applied twice diverged", event.event_type());
    }

    assert!(sync.cache().current_attendees().is_empty());
    assert!(!sync.cache().current_session().unwrap().active);
    assert!(!sync.needs_refetch(session.id));
}

#[tokio::test]
async fn test_event_for_unknown_attendee_flags_refetch() {
    let (store, mut sync, session) = setup("UNKNWN").await;
    let hidden = Attendee::new(session.id, "Hidden", None);
    store.insert_silently("UNKNWN", hidden.clone());

    let outcome = sync.apply_event(&QuizEvent::ResponseReceived {
        session_code: session.code.clone(),
        attendee_id: hidden.id,
        question_index: 0,
        answer_id: "a".into(),
    });
    assert_eq!(outcome, EventOutcome::Ignored);
    assert!(sync.needs_refetch(session.id));

    assert_eq!(sync.reconcile().await.unwrap(), 1);
    assert!(!sync.needs_refetch(session.id));
    assert!(sync.cache().attendee(hidden.id).is_some());
}

#[tokio::test]
async fn test_event_for_other_session_ignored() {
    let (_, mut sync, _) = setup("MINE00").await;
    let outsider = Session::new("THEIRS", "Elsewhere");
    let (_, event) = foreign_join(&outsider, "Gil", None);

    assert_eq!(sync.apply_event(&event), EventOutcome::Ignored);
    assert!(sync.cache().current_attendees().is_empty());
}

// =============================================================================
// Failure and staleness
// =============================================================================

#[tokio::test]
async fn test_failed_write_drops_marker_and_refetches() {
    let (store, mut sync, session) = setup("FAILWR").await;
    let attendee = join(&mut sync, &store, "FAILWR", "Hal", None).await;
    let calls = store.write_calls();

    // More failures than the retry budget (1 attempt + 2 retries)
    store.fail_next_writes(3);
    let err = sync.submit_response(attendee, 0, "b").await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(store.write_calls(), calls + 3);
    assert!(sync.pending().is_empty());
    assert!(sync.needs_refetch(session.id));

    // Optimistic answer is still showing until the re-fetch
    assert_eq!(sync.cache().attendee(attendee).unwrap().responses.len(), 1);
    sync.reconcile().await.unwrap();
    assert!(sync.cache().attendee(attendee).unwrap().responses.is_empty());
}

#[tokio::test]
async fn test_write_succeeds_within_retry_budget() {
    let (store, mut sync, _) = setup("RETRYW").await;
    let attendee = join(&mut sync, &store, "RETRYW", "Ivy", None).await;

    store.fail_next_writes(2);
    sync.submit_response(attendee, 5, "d").await.unwrap();
    assert_eq!(sync.pending().len(), 1);

    let events = store.take_events();
    assert_eq!(sync.apply_event(&events[0]), EventOutcome::Confirmed);
}

#[tokio::test]
async fn test_stale_marker_triggers_refetch() {
    let store = FakeStore::new();
    let session = store.seed_session("STALEM");
    let options = SyncOptions {
        pending_window: Duration::from_millis(1),
        ..test_options()
    };
    let mut sync = SessionSync::new(store.clone(), options);
    sync.hydrate("STALEM").await.unwrap();
    let attendee = join(&mut sync, &store, "STALEM", "Jo", None).await;

    // The confirmation for this write is never delivered
    sync.submit_response(attendee, 1, "a").await.unwrap();
    store.take_events();
    std::thread::sleep(Duration::from_millis(10));

    let (_, other) = foreign_join(&session, "Kai", None);
    assert_eq!(sync.apply_event(&other), EventOutcome::Applied);
    assert!(sync.needs_refetch(session.id));

    sync.reconcile().await.unwrap();
    assert!(sync.pending().is_empty());
    assert!(!sync.needs_refetch(session.id));
    // Store never saw Kai's join, so the authoritative state wins
    assert_eq!(sync.cache().current_attendees().len(), 1);
    assert_eq!(sync.cache().attendee(attendee).unwrap().responses[&1], "a");
}

#[tokio::test]
async fn test_teardown_clears_markers() {
    let (store, mut sync, _) = setup("TEARDN").await;
    let attendee = join(&mut sync, &store, "TEARDN", "Lou", None).await;
    sync.submit_response(attendee, 0, "a").await.unwrap();
    assert!(!sync.pending().is_empty());

    sync.teardown();
    assert!(sync.pending().is_empty());
    assert_eq!(sync.connection_state(), &ConnectionState::Disconnected);
}

// =============================================================================
// Aggregates
// =============================================================================

#[tokio::test]
async fn test_four_completed_attendees_mean_scores() {
    let (_, mut sync, session) = setup("MEANS0").await;
    let scores = [
        PreferenceScores::new(8, 2, 9, 3),
        PreferenceScores::new(6, 4, 7, 5),
        PreferenceScores::new(9, 1, 8, 2),
        PreferenceScores::new(7, 3, 6, 4),
    ];

    for (i, score) in scores.iter().enumerate() {
        let (attendee, joined) = foreign_join(&session, &format!("P{}", i), None);
        sync.apply_event(&joined);
        sync.apply_event(&QuizEvent::AttendeeCompleted {
            session_code: session.code.clone(),
            attendee_id: attendee.id,
            scores: *score,
            completed_at: chrono::Utc::now(),
        });
    }

    let analytics = sync.analytics();
    assert_eq!(analytics.completed_count, 4);
    assert_eq!(analytics.response_rate, 100);
    assert_eq!(analytics.mean_scores.collaboration, 7.5);
    assert_eq!(analytics.mean_scores.formality, 2.5);
    assert_eq!(analytics.mean_scores.technology, 7.5);
    assert_eq!(analytics.mean_scores.wellness, 3.5);
    // Half away from zero
    assert_eq!(analytics.mean_scores.rounded(), PreferenceScores::new(8, 3, 8, 4));
}

#[tokio::test]
async fn test_generation_distribution_sums_to_recognized() {
    let (_, mut sync, session) = setup("GENDST").await;
    let labels = [Some("Gen Z"), Some("boomers"), Some("gen_x"), Some("gen alpha"), None, Some("millennial")];

    for (i, label) in labels.iter().enumerate() {
        let (_, joined) = foreign_join(&session, &format!("G{}", i), *label);
        sync.apply_event(&joined);
    }

    let analytics = sync.analytics();
    assert_eq!(analytics.total_count, 6);
    assert_eq!(analytics.generation_distribution.values().sum::<usize>(), 4);
    assert_eq!(analytics.generation_distribution[&Generation::BabyBoomer], 1);
    assert_eq!(analytics.active_count, 6);
}

#[tokio::test]
async fn test_response_rate_tracks_completions() {
    let (_, mut sync, session) = setup("RATE00").await;
    let mut ids = Vec::new();
    for i in 0..3 {
        let (attendee, joined) = foreign_join(&session, &format!("R{}", i), None);
        sync.apply_event(&joined);
        ids.push(attendee.id);
    }
    assert_eq!(sync.analytics().response_rate, 0);

    sync.apply_event(&QuizEvent::AttendeeCompleted {
        session_code: session.code.clone(),
        attendee_id: ids[0],
        scores: PreferenceScores::ZERO,
        completed_at: chrono::Utc::now(),
    });
    assert_eq!(sync.analytics().response_rate, 33);

    sync.apply_event(&QuizEvent::AttendeeDeleted {
        session_code: session.code.clone(),
        attendee_id: ids[1],
    });
    assert_eq!(sync.analytics().response_rate, 50);
}

// =============================================================================
// Connection loss
// =============================================================================

/// Transport that never connects, recording when each attempt was made
struct DownTransport {
    attempts: Mutex<Vec<tokio::time::Instant>>,
}

#[async_trait]
impl Transport for DownTransport {
    fn name(&self) -> &'static str {
        "down"
    }

    async fn connect(&self, _code: &str, _last_event_id: Option<u64>) -> ClientResult<MessageStream> {
        self.attempts.lock().unwrap().push(tokio::time::Instant::now());
        Err(ClientError::Status {
            status: 502,
            body: "bad gateway".into(),
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_backoff_then_terminal_failure() {
    let (_, mut sync, _) = setup("BACKOF").await;
    let transport = Arc::new(DownTransport {
        attempts: Mutex::new(Vec::new()),
    });
    let policy = BackoffPolicy::new(Duration::from_millis(500), Duration::from_secs(30), 4);
    let (rx, handle) = RealtimeChannel::new(transport.clone(), policy).spawn("BACKOF");

    let err = sync.drive(rx).await.unwrap_err();
    handle.await.unwrap();

    assert!(matches!(&err, ClientError::Fatal(message) if message.contains(CONNECTION_LOST)));
    assert_eq!(
        sync.connection_state(),
        &ConnectionState::Failed(CONNECTION_LOST.to_string())
    );

    // Failures 1-4 each scheduled a retry; failure 5 was terminal
    let attempts = transport.attempts.lock().unwrap().clone();
    assert_eq!(attempts.len(), 5);
    let gaps: Vec<Duration> = attempts.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(gaps.len(), 4);
    assert!(gaps.windows(2).all(|w| w[0] < w[1]));
    assert!(gaps[0] >= Duration::from_millis(500) && gaps[0] < Duration::from_millis(1000));
    assert!(gaps[3] >= Duration::from_millis(4000) && gaps[3] < Duration::from_millis(8000));
}
