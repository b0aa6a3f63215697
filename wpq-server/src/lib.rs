//! wpq-server library - quiz session API and realtime event fan-out
//!
//! Owns the persistent store and publishes a [`QuizEvent`] for every
//! mutation, delivered to clients over SSE or polling.
//!
//! [`QuizEvent`]: wpq_common::events::QuizEvent

use axum::Router;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use wpq_common::config::ServerConfig;
use wpq_common::events::{EventBus, QuizEvent};
use wpq_common::questions::QuestionBank;

pub mod api;
pub mod error;
pub mod event_log;

pub use error::{ApiError, ApiResult};
use event_log::EventLog;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Live fan-out to SSE connections
    pub bus: EventBus,
    /// Sequenced, bounded history for polling and replay
    pub log: Arc<EventLog>,
    pub questions: Arc<QuestionBank>,
    pub sse_keepalive: Duration,
}

impl AppState {
    /// Create application state with the built-in question bank
    pub fn new(db: SqlitePool, config: &ServerConfig) -> Self {
        Self {
            db,
            bus: EventBus::new(config.event_bus_capacity.max(1)),
            log: Arc::new(EventLog::new(config.event_log_capacity)),
            questions: Arc::new(QuestionBank::standard()),
            sse_keepalive: Duration::from_secs(config.sse_keepalive_secs.max(1)),
        }
    }

    /// Sequence, retain and broadcast an event
    pub fn publish(&self, event: QuizEvent) {
        self.log.publish(&self.bus, event);
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{get, post, put};

    let api = Router::new()
        .route("/api/questions", get(api::list_questions))
        .route("/api/sessions", post(api::create_session))
        .route("/api/sessions/:code", get(api::get_session))
        .route("/api/sessions/:code/end", post(api::end_session))
        .route("/api/sessions/:code/attendees", post(api::join_session))
        .route(
            "/api/sessions/:code/attendees/:attendee_id",
            axum::routing::delete(api::delete_attendee),
        )
        .route(
            "/api/sessions/:code/attendees/:attendee_id/responses",
            put(api::submit_response),
        )
        .route(
            "/api/sessions/:code/attendees/:attendee_id/complete",
            post(api::complete_attendee),
        )
        .route("/api/sessions/:code/events", get(api::event_stream))
        .route("/api/sessions/:code/poll", get(api::poll_events));

    Router::new()
        .merge(api)
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
