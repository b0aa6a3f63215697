//! Realtime delivery: Server-Sent Events and polling
//!
//! SSE frames carry `id: <seq>`, `event: <type>` and the JSON `QuizEvent` as
//! data. A stream opens with a `connected` control frame; if the client sends
//! `Last-Event-ID`, retained events after that id are replayed before live
//! events, with duplicates suppressed by sequence number.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::Stream;
use std::convert::Infallible;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use wpq_common::api::{PollQuery, PollResponse};
use wpq_common::db;
use wpq_common::events::{EventEnvelope, CONNECTED_EVENT};

use crate::{ApiResult, AppState};

fn to_sse_event(envelope: &EventEnvelope) -> Option<Event> {
    match Event::default()
        .id(envelope.seq.to_string())
        .event(envelope.event.event_type())
        .json_data(&envelope.event)
    {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(seq = envelope.seq, "Failed to encode SSE event: {}", e);
            None
        }
    }
}

fn last_event_id(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// GET /api/sessions/:code/events - SSE event stream for one session
pub async fn event_stream(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let session = db::require_session(&state.db, &code).await?;
    let code = session.code;
    let resume_from = last_event_id(&headers);

    // Subscribe before reading the log so nothing published in between is lost
    let mut rx = state.bus.subscribe();
    let replay = resume_from
        .map(|since| state.log.since(&code, since))
        .unwrap_or_default();
    let log = state.log.clone();

    info!(
        session_code = %code,
        resume_from = ?resume_from,
        replay = replay.len(),
        "New SSE client connected, total clients: {}",
        state.bus.subscriber_count()
    );

    let stream = async_stream::stream! {
        yield Ok(Event::default()
            .event(CONNECTED_EVENT)
            .data(serde_json::json!({ "session_code": code }).to_string()));

        let mut last_sent = resume_from.unwrap_or(0);
        for envelope in replay {
            last_sent = envelope.seq;
            if let Some(event) = to_sse_event(&envelope) {
                yield Ok(event);
            }
        }

        loop {
            match rx.recv().await {
                Ok(envelope) => {
                    if envelope.event.session_code() != code || envelope.seq <= last_sent {
                        continue;
                    }
                    last_sent = envelope.seq;
                    if let Some(event) = to_sse_event(&envelope) {
                        yield Ok(event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(session_code = %code, skipped, "SSE client lagged, replaying from log");
                    for envelope in log.since(&code, last_sent) {
                        last_sent = envelope.seq;
                        if let Some(event) = to_sse_event(&envelope) {
                            yield Ok(event);
                        }
                    }
                }
                Err(RecvError::Closed) => {
                    debug!(session_code = %code, "Event bus closed, ending SSE stream");
                    break;
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(state.sse_keepalive)
            .text("heartbeat"),
    ))
}

/// GET /api/sessions/:code/poll?since=N
pub async fn poll_events(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(query): Query<PollQuery>,
) -> ApiResult<Json<PollResponse>> {
    let session = db::require_session(&state.db, &code).await?;
    let since = query.since.unwrap_or(0);
    let events = state.log.since(&session.code, since);
    let latest_seq = state.log.latest_seq(&session.code).max(since);

    Ok(Json(PollResponse { events, latest_seq }))
}
