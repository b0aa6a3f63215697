//! Attendee endpoints: join, answer, complete, delete
//!
//! Every successful mutation is written to the store first and then
//! published, so an event never describes state the store does not have.
//! Answers and completion are conditional store updates; a write refused by
//! the store publishes nothing.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;
use uuid::Uuid;
use wpq_common::api::{JoinSessionRequest, SubmitResponseRequest};
use wpq_common::db;
use wpq_common::events::QuizEvent;
use wpq_common::Attendee;

use crate::{ApiError, ApiResult, AppState};

/// POST /api/sessions/:code/attendees
pub async fn join_session(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(request): Json<JoinSessionRequest>,
) -> ApiResult<(StatusCode, Json<Attendee>)> {
    let session = db::require_session(&state.db, &code).await?;
    let attendee = db::insert_attendee(&state.db, &session, &request.name, request.generation).await?;

    state.publish(QuizEvent::AttendeeJoined {
        session_code: session.code.clone(),
        attendee: attendee.clone(),
    });

    Ok((StatusCode::CREATED, Json(attendee)))
}

/// PUT /api/sessions/:code/attendees/:attendee_id/responses
pub async fn submit_response(
    State(state): State<AppState>,
    Path((code, attendee_id)): Path<(String, Uuid)>,
    Json(request): Json<SubmitResponseRequest>,
) -> ApiResult<Json<Attendee>> {
    let session = db::require_session(&state.db, &code).await?;
    if !session.active {
        return Err(ApiError::Conflict(format!("Session {} has ended", session.code)));
    }
    state
        .questions
        .validate_answer(request.question_index, &request.answer_id)?;

    let attendee = db::record_response(
        &state.db,
        &session,
        attendee_id,
        request.question_index,
        &request.answer_id,
    )
    .await?;

    state.publish(QuizEvent::ResponseReceived {
        session_code: session.code.clone(),
        attendee_id,
        question_index: request.question_index,
        answer_id: request.answer_id,
    });

    Ok(Json(attendee))
}

/// POST /api/sessions/:code/attendees/:attendee_id/complete
///
/// Scores are computed here from the stored responses. Completing an already
/// completed attendee returns the stored record unchanged.
pub async fn complete_attendee(
    State(state): State<AppState>,
    Path((code, attendee_id)): Path<(String, Uuid)>,
) -> ApiResult<Json<Attendee>> {
    let session = db::require_session(&state.db, &code).await?;
    let (attendee, newly_completed) =
        db::complete_attendee(&state.db, session.id, attendee_id, &state.questions).await?;
    if !newly_completed {
        return Ok(Json(attendee));
    }

    let (Some(scores), Some(completed_at)) = (attendee.preferences, attendee.completed_at) else {
        return Err(ApiError::Internal(format!(
            "Attendee {} completed without scores",
            attendee.id
        )));
    };

    info!(
        session_code = %session.code,
        attendee_id = %attendee.id,
        answered = attendee.responses.len(),
        "Attendee completed quiz"
    );

    state.publish(QuizEvent::AttendeeCompleted {
        session_code: session.code.clone(),
        attendee_id,
        scores,
        completed_at,
    });

    Ok(Json(attendee))
}

/// DELETE /api/sessions/:code/attendees/:attendee_id
pub async fn delete_attendee(
    State(state): State<AppState>,
    Path((code, attendee_id)): Path<(String, Uuid)>,
) -> ApiResult<StatusCode> {
    let session = db::require_session(&state.db, &code).await?;
    if !db::delete_attendee(&state.db, session.id, attendee_id).await? {
        return Err(ApiError::NotFound(format!("Not found: Attendee {}", attendee_id)));
    }

    state.publish(QuizEvent::AttendeeDeleted {
        session_code: session.code.clone(),
        attendee_id,
    });

    Ok(StatusCode::NO_CONTENT)
}
