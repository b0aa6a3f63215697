//! Session lifecycle endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use wpq_common::api::CreateSessionRequest;
use wpq_common::db;
use wpq_common::events::QuizEvent;
use wpq_common::{Session, SessionSnapshot};

use crate::{ApiResult, AppState};

/// POST /api/sessions
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<Session>)> {
    let session = db::create_session(&state.db, &request.name).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// GET /api/sessions/:code
pub async fn get_session(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Json<SessionSnapshot>> {
    Ok(Json(db::load_snapshot(&state.db, &code).await?))
}

/// POST /api/sessions/:code/end
///
/// Ending twice returns the already-ended session without a second event.
pub async fn end_session(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Json<Session>> {
    let before = db::require_session(&state.db, &code).await?;
    let session = db::end_session(&state.db, &before.code).await?;

    if before.active {
        if let Some(ended_at) = session.ended_at {
            state.publish(QuizEvent::SessionEnded {
                session_code: session.code.clone(),
                ended_at,
            });
        }
    }

    Ok(Json(session))
}
