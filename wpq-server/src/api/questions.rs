//! Question bank endpoint

use axum::{extract::State, Json};
use wpq_common::questions::Question;

use crate::AppState;

/// GET /api/questions
pub async fn list_questions(State(state): State<AppState>) -> Json<Vec<Question>> {
    Json(state.questions.questions().to_vec())
}
