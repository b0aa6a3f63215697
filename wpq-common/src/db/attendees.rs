//! Attendee queries
//!
//! Responses and preference scores live in JSON columns. Joins store the
//! whole record; answers and completion are conditional updates so that
//! concurrent writes to one attendee never overwrite each other.

use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

use super::sessions::{parse_timestamp, parse_uuid};
use crate::models::{Attendee, PreferenceScores, Session};
use crate::questions::QuestionBank;
use crate::scoring::calculate_scores_or_default;
use crate::{Error, Result};

/// Compare-and-set attempts before a completion gives up
const COMPLETE_MAX_ATTEMPTS: u32 = 32;

const ATTENDEE_COLUMNS: &str =
    "id, session_id, name, generation, responses, preferences, completed, joined_at, completed_at";

fn attendee_from_row(row: &SqliteRow) -> Result<Attendee> {
    let id: String = row.try_get("id")?;
    let session_id: String = row.try_get("session_id")?;
    let responses: String = row.try_get("responses")?;
    let preferences: Option<String> = row.try_get("preferences")?;
    let completed: i64 = row.try_get("completed")?;
    let joined_at: String = row.try_get("joined_at")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;

    Ok(Attendee {
        id: parse_uuid(&id, "attendees.id")?,
        session_id: parse_uuid(&session_id, "attendees.session_id")?,
        name: row.try_get("name")?,
        generation: row.try_get("generation")?,
        responses: serde_json::from_str::<BTreeMap<u32, String>>(&responses)?,
        preferences: preferences
            .as_deref()
            .map(serde_json::from_str::<PreferenceScores>)
            .transpose()?,
        completed: completed != 0,
        joined_at: parse_timestamp(&joined_at, "attendees.joined_at")?,
        completed_at: completed_at
            .as_deref()
            .map(|v| parse_timestamp(v, "attendees.completed_at"))
            .transpose()?,
    })
}

/// Create an attendee in an active session
pub async fn insert_attendee(
    pool: &SqlitePool,
    session: &Session,
    name: &str,
    generation: Option<String>,
) -> Result<Attendee> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidInput("Attendee name must not be empty".to_string()));
    }
    if !session.active {
        return Err(Error::Conflict(format!("Session {} has ended", session.code)));
    }

    let generation = generation
        .map(|g| g.trim().to_string())
        .filter(|g| !g.is_empty());
    let attendee = Attendee::new(session.id, name, generation);
    save_attendee(pool, &attendee).await?;
    debug!(session_code = %session.code, attendee_id = %attendee.id, "Attendee joined");
    Ok(attendee)
}

/// Upsert the full attendee record
pub async fn save_attendee(pool: &SqlitePool, attendee: &Attendee) -> Result<()> {
    let responses = serde_json::to_string(&attendee.responses)?;
    let preferences = attendee
        .preferences
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    sqlx::query(
        r#"
        INSERT INTO attendees (id, session_id, name, generation, responses, preferences, completed, joined_at, completed_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            generation = excluded.generation,
            responses = excluded.responses,
            preferences = excluded.preferences,
            completed = excluded.completed,
            completed_at = excluded.completed_at
        "#,
    )
    .bind(attendee.id.to_string())
    .bind(attendee.session_id.to_string())
    .bind(&attendee.name)
    .bind(&attendee.generation)
    .bind(responses)
    .bind(preferences)
    .bind(attendee.completed as i64)
    .bind(attendee.joined_at.to_rfc3339())
    .bind(attendee.completed_at.map(|t| t.to_rfc3339()))
    .execute(pool)
    .await?;

    Ok(())
}

/// Record (or overwrite) one answer in place
///
/// A single `json_set` update, guarded so that it only lands while the
/// attendee is incomplete and the session is active. Returns the record as
/// stored after the write.
pub async fn record_response(
    pool: &SqlitePool,
    session: &Session,
    attendee_id: Uuid,
    question_index: u32,
    answer_id: &str,
) -> Result<Attendee> {
    let path = format!("$.\"{}\"", question_index);
    let result = sqlx::query(
        r#"
        UPDATE attendees
        SET responses = json_set(responses, ?, ?)
        WHERE id = ? AND session_id = ? AND completed = 0
          AND EXISTS (SELECT 1 FROM sessions WHERE sessions.id = attendees.session_id AND sessions.active = 1)
        "#,
    )
    .bind(path)
    .bind(answer_id)
    .bind(attendee_id.to_string())
    .bind(session.id.to_string())
    .execute(pool)
    .await?;

    let attendee = require_attendee(pool, session.id, attendee_id).await?;
    if result.rows_affected() == 0 {
        if attendee.completed {
            return Err(Error::Conflict(format!(
                "Attendee {} already completed the quiz",
                attendee_id
            )));
        }
        return Err(Error::Conflict(format!("Session {} has ended", session.code)));
    }
    Ok(attendee)
}

/// Score the stored answers and mark the attendee complete
///
/// The completion only lands if the answers scored are still the stored
/// ones; a concurrent answer forces a re-read. Returns the record and whether
/// this call completed it (`false` when it was already complete).
pub async fn complete_attendee(
    pool: &SqlitePool,
    session_id: Uuid,
    attendee_id: Uuid,
    questions: &QuestionBank,
) -> Result<(Attendee, bool)> {
    for attempt in 1..=COMPLETE_MAX_ATTEMPTS {
        let row = sqlx::query(&format!(
            "SELECT {} FROM attendees WHERE id = ? AND session_id = ?",
            ATTENDEE_COLUMNS
        ))
        .bind(attendee_id.to_string())
        .bind(session_id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Attendee {}", attendee_id)))?;

        let mut attendee = attendee_from_row(&row)?;
        if attendee.completed {
            return Ok((attendee, false));
        }
        let scored_responses: String = row.try_get("responses")?;

        let responses = questions.responses_for(&attendee.responses);
        let scores = calculate_scores_or_default(&responses, questions);
        let completed_at = crate::time::now();

        let result = sqlx::query(
            r#"
            UPDATE attendees
            SET preferences = ?, completed = 1, completed_at = ?
            WHERE id = ? AND session_id = ? AND completed = 0 AND responses = ?
            "#,
        )
        .bind(serde_json::to_string(&scores)?)
        .bind(completed_at.to_rfc3339())
        .bind(attendee_id.to_string())
        .bind(session_id.to_string())
        .bind(scored_responses)
        .execute(pool)
        .await?;

        if result.rows_affected() == 1 {
            attendee.mark_completed(scores, completed_at);
            return Ok((attendee, true));
        }
        debug!(attendee_id = %attendee_id, attempt, "Attendee changed while completing, re-reading");
    }

    Err(Error::Conflict(format!(
        "Attendee {} kept changing during completion",
        attendee_id
    )))
}

/// Keyed read scoped to a session
pub async fn get_attendee(
    pool: &SqlitePool,
    session_id: Uuid,
    attendee_id: Uuid,
) -> Result<Option<Attendee>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM attendees WHERE id = ? AND session_id = ?",
        ATTENDEE_COLUMNS
    ))
    .bind(attendee_id.to_string())
    .bind(session_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(attendee_from_row).transpose()
}

/// Like [`get_attendee`] but a missing attendee is an error
pub async fn require_attendee(
    pool: &SqlitePool,
    session_id: Uuid,
    attendee_id: Uuid,
) -> Result<Attendee> {
    get_attendee(pool, session_id, attendee_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Attendee {}", attendee_id)))
}

/// All attendees of a session in join order
pub async fn list_attendees(pool: &SqlitePool, session_id: Uuid) -> Result<Vec<Attendee>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM attendees WHERE session_id = ? ORDER BY joined_at, id",
        ATTENDEE_COLUMNS
    ))
    .bind(session_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(attendee_from_row).collect()
}

/// Delete an attendee; returns whether a row was removed
pub async fn delete_attendee(pool: &SqlitePool, session_id: Uuid, attendee_id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM attendees WHERE id = ? AND session_id = ?")
        .bind(attendee_id.to_string())
        .bind(session_id.to_string())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
