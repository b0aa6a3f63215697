//! Session queries

use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use super::attendees::list_attendees;
use super::codes::{generate_session_code, normalize_session_code};
use crate::models::{Session, SessionSnapshot};
use crate::time::parse_rfc3339;
use crate::{Error, Result};

/// Attempts before giving up on finding an unused session code
const CODE_ATTEMPTS: usize = 8;

const SESSION_COLUMNS: &str = "id, code, name, active, created_at, ended_at";

pub(crate) fn parse_uuid(value: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| Error::Internal(format!("Invalid UUID in {}: {} ({})", column, value, e)))
}

pub(crate) fn parse_timestamp(
    value: &str,
    column: &str,
) -> Result<chrono::DateTime<chrono::Utc>> {
    parse_rfc3339(value)
        .ok_or_else(|| Error::Internal(format!("Invalid timestamp in {}: {}", column, value)))
}

fn session_from_row(row: &SqliteRow) -> Result<Session> {
    let id: String = row.try_get("id")?;
    let created_at: String = row.try_get("created_at")?;
    let ended_at: Option<String> = row.try_get("ended_at")?;
    let active: i64 = row.try_get("active")?;

    Ok(Session {
        id: parse_uuid(&id, "sessions.id")?,
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        active: active != 0,
        created_at: parse_timestamp(&created_at, "sessions.created_at")?,
        ended_at: ended_at
            .as_deref()
            .map(|v| parse_timestamp(v, "sessions.ended_at"))
            .transpose()?,
    })
}

/// Create a session with a fresh unique code
pub async fn create_session(pool: &SqlitePool, name: &str) -> Result<Session> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidInput("Session name must not be empty".to_string()));
    }

    for attempt in 1..=CODE_ATTEMPTS {
        let session = Session::new(generate_session_code(), name);
        let result = sqlx::query(
            "INSERT INTO sessions (id, code, name, active, created_at, ended_at) VALUES (?, ?, ?, 1, ?, NULL)",
        )
        .bind(session.id.to_string())
        .bind(&session.code)
        .bind(&session.name)
        .bind(session.created_at.to_rfc3339())
        .execute(pool)
        .await;

        match result {
            Ok(_) => {
                info!(session_code = %session.code, "Created session '{}'", session.name);
                return Ok(session);
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                debug!(attempt, "Session code collision, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(Error::Internal(format!(
        "Could not allocate a unique session code after {} attempts",
        CODE_ATTEMPTS
    )))
}

/// Keyed read by code (case-insensitive)
pub async fn get_session_by_code(pool: &SqlitePool, code: &str) -> Result<Option<Session>> {
    let row = sqlx::query(&format!("SELECT {} FROM sessions WHERE code = ?", SESSION_COLUMNS))
        .bind(normalize_session_code(code))
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(session_from_row).transpose()
}

/// Like [`get_session_by_code`] but a missing session is an error
pub async fn require_session(pool: &SqlitePool, code: &str) -> Result<Session> {
    get_session_by_code(pool, code)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Session {}", code)))
}

/// Session plus all attendees
pub async fn load_snapshot(pool: &SqlitePool, code: &str) -> Result<SessionSnapshot> {
    let session = require_session(pool, code).await?;
    let attendees = list_attendees(pool, session.id).await?;
    Ok(SessionSnapshot { session, attendees })
}

/// Flip the active flag and stamp the end time (idempotent)
pub async fn end_session(pool: &SqlitePool, code: &str) -> Result<Session> {
    let mut session = require_session(pool, code).await?;
    if !session.active {
        return Ok(session);
    }

    session.end(crate::time::now());
    sqlx::query("UPDATE sessions SET active = 0, ended_at = ? WHERE id = ?")
        .bind(session.ended_at.map(|t| t.to_rfc3339()))
        .bind(session.id.to_string())
        .execute(pool)
        .await?;

    info!(session_code = %session.code, "Session ended");
    Ok(session)
}
