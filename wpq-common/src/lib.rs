//! # WPQ Common Library
//!
//! Shared code for the WPQ quiz server and client including:
//! - Session / attendee data model
//! - Question bank and preference scoring engine
//! - Realtime event types (QuizEvent enum) and EventBus
//! - API request/response types
//! - Configuration loading
//! - SQLite persistent store (behind the `sqlx` feature)

pub mod api;
pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;
pub mod models;
pub mod questions;
pub mod scoring;
pub mod time;

pub use error::{Error, Result};
pub use models::{Attendee, Generation, PreferenceScores, Session, SessionSnapshot};
