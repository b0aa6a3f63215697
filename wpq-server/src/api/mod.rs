//! HTTP API handlers for wpq-server

pub mod attendees;
pub mod events;
pub mod health;
pub mod questions;
pub mod sessions;

pub use attendees::{complete_attendee, delete_attendee, join_session, submit_response};
pub use events::{event_stream, poll_events};
pub use health::health_routes;
pub use questions::list_questions;
pub use sessions::{create_session, end_session, get_session};
