//! SQLite persistent store
//!
//! The store is authoritative; client caches only mirror it. Conflicting
//! writes resolve as last-write-wins.

pub mod attendees;
pub mod codes;
pub mod init;
pub mod sessions;

pub use attendees::*;
pub use codes::{generate_session_code, normalize_session_code};
pub use init::*;
pub use sessions::*;
