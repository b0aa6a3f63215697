//! wpq-client library - live session mirror for presenter dashboards
//!
//! A [`SessionSync`] owns a [`SessionCache`] for the session being viewed,
//! applies realtime events from a [`channel::RealtimeChannel`] without
//! double-applying its own optimistic writes, and exposes derived
//! [`SessionAnalytics`] through memoized getters.

pub mod analytics;
pub mod cache;
pub mod channel;
pub mod connection;
pub mod error;
pub mod pending;
pub mod retry;
pub mod store;
pub mod sync;

pub use analytics::SessionAnalytics;
pub use cache::SessionCache;
pub use connection::{BackoffPolicy, ConnectionState, ConnectionTracker};
pub use error::{ClientError, ClientResult};
pub use store::{HttpSessionStore, SessionStore};
pub use sync::{EventOutcome, SessionSync};
