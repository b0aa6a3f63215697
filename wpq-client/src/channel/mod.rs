//! Realtime channel client
//!
//! Wraps a [`Transport`] (SSE or polling) behind a uniform stream of
//! [`ChannelEvent`]s and owns reconnection: on a drop it backs off via
//! [`ConnectionTracker`] and resumes from the last seen event id, giving up
//! with [`ChannelEvent::Fatal`] once the retry budget is spent.

pub mod polling;
pub mod sse;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use wpq_common::config::{ClientConfig, TransportKind};
use wpq_common::events::{QuizEvent, CONNECTED_EVENT};

use crate::connection::{BackoffPolicy, ConnectionTracker, RetryDecision};
use crate::error::ClientResult;

pub use polling::PollingTransport;
pub use sse::{SseDecoder, SseTransport};

/// Buffered channel events between the transport task and its consumer
const CHANNEL_BUFFER: usize = 256;

/// One undecoded message as delivered by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: String,
}

pub type MessageStream = Pin<Box<dyn Stream<Item = ClientResult<RawMessage>> + Send>>;

/// Subscribe-by-session-code transport
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Open a message stream, resuming after `last_event_id` if given
    async fn connect(&self, code: &str, last_event_id: Option<u64>) -> ClientResult<MessageStream>;
}

/// What the channel reports to its consumer
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A connect attempt is starting (1-based since the last success)
    Connecting { attempt: u32 },
    Connected,
    Disconnected { reason: String },
    Event(QuizEvent),
    /// Retries exhausted; the channel task has ended
    Fatal { attempts: u32 },
}

/// Decode a message into a domain event
///
/// Control frames and messages for other sessions yield `None`; so do
/// undecodable payloads, which are logged and dropped.
pub fn decode_message(session_code: &str, message: &RawMessage) -> Option<QuizEvent> {
    if message.event.as_deref() == Some(CONNECTED_EVENT) {
        return None;
    }

    let event: QuizEvent = match serde_json::from_str(&message.data) {
        Ok(event) => event,
        Err(e) => {
            warn!(
                session_code = %session_code,
                event = ?message.event,
                "Dropping undecodable channel message: {}",
                e
            );
            return None;
        }
    };

    if !event.session_code().eq_ignore_ascii_case(session_code) {
        debug!(
            session_code = %session_code,
            other = %event.session_code(),
            "Ignoring event for another session"
        );
        return None;
    }

    Some(event)
}

/// Realtime subscription for one session
pub struct RealtimeChannel {
    transport: Arc<dyn Transport>,
    policy: BackoffPolicy,
}

impl RealtimeChannel {
    pub fn new(transport: Arc<dyn Transport>, policy: BackoffPolicy) -> Self {
        Self { transport, policy }
    }

    /// Channel with the configured transport and backoff
    pub fn from_config(config: &ClientConfig) -> ClientResult<Self> {
        let request_timeout = Duration::from_secs(config.request_timeout_secs);
        let transport: Arc<dyn Transport> = match config.transport {
            TransportKind::Sse => Arc::new(SseTransport::new(
                &config.base_url,
                request_timeout,
                Duration::from_secs(config.stream_idle_timeout_secs.max(1)),
            )?),
            TransportKind::Polling => Arc::new(PollingTransport::new(
                &config.base_url,
                Duration::from_millis(config.poll_interval_ms),
                request_timeout,
            )?),
        };
        Ok(Self::new(transport, BackoffPolicy::from_config(config)))
    }

    /// Start the connection task
    ///
    /// The task ends when the receiver is dropped, after a `Fatal` event, or
    /// when the handle is aborted.
    pub fn spawn(self, session_code: &str) -> (mpsc::Receiver<ChannelEvent>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
        let code = session_code.to_string();
        let handle = tokio::spawn(run_channel(self.transport, self.policy, code, tx));
        (rx, handle)
    }
}

async fn run_channel(
    transport: Arc<dyn Transport>,
    policy: BackoffPolicy,
    code: String,
    tx: mpsc::Sender<ChannelEvent>,
) {
    let mut tracker = ConnectionTracker::new(policy);
    let mut last_event_id: Option<u64> = None;

    while tracker.begin_connect() {
        let attempt = tracker.attempts() + 1;
        debug!(
            session_code = %code,
            transport = transport.name(),
            attempt,
            "Connecting realtime channel"
        );
        if tx.send(ChannelEvent::Connecting { attempt }).await.is_err() {
            return;
        }

        let reason = match transport.connect(&code, last_event_id).await {
            Ok(mut stream) => {
                tracker.connected();
                info!(session_code = %code, transport = transport.name(), "Realtime channel connected");
                if tx.send(ChannelEvent::Connected).await.is_err() {
                    return;
                }

                let reason = loop {
                    let next = tokio::select! {
                        next = stream.next() => next,
                        _ = tx.closed() => return,
                    };

                    match next {
                        Some(Ok(message)) => {
                            if let Some(seq) = message.id.as_deref().and_then(|id| id.parse::<u64>().ok()) {
                                last_event_id = Some(seq);
                            }
                            if let Some(event) = decode_message(&code, &message) {
                                if tx.send(ChannelEvent::Event(event)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Some(Err(e)) => break e.to_string(),
                        None => break "stream closed by server".to_string(),
                    }
                };

                if tx
                    .send(ChannelEvent::Disconnected {
                        reason: reason.clone(),
                    })
                    .await
                    .is_err()
                {
                    return;
                }
                reason
            }
            Err(e) => e.to_string(),
        };

        match tracker.record_failure() {
            RetryDecision::Retry { attempt, delay } => {
                warn!(
                    session_code = %code,
                    attempt,
                    delay_ms = delay.as_millis(),
                    reason = %reason,
                    "Realtime channel down, reconnecting after backoff"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = tx.closed() => return,
                }
            }
            RetryDecision::GiveUp { attempts } => {
                error!(
                    session_code = %code,
                    attempts,
                    reason = %reason,
                    "Realtime channel retries exhausted"
                );
                let _ = tx.send(ChannelEvent::Fatal { attempts }).await;
                return;
            }
        }
    }
}
