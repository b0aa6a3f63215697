//! Server-Sent Events transport

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::StatusCode;
use std::time::Duration;

use super::{MessageStream, RawMessage, Transport};
use crate::error::{ClientError, ClientResult};

/// Incremental `text/event-stream` parser
///
/// Accepts arbitrary byte chunks; a message is dispatched on each blank line.
/// Comment lines (leading `:`) are ignored.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    id: Option<String>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every message it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<RawMessage> {
        self.buffer.extend_from_slice(chunk);
        let mut messages = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(message) = self.process_line(&line) {
                messages.push(message);
            }
        }

        messages
    }

    fn process_line(&mut self, line: &str) -> Option<RawMessage> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "id" => self.id = Some(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // retry and unknown fields are ignored
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<RawMessage> {
        let id = self.id.take();
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(RawMessage { id, event, data })
    }
}

/// Turn a byte stream into decoded messages
///
/// The stream ends with [`ClientError::Idle`] when nothing arrives (not even
/// a keep-alive comment) within `idle_timeout`.
fn decode_stream<S, B, E>(body: S, idle_timeout: Duration) -> MessageStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ClientError> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut decoder = SseDecoder::new();
        let mut body = Box::pin(body);
        loop {
            match tokio::time::timeout(idle_timeout, body.next()).await {
                Ok(Some(Ok(bytes))) => {
                    for message in decoder.push(bytes.as_ref()) {
                        yield Ok(message);
                    }
                }
                Ok(Some(Err(e))) => {
                    yield Err(e.into());
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(idle_timeout = ?idle_timeout, "SSE stream went silent");
                    yield Err(ClientError::Idle(idle_timeout));
                    break;
                }
            }
        }
    };
    Box::pin(stream)
}

/// Streams `/api/sessions/:code/events`
pub struct SseTransport {
    http_client: reqwest::Client,
    base_url: String,
    idle_timeout: Duration,
}

impl SseTransport {
    /// The client has no overall timeout; a stream stays open until the
    /// server closes it or goes silent for `idle_timeout`.
    pub fn new(base_url: &str, connect_timeout: Duration, idle_timeout: Duration) -> ClientResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("wpq-client/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            idle_timeout,
        })
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn name(&self) -> &'static str {
        "sse"
    }

    async fn connect(&self, code: &str, last_event_id: Option<u64>) -> ClientResult<MessageStream> {
        let url = format!("{}/api/sessions/{}/events", self.base_url, code);
        tracing::debug!(url = %url, last_event_id = ?last_event_id, "Opening SSE stream");

        let mut request = self
            .http_client
            .get(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream");
        if let Some(id) = last_event_id {
            request = request.header("Last-Event-ID", id.to_string());
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(format!("Session {}", code)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(decode_stream(response.bytes_stream(), self.idle_timeout))
    }
}
