//! Short-interval polling transport
//!
//! Polls `/api/sessions/:code/poll?since=N` and replays each returned envelope
//! as a message, so the channel treats both transports alike.

use async_trait::async_trait;
use std::time::Duration;
use wpq_common::api::PollResponse;

use super::{MessageStream, RawMessage, Transport};
use crate::error::{ClientError, ClientResult};

pub struct PollingTransport {
    http_client: reqwest::Client,
    base_url: String,
    interval: Duration,
}

impl PollingTransport {
    pub fn new(base_url: &str, interval: Duration, request_timeout: Duration) -> ClientResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("wpq-client/", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            interval,
        })
    }
}

async fn poll_once(
    http_client: &reqwest::Client,
    url: &str,
    since: Option<u64>,
) -> ClientResult<PollResponse> {
    let mut request = http_client.get(url);
    if let Some(since) = since {
        request = request.query(&[("since", since)]);
    }

    let response = request.send().await?;
    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ClientError::NotFound(url.to_string()));
    }
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ClientError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(serde_json::from_str(&body)?)
}

/// One message per envelope, ids carrying the sequence number
fn to_messages(poll: &PollResponse) -> ClientResult<Vec<RawMessage>> {
    poll.events
        .iter()
        .map(|envelope| {
            Ok(RawMessage {
                id: Some(envelope.seq.to_string()),
                event: Some(envelope.event.event_type().to_string()),
                data: serde_json::to_string(&envelope.event)?,
            })
        })
        .collect()
}

#[async_trait]
impl Transport for PollingTransport {
    fn name(&self) -> &'static str {
        "polling"
    }

    /// The first poll happens here so an unreachable server or unknown
    /// session fails the connect rather than the stream.
    async fn connect(&self, code: &str, last_event_id: Option<u64>) -> ClientResult<MessageStream> {
        let url = format!("{}/api/sessions/{}/poll", self.base_url, code);
        let first = poll_once(&self.http_client, &url, last_event_id).await?;

        // Without a resume point, history is covered by hydration
        let initial = if last_event_id.is_some() {
            to_messages(&first)?
        } else {
            Vec::new()
        };
        let mut cursor = first.latest_seq;

        let http_client = self.http_client.clone();
        let interval = self.interval;

        let stream = async_stream::stream! {
            for message in initial {
                yield Ok(message);
            }

            loop {
                tokio::time::sleep(interval).await;
                match poll_once(&http_client, &url, Some(cursor)).await {
                    Ok(poll) => {
                        cursor = cursor.max(poll.latest_seq);
                        match to_messages(&poll) {
                            Ok(messages) => {
                                for message in messages {
                                    yield Ok(message);
                                }
                            }
                            Err(e) => {
                                yield Err(e);
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
