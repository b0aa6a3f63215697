//! Persistent store interface
//!
//! [`SessionStore`] is the seam between the reconciliation layer and the
//! authoritative store. [`HttpSessionStore`] talks to `wpq-server`; tests
//! substitute an in-memory implementation.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use uuid::Uuid;
use wpq_common::api::{
    CreateSessionRequest, ErrorResponse, JoinSessionRequest, SubmitResponseRequest,
};
use wpq_common::config::ClientConfig;
use wpq_common::{Attendee, Session, SessionSnapshot};

use crate::error::{ClientError, ClientResult};

/// Keyed reads and writes against the authoritative store
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Session plus all attendees
    async fn fetch_session(&self, code: &str) -> ClientResult<SessionSnapshot>;

    async fn create_session(&self, name: &str) -> ClientResult<Session>;

    async fn end_session(&self, code: &str) -> ClientResult<Session>;

    /// Store assigns the attendee id
    async fn join(&self, code: &str, name: &str, generation: Option<String>) -> ClientResult<Attendee>;

    async fn submit_response(
        &self,
        code: &str,
        attendee_id: Uuid,
        question_index: u32,
        answer_id: &str,
    ) -> ClientResult<Attendee>;

    async fn complete_attendee(&self, code: &str, attendee_id: Uuid) -> ClientResult<Attendee>;

    async fn delete_attendee(&self, code: &str, attendee_id: Uuid) -> ClientResult<()>;
}

/// HTTP client for the wpq-server API
#[derive(Clone)]
pub struct HttpSessionStore {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpSessionStore {
    pub fn new(base_url: &str, timeout: Duration) -> ClientResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("wpq-client/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &ClientConfig) -> ClientResult<Self> {
        Self::new(
            &config.base_url,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn attendee_path(code: &str, attendee_id: Uuid) -> String {
        format!("/api/sessions/{}/attendees/{}", code, attendee_id)
    }
}

/// Map a response to a decoded body or a typed error
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> ClientResult<T> {
    let status = response.status();
    let body = response.text().await?;

    if status.is_success() {
        return Ok(serde_json::from_str(&body)?);
    }

    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.error)
        .unwrap_or(body);

    Err(match status {
        StatusCode::NOT_FOUND => ClientError::NotFound(message),
        StatusCode::BAD_REQUEST => ClientError::InvalidInput(message),
        _ => ClientError::Status {
            status: status.as_u16(),
            body: message,
        },
    })
}

async fn expect_success(response: reqwest::Response) -> ClientResult<()> {
    if response.status().is_success() {
        return Ok(());
    }
    decode::<serde_json::Value>(response).await.map(|_| ())
}

#[async_trait]
impl SessionStore for HttpSessionStore {
    async fn fetch_session(&self, code: &str) -> ClientResult<SessionSnapshot> {
        tracing::debug!(session_code = %code, "Fetching session snapshot");
        let response = self
            .http_client
            .get(self.url(&format!("/api/sessions/{}", code)))
            .send()
            .await?;
        decode(response).await
    }

    async fn create_session(&self, name: &str) -> ClientResult<Session> {
        let response = self
            .http_client
            .post(self.url("/api/sessions"))
            .json(&CreateSessionRequest {
                name: name.to_string(),
            })
            .send()
            .await?;
        decode(response).await
    }

    async fn end_session(&self, code: &str) -> ClientResult<Session> {
        let response = self
            .http_client
            .post(self.url(&format!("/api/sessions/{}/end", code)))
            .send()
            .await?;
        decode(response).await
    }

    async fn join(&self, code: &str, name: &str, generation: Option<String>) -> ClientResult<Attendee> {
        let response = self
            .http_client
            .post(self.url(&format!("/api/sessions/{}/attendees", code)))
            .json(&JoinSessionRequest {
                name: name.to_string(),
                generation,
            })
            .send()
            .await?;
        decode(response).await
    }

    async fn submit_response(
        &self,
        code: &str,
        attendee_id: Uuid,
        question_index: u32,
        answer_id: &str,
    ) -> ClientResult<Attendee> {
        let response = self
            .http_client
            .put(self.url(&format!("{}/responses", Self::attendee_path(code, attendee_id))))
            .json(&SubmitResponseRequest {
                question_index,
                answer_id: answer_id.to_string(),
            })
            .send()
            .await?;
        decode(response).await
    }

    async fn complete_attendee(&self, code: &str, attendee_id: Uuid) -> ClientResult<Attendee> {
        let response = self
            .http_client
            .post(self.url(&format!("{}/complete", Self::attendee_path(code, attendee_id))))
            .send()
            .await?;
        decode(response).await
    }

    async fn delete_attendee(&self, code: &str, attendee_id: Uuid) -> ClientResult<()> {
        let response = self
            .http_client
            .delete(self.url(&Self::attendee_path(code, attendee_id)))
            .send()
            .await?;
        expect_success(response).await
    }
}
