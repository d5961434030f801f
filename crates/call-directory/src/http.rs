//! REST client for the Call Directory service

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use callrelay_signaling::{CallId, UserId};

use crate::directory::CallDirectory;
use crate::error::{DirectoryError, DirectoryResult};
use crate::types::{CallRecord, UserProfile};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

/// Call Directory reached over HTTP with a bearer token
#[derive(Debug, Clone)]
pub struct HttpCallDirectory {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpCallDirectory {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> DirectoryResult<Self> {
        Self::with_timeout(base_url, token, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> DirectoryResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(self.url(path)).bearer_auth(&self.token)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client.post(self.url(path)).bearer_auth(&self.token)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> DirectoryResult<Response> {
        let response = request.send().await?;
        let status = response.status();
        debug!("Directory {} -> {}", what, status);

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let detail = match serde_json::from_str::<ErrorBody>(&body) {
            Ok(ErrorBody {
                detail: serde_json::Value::String(s),
            }) => s,
            Ok(ErrorBody { detail }) => detail.to_string(),
            Err(_) if body.is_empty() => status.canonical_reason().unwrap_or("").to_string(),
            Err(_) => body,
        };

        Err(match status {
            StatusCode::NOT_FOUND => DirectoryError::not_found(format!("{}: {}", what, detail)),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => DirectoryError::unauthorized(detail),
            other => DirectoryError::status(other.as_u16(), detail),
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> DirectoryResult<T> {
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| DirectoryError::Decode(e.to_string()))
    }
}

#[async_trait]
impl CallDirectory for HttpCallDirectory {
    async fn create_invitation(&self, receiver_id: &UserId) -> DirectoryResult<CallRecord> {
        let request = self
            .post("/api/calls/invite")
            .json(&json!({ "receiver_id": receiver_id }));
        Self::decode(self.send(request, "invite").await?).await
    }

    async fn accept_call(&self, call_id: &CallId) -> DirectoryResult<CallRecord> {
        let request = self.post("/api/calls/accept").json(&json!({ "call_id": call_id }));
        Self::decode(self.send(request, "accept").await?).await
    }

    async fn active_calls(&self) -> DirectoryResult<Vec<CallRecord>> {
        let request = self.get("/api/calls/my-calls");
        Self::decode(self.send(request, "my-calls").await?).await
    }

    async fn user_profile(&self, user_id: &UserId) -> DirectoryResult<UserProfile> {
        let request = self.get(&format!("/api/users/{}", user_id));
        Self::decode(self.send(request, "user").await?).await
    }

    async fn mark_joined(&self, call_id: &CallId) -> DirectoryResult<()> {
        let request = self
            .post("/api/calls/mark-joined")
            .query(&[("call_id", call_id.as_str())]);
        self.send(request, "mark-joined").await?;
        Ok(())
    }

    async fn end_call(&self, call_id: &CallId, duration_seconds: u64) -> DirectoryResult<()> {
        let request = self.post("/api/calls/end").json(&json!({
            "call_id": call_id,
            "duration_seconds": duration_seconds,
        }));
        self.send(request, "end").await?;
        Ok(())
    }
}
