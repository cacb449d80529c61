use std::time::Duration;

use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, instrument, warn};

use crate::transcript::Turn;

/// Failure talking to the remote chat-completion service.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct RemoteServiceError {
    pub kind: RemoteErrorKind,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl RemoteServiceError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, duration: Duration) -> Self {
        self.retry_after = Some(duration);
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Network, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Malformed, message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// Connection refused, DNS, TLS, reset mid-body
    Network,
    /// 401 / 403
    Auth,
    /// 429
    RateLimit,
    /// Any other non-success status
    Status,
    /// Body did not carry a usable first choice
    Malformed,
}

impl std::fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RemoteErrorKind::Network => "network failure",
            RemoteErrorKind::Auth => "authentication failed",
            RemoteErrorKind::RateLimit => "rate limited",
            RemoteErrorKind::Status => "remote error",
            RemoteErrorKind::Malformed => "malformed response",
        };
        f.write_str(label)
    }
}

// Structures matching the OpenAI-compatible /chat/completions endpoint
#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Turn],
}

#[derive(Deserialize, Debug)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    // usage, id, created, etc. are ignored
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Exchanges a transcript for one assistant reply. Holds no conversation state,
/// so one instance can serve every session.
#[derive(Debug, Clone)]
pub struct CompletionClient {
    http: Client,
    endpoint: String,
    api_key: String,
}

impl CompletionClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, RemoteServiceError> {
        // No explicit timeout: the request runs until the HTTP client gives up.
        let http = Client::builder().build().map_err(|e| {
            RemoteServiceError::network(format!("failed to build HTTP client: {e}"))
        })?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        })
    }

    /// Sends the ordered turns and waits for the complete reply. Only the first
    /// choice is used. Failures are returned as-is; nothing is retried.
    #[instrument(
        skip(self, turns),
        fields(turn_count = turns.len(), endpoint = %self.endpoint)
    )]
    pub async fn complete(
        &self,
        turns: &[Turn],
        model_name: &str,
    ) -> Result<String, RemoteServiceError> {
        let payload = ChatCompletionRequest {
            model: model_name,
            messages: turns,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to reach chat-completion API");
                RemoteServiceError::network(format!(
                    "failed to send request to {}: {e}",
                    self.endpoint
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_hint(response.headers());
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(%status, %body, "Chat-completion API request failed");
            let mut err = RemoteServiceError::new(
                classify_status(status),
                format!("request failed with status {status}: {body}"),
            );
            if let Some(delay) = retry_after {
                err = err.with_retry_after(delay);
            }
            return Err(err);
        }

        let body = response.text().await.map_err(|e| {
            RemoteServiceError::network(format!("failed to read response body: {e}"))
        })?;
        let reply = parse_reply(&body)?;

        debug!(chars = reply.len(), "Received assistant reply");
        Ok(reply)
    }
}

fn classify_status(status: StatusCode) -> RemoteErrorKind {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteErrorKind::Auth,
        StatusCode::TOO_MANY_REQUESTS => RemoteErrorKind::RateLimit,
        _ => RemoteErrorKind::Status,
    }
}

// Only the delay-seconds form is understood; HTTP dates are ignored.
fn retry_after_hint(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn parse_reply(body: &str) -> Result<String, RemoteServiceError> {
    let parsed: ChatCompletionResponse = serde_json::from_str(body).map_err(|e| {
        RemoteServiceError::malformed(format!("failed to parse response JSON: {e}"))
    })?;

    let Some(first) = parsed.choices.into_iter().next() else {
        warn!("Chat-completion response carried no choices");
        return Err(RemoteServiceError::malformed("response contained no choices"));
    };

    first
        .message
        .content
        .ok_or_else(|| RemoteServiceError::malformed("first choice has no message content"))
}
