//! Delivery of queued prompts.
//!
//! The queue only knows the [`PromptSender`] trait. Hosts inject their own
//! implementation (any `Fn(OutboundPrompt) -> impl Future` closure works) or
//! use [`HttpPromptSender`] to post to the chat backend.

use std::future::Future;
use std::time::Duration;

use futures_util::future::BoxFuture;
use promptq_types::{EntryId, truncate_with_ellipsis};
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::retry::{parse_retry_after, should_retry};

const CONNECT_TIMEOUT_SECS: u64 = 10;
const TCP_KEEPALIVE_SECS: u64 = 60;
const MAX_ERROR_BODY_CHARS: usize = 512;

/// What the queue hands to the sender for one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPrompt {
    pub id: EntryId,
    pub content: String,
    pub session_id: Option<String>,
    pub interrupt: bool,
    /// 1 for the first try.
    pub attempt: u32,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("backend returned {status}: {body}")]
    Rejected {
        status: u16,
        body: String,
        retryable: bool,
        retry_after: Option<Duration>,
    },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("{0}")]
    Failed(String),
}

impl SendError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// False for rejections the backend is likely to keep refusing (4xx other
    /// than 408/409/429). Such failures still back off and retry; the flag is
    /// reported in logs so a bad key or session shows up there.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Rejected { retryable, .. } => *retryable,
            Self::Transport(_) | Self::Failed(_) => true,
        }
    }

    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Rejected { retry_after, .. } => *retry_after,
            Self::Transport(_) | Self::Failed(_) => None,
        }
    }
}

/// The injected asynchronous send function.
pub trait PromptSender: Send + Sync + 'static {
    fn send(&self, prompt: OutboundPrompt) -> BoxFuture<'static, Result<(), SendError>>;
}

impl<F, Fut> PromptSender for F
where
    F: Fn(OutboundPrompt) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), SendError>> + Send + 'static,
{
    fn send(&self, prompt: OutboundPrompt) -> BoxFuture<'static, Result<(), SendError>> {
        Box::pin(self(prompt))
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid backend url: {0}")]
    Url(#[from] url::ParseError),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Shared client settings for backend calls.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .user_agent(concat!("promptq/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Resolve `path` against the backend base URL, keeping any base path prefix.
pub fn endpoint(base: &str, path: &str) -> Result<Url, url::ParseError> {
    let mut base = Url::parse(base.trim())?;
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path.trim_start_matches('/'))
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
    stream: bool,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: ChatContent<'a>,
}

#[derive(Serialize)]
struct ChatContent<'a> {
    content_type: &'static str,
    parts: [&'a str; 1],
}

/// Posts each prompt as a user message to `/api/v1/sessions/chat`.
#[derive(Clone)]
pub struct HttpPromptSender {
    client: reqwest::Client,
    url: Url,
    api_key: Option<String>,
    default_session: Option<String>,
}

impl std::fmt::Debug for HttpPromptSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPromptSender")
            .field("url", &self.url.as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("default_session", &self.default_session)
            .finish_non_exhaustive()
    }
}

impl HttpPromptSender {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        default_session: Option<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        Ok(Self {
            client: http_client(timeout)?,
            url: endpoint(base_url, "api/v1/sessions/chat")?,
            api_key,
            default_session,
        })
    }

    async fn post(
        client: reqwest::Client,
        url: Url,
        api_key: Option<String>,
        session_id: Option<String>,
        prompt: OutboundPrompt,
    ) -> Result<(), SendError> {
        let body = ChatRequest {
            session_id: session_id.as_deref(),
            stream: false,
            messages: [ChatMessage {
                role: "user",
                content: ChatContent {
                    content_type: "text",
                    parts: [prompt.content.as_str()],
                },
            }],
        };

        let mut request = client.post(url).json(&body);
        if let Some(key) = api_key.as_deref() {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(entry_id = %prompt.id, attempt = prompt.attempt, "Prompt delivered");
            return Ok(());
        }

        let retryable = should_retry(status, response.headers());
        let retry_after = parse_retry_after(response.headers());
        let text = response.text().await.unwrap_or_default();
        Err(SendError::Rejected {
            status: status.as_u16(),
            body: truncate_with_ellipsis(&text, MAX_ERROR_BODY_CHARS),
            retryable,
            retry_after,
        })
    }
}

impl PromptSender for HttpPromptSender {
    fn send(&self, prompt: OutboundPrompt) -> BoxFuture<'static, Result<(), SendError>> {
        let session_id = prompt
            .session_id
            .clone()
            .or_else(|| self.default_session.clone());
        Box::pin(Self::post(
            self.client.clone(),
            self.url.clone(),
            self.api_key.clone(),
            session_id,
            prompt,
        ))
    }
}
