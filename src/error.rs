//! Crate-wide error types, one flat enum per component.
//!
//! Each fallible public entry point returns one of these concrete types rather
//! than a boxed trait object, mirroring the single `ProviderError` the teacher
//! threads through every `LLMProvider` method.

/// Errors from the SSE codec (C1): encoding only, decoding never fails.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("retry value is not a valid non-negative integer: {0}")]
    InvalidRetry(String),
}

/// Errors surfaced by the bot client (C2) while performing or retrying a query.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transient failure talking to a remote bot. Retried subject to policy.
    #[error("bot error: {0}")]
    BotError(String),

    /// Terminal failure (bad protocol framing, explicit allow_retry=false). Never retried.
    #[error("bot error (no retry): {0}")]
    BotErrorNoRetry(String),

    /// Response `Content-Type` did not begin with `text/event-stream`.
    #[error("invalid content type: expected text/event-stream, got {0}")]
    InvalidContentType(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// Transient failures are retried; BotErrorNoRetry and content-type
    /// mismatches are fatal regardless of attempts remaining.
    pub fn is_retryable_kind(&self) -> bool {
        !matches!(
            self,
            ClientError::BotErrorNoRetry(_) | ClientError::InvalidContentType(_)
        )
    }

    /// Spec §4.2's retry-after-partial carve-out: connection-aborted or
    /// read-timeout transport errors may be retried even after bytes were
    /// already yielded on this attempt.
    pub fn is_connection_abort_like(&self) -> bool {
        match self {
            ClientError::Network(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// Construction-time misuse of the server dispatcher. Never reaches the wire.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("unsupported request type: {0}")]
    UnsupportedRequestType(String),

    #[error(transparent)]
    InvalidSettings(#[from] InvalidBotSettings),

    #[error("http {status}: {message}")]
    Http {
        status: u16,
        message: String,
        headers: Vec<(String, String)>,
    },
}

impl ServerError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        ServerError::Http {
            status,
            message: message.into(),
            headers: Vec::new(),
        }
    }

    pub fn http_with_headers(
        status: u16,
        message: impl Into<String>,
        headers: Vec<(String, String)>,
    ) -> Self {
        ServerError::Http {
            status,
            message: message.into(),
            headers,
        }
    }
}

/// Settings response failed validation.
#[derive(Debug, thiserror::Error)]
#[error("invalid bot settings: {0}")]
pub struct InvalidBotSettings(pub String);

/// Attachment upload failed; surfaced as a final `error` event in the stream.
#[derive(Debug, thiserror::Error)]
#[error("attachment upload failed: {0}")]
pub struct AttachmentUploadError(pub String);

/// Errors raised while the driver pumps a handler's event stream.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("send timeout writing event to peer")]
    SendTimeout,

    #[error("handler error: {0}")]
    Handler(String),

    #[error(transparent)]
    Attachment(#[from] AttachmentUploadError),
}

/// Errors from the tool orchestrator (C3).
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("failed to parse tool call arguments: {0}")]
    ArgumentsNotJson(#[from] serde_json::Error),

    #[error(transparent)]
    Client(#[from] ClientError),
}
