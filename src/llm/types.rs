//! Shared types used by the provider adapters and the request-scoped flows.

use bytes::Bytes;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors returned while talking to the LLM provider or preparing its inputs.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Caller input was rejected before any I/O took place.
    #[error("{0}")]
    Validation(String),
    /// The provider API key is not configured.
    #[error("环境变量 DASHSCOPE_API_KEY 未配置")]
    MissingApiKey,
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Provider responded with a non-success status code.
    #[error("Unexpected provider response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the provider.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// Provider response could not be interpreted.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
    /// Provider answered without any usable content.
    #[error("Vision model returned an empty response")]
    EmptyResponse,
    /// The uploaded PDF rendered to zero page images.
    #[error("PDF conversion produced no output")]
    NoPagesRendered,
    /// The PDF could not be opened or rasterized.
    #[error("Failed to render PDF: {0}")]
    Render(String),
    /// Local temporary storage failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A blocking worker task panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl LlmError {
    /// Whether the error stems from caller input rather than the provider or the host.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions and context supplied by the gateway.
    System,
    /// The end user's question.
    User,
}

/// One turn of a chat-completion conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    /// Speaker of the turn.
    pub role: Role,
    /// Raw text content.
    pub content: String,
}

impl ChatMessage {
    /// Build a system-role message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Build a user-role message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Per-call settings for a chat completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatOptions {
    /// Model identifier understood by the provider.
    pub model: String,
    /// Provider-specific retrieval augmentation flag. `None` omits the flag entirely.
    pub enable_search: Option<bool>,
}

/// A named file received with a request. Lives only for the duration of that request.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Client-supplied file name.
    pub filename: String,
    /// Buffered file contents.
    pub content: Bytes,
}

impl UploadedFile {
    /// Create a new uploaded file from its name and contents.
    pub fn new(filename: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
        }
    }

    /// Whether the file name carries a PDF extension (case-insensitive).
    pub fn is_pdf(&self) -> bool {
        self.filename.to_ascii_lowercase().ends_with(".pdf")
    }
}

/// Opaque identifier of a file registered with the provider's remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderFileHandle(pub String);

impl ProviderFileHandle {
    /// Provider-scheme reference used to point a completion at this file.
    pub fn reference(&self) -> String {
        format!("fileid://{}", self.0)
    }
}

/// First content item of a multimodal answer.
///
/// The provider returns either a structured record carrying a `text` field or a bare string;
/// anything else is kept verbatim and stringified.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ContentItem {
    /// Structured item with a text field.
    Text {
        /// Answer text.
        text: String,
    },
    /// Bare string item.
    Plain(String),
    /// Any other JSON shape.
    Other(Value),
}

impl ContentItem {
    /// Extract the answer text, returning `None` when the item carries nothing usable.
    pub fn into_text(self) -> Option<String> {
        let text = match self {
            Self::Text { text } | Self::Plain(text) => text,
            Self::Other(Value::Null) => return None,
            Self::Other(other) => other.to_string(),
        };
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}
