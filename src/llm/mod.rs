//! Provider capabilities and the plain question-answer client.
//!
//! The gateway never talks to a vendor SDK directly. Chat completions, the remote file store,
//! and the multimodal endpoint are modelled as three small traits so the dispatch logic can
//! run against any provider (or a test double). [`DashScopeClient`] implements all three
//! over plain HTTP.

mod client;
mod dashscope;
pub mod types;

use async_trait::async_trait;
use std::path::PathBuf;

pub use client::LlmClient;
pub use dashscope::DashScopeClient;
pub use types::{
    ChatMessage, ChatOptions, ContentItem, LlmError, ProviderFileHandle, Role, UploadedFile,
};

/// System preamble sent ahead of every conversation.
pub const ASSISTANT_PREAMBLE: &str = "You are a helpful assistant.";

/// Chat-completion capability.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Run one completion and return the first choice's message text verbatim.
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        options: ChatOptions,
    ) -> Result<String, LlmError>;
}

/// Remote file-store capability used by long-context completions.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Register a file for content extraction and return its handle.
    async fn upload_file(&self, file: &UploadedFile) -> Result<ProviderFileHandle, LlmError>;

    /// Remove a previously registered file.
    async fn delete_file(&self, handle: &ProviderFileHandle) -> Result<(), LlmError>;
}

/// Multimodal capability accepting an ordered image sequence.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    /// Submit `frames` (local image files, in order) as a single video input alongside the
    /// question and return the decoded answer text.
    async fn vision_complete(
        &self,
        model: &str,
        frames: &[PathBuf],
        question: &str,
    ) -> Result<String, LlmError>;
}

/// Reject questions that are empty after trimming.
pub(crate) fn validate_question(question: &str) -> Result<(), LlmError> {
    if question.trim().is_empty() {
        return Err(LlmError::Validation("question 不能为空".into()));
    }
    Ok(())
}
