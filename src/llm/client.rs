use std::sync::Arc;

use super::{ASSISTANT_PREAMBLE, ChatMessage, ChatOptions, ChatProvider, LlmError, validate_question};

/// Forwards a single question to the chat-completion endpoint.
pub struct LlmClient {
    provider: Arc<dyn ChatProvider>,
}

impl LlmClient {
    /// Wrap a chat provider.
    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        Self { provider }
    }

    /// Ask `question` against `model`, optionally requesting retrieval augmentation.
    ///
    /// Blank questions fail without touching the network. The answer is returned verbatim.
    pub async fn ask(
        &self,
        question: &str,
        model: &str,
        enable_search: bool,
    ) -> Result<String, LlmError> {
        validate_question(question)?;

        let messages = vec![
            ChatMessage::system(ASSISTANT_PREAMBLE),
            ChatMessage::user(question),
        ];
        // The flag is only attached when requested.
        let options = ChatOptions {
            model: model.to_string(),
            enable_search: enable_search.then_some(true),
        };

        tracing::debug!(model, enable_search, "Forwarding question to chat provider");
        let answer = self.provider.complete(messages, options).await;
        if let Err(error) = &answer {
            tracing::error!(model, error = %error, "Chat completion failed");
        }
        answer
    }
}
