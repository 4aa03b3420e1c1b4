//! Gateway service wiring the LLM client, file dispatcher, and mail sender together.

use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    config::Config,
    ingest::{DispatchAnswer, DispatchModels, FileDispatcher, PdfiumRasterizer},
    llm::{DashScopeClient, LlmClient, LlmError, UploadedFile},
    mail::{ContentKind, MailError, MailSender, SmtpRelay},
};

/// Abstraction over the gateway operations used by the HTTP surface.
#[async_trait]
pub trait GatewayApi: Send + Sync {
    /// Model used when a request does not name one.
    fn default_model(&self) -> &str;

    /// Forward a single question to the chat model.
    async fn ask(
        &self,
        question: &str,
        model: &str,
        enable_search: bool,
    ) -> Result<String, LlmError>;

    /// Answer a question using uploaded files.
    async fn ask_with_files(
        &self,
        question: &str,
        files: &[UploadedFile],
    ) -> Result<DispatchAnswer, LlmError>;

    /// Send one email.
    async fn send_email(
        &self,
        to_address: &str,
        subject: &str,
        body: &str,
        kind: ContentKind,
    ) -> Result<String, MailError>;
}

/// Concrete gateway built once at startup and shared through an `Arc`.
pub struct GatewayService {
    llm: LlmClient,
    dispatcher: FileDispatcher,
    mail: MailSender,
    default_model: String,
}

impl GatewayService {
    /// Build the service against DashScope, pdfium, and the configured SMTP relay.
    pub fn new(config: &Config) -> Result<Self, LlmError> {
        let provider = Arc::new(DashScopeClient::new(config)?);
        tracing::info!("DashScope client initialized");
        let dispatcher = FileDispatcher::new(
            provider.clone(),
            provider.clone(),
            provider.clone(),
            Arc::new(PdfiumRasterizer::new()),
            DispatchModels {
                long_context: config.long_context_model.clone(),
                vision: config.vision_model.clone(),
            },
        );
        let mail = MailSender::new(config, Arc::new(SmtpRelay::new(config)));

        Ok(Self::from_parts(
            LlmClient::new(provider),
            dispatcher,
            mail,
            config.default_model.clone(),
        ))
    }

    /// Assemble the service from pre-built components.
    pub fn from_parts(
        llm: LlmClient,
        dispatcher: FileDispatcher,
        mail: MailSender,
        default_model: String,
    ) -> Self {
        Self {
            llm,
            dispatcher,
            mail,
            default_model,
        }
    }
}

#[async_trait]
impl GatewayApi for GatewayService {
    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn ask(
        &self,
        question: &str,
        model: &str,
        enable_search: bool,
    ) -> Result<String, LlmError> {
        self.llm.ask(question, model, enable_search).await
    }

    async fn ask_with_files(
        &self,
        question: &str,
        files: &[UploadedFile],
    ) -> Result<DispatchAnswer, LlmError> {
        self.dispatcher.ask_with_files(question, files).await
    }

    async fn send_email(
        &self,
        to_address: &str,
        subject: &str,
        body: &str,
        kind: ContentKind,
    ) -> Result<String, MailError> {
        self.mail.send(to_address, subject, body, kind).await
    }
}
