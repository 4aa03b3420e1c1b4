//! Outbound email over an authenticated SMTP relay.

mod smtp;

use async_trait::async_trait;
use lettre::{
    Address, Message,
    message::{Mailbox, MultiPart, SinglePart, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use std::sync::Arc;
use thiserror::Error;

use crate::config::Config;

pub use smtp::SmtpRelay;

/// Confirmation returned after the relay accepted a message.
pub const SENT_CONFIRMATION: &str = "邮件发送成功";

/// Errors surfaced while composing or submitting a message.
#[derive(Debug, Error)]
pub enum MailError {
    /// Sender address or app password is not configured.
    #[error("邮箱配置未设置，请检查环境变量 QQ_EMAIL 和 QQ_PASSWORD")]
    MissingCredentials,
    /// Recipient address was empty.
    #[error("目标邮箱地址不能为空")]
    EmptyRecipient,
    /// Message body was empty.
    #[error("邮件内容不能为空")]
    EmptyBody,
    /// Recipient address could not be parsed.
    #[error("目标邮箱地址无效: {0}")]
    InvalidRecipient(String),
    /// Configured sender address could not be parsed.
    #[error("发件邮箱地址无效: {0}")]
    InvalidSender(String),
    /// The relay rejected the credentials.
    #[error("邮箱认证失败，请检查QQ邮箱和授权码是否正确")]
    AuthenticationFailed,
    /// The relay refused the recipient.
    #[error("目标邮箱地址无效或被拒绝")]
    RecipientRefused,
    /// The relay dropped the connection mid-session.
    #[error("SMTP服务器连接断开")]
    Disconnected,
    /// Any other composition or transport failure.
    #[error("发送邮件时发生错误: {0}")]
    Other(String),
}

impl MailError {
    /// Whether the error stems from caller input.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyRecipient | Self::EmptyBody | Self::InvalidRecipient(_)
        )
    }
}

/// Body content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// `text/plain`.
    Plain,
    /// `text/html`.
    Html,
}

impl ContentKind {
    /// Map the request's `content_type` field; anything but `html` is plain text.
    pub fn from_request(value: &str) -> Self {
        if value == "html" { Self::Html } else { Self::Plain }
    }

    fn header(self) -> ContentType {
        match self {
            Self::Plain => ContentType::TEXT_PLAIN,
            Self::Html => ContentType::TEXT_HTML,
        }
    }
}

/// Submits one composed message. Implementations open and close their own session.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Authenticate with `credentials` and deliver `message` to its single recipient.
    async fn submit(&self, message: Message, credentials: Credentials) -> Result<(), MailError>;
}

/// Composes MIME messages from a fixed sender identity and hands them to a transport.
pub struct MailSender {
    sender: Option<String>,
    password: Option<String>,
    display_name: String,
    transport: Arc<dyn MailTransport>,
}

impl MailSender {
    /// Build a sender from configuration, submitting through `transport`.
    pub fn new(config: &Config, transport: Arc<dyn MailTransport>) -> Self {
        Self {
            sender: config.mail_sender.clone(),
            password: config.mail_password.clone(),
            display_name: config.mail_display_name.clone(),
            transport,
        }
    }

    /// Send one message to `to_address`.
    ///
    /// Every call is an independent attempt: there is no deduplication and no retry.
    pub async fn send(
        &self,
        to_address: &str,
        subject: &str,
        body: &str,
        kind: ContentKind,
    ) -> Result<String, MailError> {
        let (Some(sender), Some(password)) = (self.sender.as_deref(), self.password.as_deref())
        else {
            tracing::error!("Mail credentials are not configured");
            return Err(MailError::MissingCredentials);
        };
        if to_address.trim().is_empty() {
            return Err(MailError::EmptyRecipient);
        }
        if body.is_empty() {
            return Err(MailError::EmptyBody);
        }

        let message = self.compose(sender, to_address, subject, body, kind)?;
        let credentials = Credentials::new(sender.to_string(), password.to_string());

        match self.transport.submit(message, credentials).await {
            Ok(()) => {
                tracing::info!(to = to_address, kind = ?kind, "Mail sent");
                Ok(SENT_CONFIRMATION.to_string())
            }
            Err(error) => {
                tracing::error!(to = to_address, error = %error, "Mail delivery failed");
                Err(error)
            }
        }
    }

    fn compose(
        &self,
        sender: &str,
        to_address: &str,
        subject: &str,
        body: &str,
        kind: ContentKind,
    ) -> Result<Message, MailError> {
        let from_address: Address = sender
            .parse()
            .map_err(|error| MailError::InvalidSender(format!("{sender}: {error}")))?;
        let from = Mailbox::new(Some(self.display_name.clone()), from_address);
        let to: Mailbox = to_address
            .trim()
            .parse()
            .map_err(|error| MailError::InvalidRecipient(format!("{to_address}: {error}")))?;

        let part = SinglePart::builder()
            .header(kind.header())
            .body(body.to_string());

        Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .multipart(MultiPart::mixed().singlepart(part))
            .map_err(|error| MailError::Other(error.to_string()))
    }
}
