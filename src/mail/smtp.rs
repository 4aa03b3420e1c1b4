//! STARTTLS relay transport built on `lettre`.

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    transport::smtp::{self, authentication::Credentials},
};
use std::error::Error as StdError;
use std::io::ErrorKind;
use std::time::Duration;

use super::{MailError, MailTransport};
use crate::config::Config;

/// Opens a fresh STARTTLS session per message and closes it afterwards.
pub struct SmtpRelay {
    host: String,
    port: u16,
    timeout: Duration,
}

impl SmtpRelay {
    /// Relay settings taken from configuration.
    pub fn new(config: &Config) -> Self {
        Self {
            host: config.smtp_host.clone(),
            port: config.smtp_port,
            timeout: config.request_timeout,
        }
    }
}

#[async_trait]
impl MailTransport for SmtpRelay {
    async fn submit(&self, message: Message, credentials: Credentials) -> Result<(), MailError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.host)
            .map_err(classify)?
            .port(self.port)
            .credentials(credentials)
            .timeout(Some(self.timeout))
            .build();

        tracing::debug!(host = %self.host, port = self.port, "Submitting message to SMTP relay");
        transport.send(message).await.map_err(classify)?;
        Ok(())
    }
}

/// Map a transport failure onto the user-facing categories.
fn classify(error: smtp::Error) -> MailError {
    if let Some(code) = error.status()
        && let Some(mapped) = classify_code(&code.to_string())
    {
        return mapped;
    }
    if is_disconnect(&error) {
        return MailError::Disconnected;
    }
    MailError::Other(error.to_string())
}

/// Categorize an SMTP reply code.
fn classify_code(code: &str) -> Option<MailError> {
    match code {
        "530" | "534" | "535" => Some(MailError::AuthenticationFailed),
        "550" | "551" | "553" => Some(MailError::RecipientRefused),
        "421" => Some(MailError::Disconnected),
        _ => None,
    }
}

/// Whether the error chain bottoms out in a dropped connection.
fn is_disconnect(error: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(io) = err.downcast_ref::<std::io::Error>()
            && matches!(
                io.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::UnexpectedEof
                    | ErrorKind::NotConnected
            )
        {
            return true;
        }
        current = err.source();
    }
    false
}
