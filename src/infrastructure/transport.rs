use crate::domain::OutboundMail;
use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("recipient rejected: {0}")]
    Rejected(String),
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Hands a message to whatever actually delivers it.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(&self, mail: &OutboundMail) -> Result<(), TransportError>;
}

/// Delivery through the log. Used when no relay is wired in.
#[derive(Debug, Default, Clone)]
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn deliver(&self, mail: &OutboundMail) -> Result<(), TransportError> {
        if mail.recipient.is_empty() {
            return Err(TransportError::Rejected("empty recipient".to_string()));
        }

        info!(
            mail_id = %mail.id,
            recipient = %mail.recipient,
            subject = %mail.subject,
            bytes = mail.body.len(),
            "Delivered mail"
        );
        Ok(())
    }
}
