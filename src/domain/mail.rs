use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// A message waiting for (or done with) delivery by the mail dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboundMail {
    pub id: Uuid,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub status: MailStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MailStatus {
    Pending,
    Sent,
    Failed,
}

impl MailStatus {
    /// Sent and permanently failed mail is eligible for archive purging.
    pub fn is_finished(&self) -> bool {
        matches!(self, MailStatus::Sent | MailStatus::Failed)
    }
}

impl OutboundMail {
    pub fn new(recipient: String, subject: String, body: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            recipient: recipient.trim().to_string(),
            subject,
            body,
            status: MailStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            sent_at: None,
        }
    }
}
