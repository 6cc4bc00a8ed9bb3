use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Event pushed to every connected realtime client.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum RealtimeEvent {
    #[serde(rename = "mail.queued")]
    MailQueued { id: Uuid, recipient: String },
    #[serde(rename = "mail.sent")]
    MailSent { id: Uuid, recipient: String },
    #[serde(rename = "mail.failed")]
    MailFailed {
        id: Uuid,
        error: String,
        permanent: bool,
    },
    #[serde(rename = "archive.purged")]
    ArchivePurged {
        removed: u64,
        older_than: DateTime<Utc>,
    },
}
