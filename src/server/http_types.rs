use crate::application::ServiceStatus;
use crate::domain::OutboundMail;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Serialize, ToSchema)]
pub(super) struct HealthResponse {
    pub(super) status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) error: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub(super) struct StatusResponse {
    #[schema(example = "listening")]
    pub(super) phase: String,
    pub(super) cors_insecure: bool,
    pub(super) realtime_clients: usize,
    #[schema(value_type = Object)]
    pub(super) services: BTreeMap<&'static str, ServiceStatus>,
}

#[derive(Deserialize, Validate, ToSchema)]
pub(super) struct EnqueueMailRequest {
    #[validate(email)]
    #[schema(example = "someone@example.com")]
    pub(super) recipient: String,
    #[validate(length(min = 1, max = 998))]
    #[schema(example = "Your archive is ready")]
    pub(super) subject: String,
    #[validate(length(max = 1048576))]
    #[serde(default)]
    pub(super) body: String,
}

#[derive(Serialize, ToSchema)]
pub(super) struct EnqueueMailResponse {
    pub(super) id: Uuid,
    #[schema(example = "pending")]
    pub(super) status: String,
}

#[derive(Serialize, ToSchema)]
pub(super) struct MailResponse {
    pub(super) id: Uuid,
    pub(super) recipient: String,
    pub(super) subject: String,
    pub(super) status: String,
    pub(super) attempts: i32,
    pub(super) last_error: Option<String>,
    pub(super) created_at: chrono::DateTime<chrono::Utc>,
    pub(super) updated_at: chrono::DateTime<chrono::Utc>,
    #[schema(format = "date-time")]
    pub(super) sent_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<OutboundMail> for MailResponse {
    fn from(mail: OutboundMail) -> Self {
        Self {
            id: mail.id,
            recipient: mail.recipient,
            subject: mail.subject,
            status: mail.status.to_string(),
            attempts: mail.attempts,
            last_error: mail.last_error,
            created_at: mail.created_at,
            updated_at: mail.updated_at,
            sent_at: mail.sent_at,
        }
    }
}
