use super::realtime::RealtimeHub;
use super::supervisor::{BackgroundService, ServiceError};
use crate::domain::{MailStatus, RealtimeEvent};
use crate::infrastructure::{MailQueue, MailTransport};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub retrying: usize,
    pub failed: usize,
}

/// Drains the outbound mail queue through a [`MailTransport`].
pub struct MailDispatchService {
    queue: Arc<dyn MailQueue>,
    transport: Arc<dyn MailTransport>,
    hub: RealtimeHub,
    interval: Duration,
    batch_size: i64,
    max_attempts: i32,
}

impl MailDispatchService {
    pub fn new(
        queue: Arc<dyn MailQueue>,
        transport: Arc<dyn MailTransport>,
        hub: RealtimeHub,
        interval: Duration,
        batch_size: i64,
        max_attempts: i32,
    ) -> Self {
        Self {
            queue,
            transport,
            hub,
            interval,
            batch_size,
            max_attempts,
        }
    }

    /// Deliver one batch. Transport failures are recorded per mail; only
    /// queue errors abort the batch.
    pub async fn dispatch_batch(&self) -> Result<DispatchReport, ServiceError> {
        let batch = self.queue.claim_pending(self.batch_size).await?;
        let mut report = DispatchReport::default();

        for mail in batch {
            match self.transport.deliver(&mail).await {
                Ok(()) => {
                    self.queue.mark_sent(mail.id).await?;
                    report.sent += 1;
                    self.hub.publish(RealtimeEvent::MailSent {
                        id: mail.id,
                        recipient: mail.recipient,
                    });
                }
                Err(e) => {
                    let error = e.to_string();
                    let status = self
                        .queue
                        .mark_failed(mail.id, &error, self.max_attempts)
                        .await?;
                    let permanent = status == MailStatus::Failed;
                    if permanent {
                        report.failed += 1;
                    } else {
                        report.retrying += 1;
                    }
                    warn!(mail_id = %mail.id, error = %error, permanent, "Mail delivery failed");
                    self.hub.publish(RealtimeEvent::MailFailed {
                        id: mail.id,
                        error,
                        permanent,
                    });
                }
            }
        }

        if report != DispatchReport::default() {
            info!(
                sent = report.sent,
                retrying = report.retrying,
                failed = report.failed,
                "Mail dispatch batch finished"
            );
        }

        Ok(report)
    }
}

#[async_trait]
impl BackgroundService for MailDispatchService {
    fn name(&self) -> &'static str {
        "mail-dispatch"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run_once(&self) -> Result<(), ServiceError> {
        self.dispatch_batch().await.map(|_| ())
    }
}
