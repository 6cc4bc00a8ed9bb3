use super::realtime::RealtimeHub;
use super::supervisor::{BackgroundService, ServiceError};
use crate::domain::RealtimeEvent;
use crate::infrastructure::ArchiveStore;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Periodically deletes finished mail past its retention window.
pub struct ArchiveSweepService {
    store: Arc<dyn ArchiveStore>,
    hub: RealtimeHub,
    interval: Duration,
    retention_days: i64,
}

impl ArchiveSweepService {
    pub fn new(
        store: Arc<dyn ArchiveStore>,
        hub: RealtimeHub,
        interval: Duration,
        retention_days: i64,
    ) -> Self {
        Self {
            store,
            hub,
            interval,
            retention_days,
        }
    }

    pub async fn sweep(&self) -> Result<u64, ServiceError> {
        let threshold = chrono::Duration::try_days(self.retention_days)
            .and_then(|retention| Utc::now().checked_sub_signed(retention))
            .ok_or(ServiceError::RetentionOutOfRange(self.retention_days))?;
        let removed = self.store.purge_finished_before(threshold).await?;

        if removed > 0 {
            info!(removed, older_than = %threshold, "Purged archived mail");
            self.hub.publish(RealtimeEvent::ArchivePurged {
                removed,
                older_than: threshold,
            });
        }

        Ok(removed)
    }
}

#[async_trait]
impl BackgroundService for ArchiveSweepService {
    fn name(&self) -> &'static str {
        "archive-sweep"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run_once(&self) -> Result<(), ServiceError> {
        self.sweep().await.map(|_| ())
    }
}
