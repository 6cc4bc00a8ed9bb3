//! Long-running background services with an explicit start/stop contract.
//!
//! Each service is ticked on its own tokio task. A failing tick is counted,
//! logged and reported on the failure channel; the task keeps running.
//! Stopping signals every task and waits up to a grace period before
//! aborting stragglers.

use crate::infrastructure::{RepositoryError, TransportError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Retention of {0} days is out of range")]
    RetentionOutOfRange(i64),
    #[error("Service panicked: {0}")]
    Panicked(String),
}

#[async_trait]
pub trait BackgroundService: Send + Sync + 'static {
    fn name(&self) -> &'static str;
    fn interval(&self) -> Duration;
    async fn run_once(&self) -> Result<(), ServiceError>;
}

#[derive(Debug, Clone)]
pub struct ServiceFailure {
    pub service: &'static str,
    pub error: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ServiceStatus {
    pub running: bool,
    pub runs: u64,
    pub failures: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Shared view of per-service counters.
#[derive(Clone, Default)]
pub struct ServiceBoard {
    inner: Arc<Mutex<BTreeMap<&'static str, ServiceStatus>>>,
}

impl ServiceBoard {
    pub fn snapshot(&self) -> BTreeMap<&'static str, ServiceStatus> {
        self.lock().clone()
    }

    pub fn get(&self, name: &str) -> Option<ServiceStatus> {
        self.lock().get(name).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<&'static str, ServiceStatus>> {
        // A poisoned board only means a panic mid-update; the counters are still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn mark_started(&self, name: &'static str) {
        self.lock().entry(name).or_default().running = true;
    }

    fn mark_stopped(&self, name: &'static str) {
        if let Some(status) = self.lock().get_mut(name) {
            status.running = false;
        }
    }

    fn record(&self, name: &'static str, outcome: Result<(), &ServiceError>) {
        let mut board = self.lock();
        let status = board.entry(name).or_default();
        status.runs += 1;
        status.last_run_at = Some(Utc::now());
        if let Err(e) = outcome {
            status.failures += 1;
            status.last_error = Some(e.to_string());
        }
    }
}

pub struct ServiceSupervisor {
    stop_tx: watch::Sender<bool>,
    failures: mpsc::UnboundedSender<ServiceFailure>,
    board: ServiceBoard,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl ServiceSupervisor {
    /// The receiver gets one [`ServiceFailure`] per failed tick.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServiceFailure>) {
        Self::with_board(ServiceBoard::default())
    }

    /// Like [`ServiceSupervisor::new`], reporting into an existing board.
    pub fn with_board(board: ServiceBoard) -> (Self, mpsc::UnboundedReceiver<ServiceFailure>) {
        let (stop_tx, _) = watch::channel(false);
        let (failures, failures_rx) = mpsc::unbounded_channel();
        (
            Self {
                stop_tx,
                failures,
                board,
                tasks: Vec::new(),
            },
            failures_rx,
        )
    }

    pub fn board(&self) -> ServiceBoard {
        self.board.clone()
    }

    pub fn service_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|(name, _)| *name).collect()
    }

    pub fn spawn(&mut self, service: Arc<dyn BackgroundService>) {
        let name = service.name();
        let mut stop_rx = self.stop_tx.subscribe();
        let failures = self.failures.clone();
        let board = self.board.clone();

        board.mark_started(name);
        info!(service = name, interval = ?service.interval(), "Starting background service");

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(service.interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let outcome = run_guarded(&service).await;
                        board.record(name, outcome.as_ref().map(|_| ()));
                        if let Err(e) = outcome {
                            warn!(service = name, error = %e, "Background service run failed");
                            let _ = failures.send(ServiceFailure {
                                service: name,
                                error: e.to_string(),
                                at: Utc::now(),
                            });
                        }
                    }
                }
            }

            board.mark_stopped(name);
            info!(service = name, "Background service stopped");
        });

        self.tasks.push((name, handle));
    }

    /// Signal every service to stop and wait for them, aborting any still
    /// running once `grace` has elapsed.
    pub async fn stop(self, grace: Duration) {
        let _ = self.stop_tx.send(true);
        // No deadline when the grace period is too large to represent.
        let deadline = Instant::now().checked_add(grace);

        for (name, mut handle) in self.tasks {
            let finished = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, &mut handle).await.is_ok(),
                None => {
                    let _ = (&mut handle).await;
                    true
                }
            };
            if !finished {
                warn!(service = name, "Background service did not stop in time, aborting");
                handle.abort();
                self.board.mark_stopped(name);
            }
        }
    }
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run one tick on its own task so a panic is reported as a failure
/// instead of ending the service loop.
async fn run_guarded(service: &Arc<dyn BackgroundService>) -> Result<(), ServiceError> {
    let service = service.clone();
    let mut tick = AbortOnDrop(tokio::spawn(async move { service.run_once().await }));

    match (&mut tick.0).await {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => Err(ServiceError::Panicked(panic_message(e.into_panic()))),
        Err(e) => Err(ServiceError::Panicked(e.to_string())),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => message.to_string(),
            Err(_) => "unknown panic".to_string(),
        },
    }
}

/// Drain the failure channel into the log until every sender is gone.
pub fn spawn_failure_monitor(mut rx: mpsc::UnboundedReceiver<ServiceFailure>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(failure) = rx.recv().await {
            error!(
                service = failure.service,
                error = %failure.error,
                at = %failure.at,
                "Background service failure"
            );
        }
    })
}
