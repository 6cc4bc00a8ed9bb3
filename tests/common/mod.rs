//! In-memory fakes for the startup seams and the mail store.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use postroom::domain::{MailStatus, OutboundMail};
use postroom::infrastructure::{
    AppConfig, ArchiveStore, Database, DatabaseConnector, DatabaseError, HealthProbe, MailQueue,
    MailTransport, RepositoryError, TransportError,
};
use postroom::server::{router, ApiRegistrar, AppState, Binder, RegistrationError};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use uuid::Uuid;

// ============================================================================
// Call recording
// ============================================================================

#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<&'static str>>>,
}

impl Recorder {
    pub fn push(&self, event: &'static str) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }

    pub fn contains(&self, event: &str) -> bool {
        self.events.lock().unwrap().iter().any(|e| *e == event)
    }
}

// ============================================================================
// Mail store
// ============================================================================

#[derive(Clone)]
pub struct InMemoryStore {
    mails: Arc<Mutex<HashMap<Uuid, OutboundMail>>>,
    healthy: Arc<AtomicBool>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            mails: Arc::default(),
            healthy: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl InMemoryStore {
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn insert(&self, mail: OutboundMail) {
        self.mails.lock().unwrap().insert(mail.id, mail);
    }

    pub fn get(&self, id: Uuid) -> Option<OutboundMail> {
        self.mails.lock().unwrap().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.mails.lock().unwrap().len()
    }

    pub fn database(&self) -> Database {
        Database {
            probe: Arc::new(self.clone()),
            mail: Arc::new(self.clone()),
            archive: Arc::new(self.clone()),
        }
    }
}

#[async_trait]
impl HealthProbe for InMemoryStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RepositoryError::InvalidData("store offline".to_string()))
        }
    }
}

#[async_trait]
impl MailQueue for InMemoryStore {
    async fn enqueue(&self, mail: &OutboundMail) -> Result<(), RepositoryError> {
        let mut mails = self.mails.lock().unwrap();
        if mails.contains_key(&mail.id) {
            return Err(RepositoryError::InvalidData("Mail already exists".to_string()));
        }
        mails.insert(mail.id, mail.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<OutboundMail, RepositoryError> {
        self.get(id)
            .ok_or_else(|| RepositoryError::NotFound(format!("Mail {}", id)))
    }

    async fn claim_pending(&self, limit: i64) -> Result<Vec<OutboundMail>, RepositoryError> {
        let mails = self.mails.lock().unwrap();
        let mut pending: Vec<OutboundMail> = mails
            .values()
            .filter(|m| m.status == MailStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|m| m.created_at);
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn mark_sent(&self, id: Uuid) -> Result<(), RepositoryError> {
        let mut mails = self.mails.lock().unwrap();
        let mail = mails
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("Mail {}", id)))?;
        let now = Utc::now();
        mail.status = MailStatus::Sent;
        mail.attempts += 1;
        mail.last_error = None;
        mail.sent_at = Some(now);
        mail.updated_at = now;
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        max_attempts: i32,
    ) -> Result<MailStatus, RepositoryError> {
        let mut mails = self.mails.lock().unwrap();
        let mail = mails
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("Mail {}", id)))?;
        mail.attempts += 1;
        mail.last_error = Some(error.to_string());
        mail.status = if mail.attempts >= max_attempts {
            MailStatus::Failed
        } else {
            MailStatus::Pending
        };
        mail.updated_at = Utc::now();
        Ok(mail.status)
    }
}

#[async_trait]
impl ArchiveStore for InMemoryStore {
    async fn purge_finished_before(
        &self,
        threshold: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let mut mails = self.mails.lock().unwrap();
        let before = mails.len();
        mails.retain(|_, m| !(m.status.is_finished() && m.updated_at < threshold));
        Ok((before - mails.len()) as u64)
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Fails the first `failures` deliveries, then succeeds.
#[derive(Default)]
pub struct FlakyTransport {
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyTransport {
    pub fn failing(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailTransport for FlakyTransport {
    async fn deliver(&self, _mail: &OutboundMail) -> Result<(), TransportError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            Err(TransportError::Unavailable(format!("relay down ({})", n)))
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// Startup seams
// ============================================================================

pub struct FakeConnector {
    pub store: InMemoryStore,
    pub recorder: Recorder,
    pub delay: Duration,
    pub fail: bool,
}

impl FakeConnector {
    pub fn healthy(store: InMemoryStore, recorder: Recorder) -> Self {
        Self {
            store,
            recorder,
            delay: Duration::ZERO,
            fail: false,
        }
    }
}

#[async_trait]
impl DatabaseConnector for FakeConnector {
    async fn connect(&self) -> Result<Database, DatabaseError> {
        self.recorder.push("db_connecting");
        tokio::time::sleep(self.delay).await;
        if self.fail {
            self.recorder.push("db_failed");
            return Err(DatabaseError::Connect(sqlx::Error::PoolTimedOut));
        }
        self.recorder.push("db_connected");
        Ok(self.store.database())
    }
}

/// Registers the real route table after `delay`, unless told to fail.
#[derive(Clone, Default)]
pub struct FakeRegistrar {
    pub recorder: Recorder,
    pub fail: bool,
    pub delay: Duration,
}

#[async_trait]
impl ApiRegistrar for FakeRegistrar {
    async fn register(&self, _app_root: &Path, state: AppState) -> Result<axum::Router, RegistrationError> {
        self.recorder.push("register");
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(RegistrationError::Empty);
        }
        router(state)
    }
}

/// Records requested addresses, binds an ephemeral loopback port instead.
#[derive(Clone, Default)]
pub struct FakeBinder {
    pub recorder: Recorder,
    pub requested: Arc<Mutex<Vec<SocketAddr>>>,
}

impl FakeBinder {
    pub fn requested(&self) -> Vec<SocketAddr> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl Binder for FakeBinder {
    async fn bind(&self, addr: SocketAddr) -> std::io::Result<TcpListener> {
        self.recorder.push("bind");
        self.requested.lock().unwrap().push(addr);
        TcpListener::bind("127.0.0.1:0").await
    }
}

// ============================================================================
// Config
// ============================================================================

pub fn test_config(extra: &[(&str, &str)]) -> AppConfig {
    let mut vars: HashMap<String, String> = HashMap::new();
    vars.insert(
        "POSTROOM_DATABASE_URL".to_string(),
        "postgres://localhost/postroom_test".to_string(),
    );
    vars.insert("POSTROOM_MAIN_PORT".to_string(), "4000".to_string());
    vars.insert("POSTROOM_SHUTDOWN_GRACE_SECS".to_string(), "1".to_string());
    for (k, v) in extra {
        vars.insert(k.to_string(), v.to_string());
    }
    AppConfig::from_env_map(vars).expect("test config loads")
}
