//! Startup orchestration.
//!
//! ```text
//! ConfigLoaded → DbConnecting → DbConnected → ServicesStarting → ApiRegistering → Listening
//!                      │                                               │
//!                      └──────────────── StartupFailed ←───────────────┘
//! ```
//!
//! Nothing past `DbConnecting` starts until the connection attempt has
//! resolved, and the listener is bound only after the route table and the
//! realtime channel are attached. Both suspension points are bounded by
//! configured timeouts. `StartupFailed` is terminal.

use super::cors::apply_insecure_cors;
use super::registrar::{ApiRegistrar, RegistrationError};
use super::socket::attach_realtime_channel;
use super::state::AppState;
use crate::application::{
    spawn_failure_monitor, ArchiveSweepService, BackgroundService, MailDispatchService,
    RealtimeHub, ServiceBoard, ServiceSupervisor,
};
use crate::infrastructure::{
    AppConfig, Database, DatabaseConnector, DatabaseError, LogTransport, MailTransport,
};
use async_trait::async_trait;
use axum::Router;
use config::ConfigError;
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use strum::Display;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StartupPhase {
    #[default]
    Init,
    ConfigLoaded,
    DbConnecting,
    DbConnected,
    ServicesStarting,
    ApiRegistering,
    Listening,
    StartupFailed,
}

/// Current startup phase, shared with the HTTP status endpoint.
#[derive(Clone, Default)]
pub struct PhaseTracker(Arc<Mutex<StartupPhase>>);

impl PhaseTracker {
    pub fn get(&self) -> StartupPhase {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn advance(&self, next: StartupPhase) {
        let mut phase = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if *phase == StartupPhase::StartupFailed {
            warn!(to = %next, "Ignoring phase change after startup failure");
            return;
        }
        info!(from = %*phase, to = %next, "Startup phase");
        *phase = next;
    }
}

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    Database(#[from] DatabaseError),
    #[error("database connection timed out after {0:?}")]
    DatabaseTimeout(Duration),
    #[error("API registration failed: {0}")]
    Registration(#[from] RegistrationError),
    #[error("API registration timed out after {0:?}")]
    RegistrationTimeout(Duration),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

impl StartupError {
    /// Process exit status, following the sysexits.h conventions.
    pub fn exit_code(&self) -> u8 {
        match self {
            StartupError::Config(_) => 78,
            StartupError::Database(_) | StartupError::DatabaseTimeout(_) => 69,
            StartupError::Registration(_) | StartupError::RegistrationTimeout(_) => 70,
            StartupError::Bind { .. } => 71,
            StartupError::Serve(_) => 1,
        }
    }
}

/// Produces the listening socket. Called at most once per startup.
#[async_trait]
pub trait Binder: Send + Sync {
    async fn bind(&self, addr: SocketAddr) -> std::io::Result<TcpListener>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TcpBinder;

#[async_trait]
impl Binder for TcpBinder {
    async fn bind(&self, addr: SocketAddr) -> std::io::Result<TcpListener> {
        TcpListener::bind(addr).await
    }
}

pub type ServiceFactory =
    Box<dyn Fn(&Database, &RealtimeHub) -> Vec<Arc<dyn BackgroundService>> + Send + Sync>;

/// Mail dispatch and archive sweep, configured from `config`.
pub fn default_services(config: Arc<AppConfig>, transport: Arc<dyn MailTransport>) -> ServiceFactory {
    Box::new(move |db: &Database, hub: &RealtimeHub| {
        let mail: Arc<dyn BackgroundService> = Arc::new(MailDispatchService::new(
            db.mail.clone(),
            transport.clone(),
            hub.clone(),
            config.mail_poll_interval(),
            config.mail_batch_size,
            config.mail_max_attempts,
        ));
        let archive: Arc<dyn BackgroundService> = Arc::new(ArchiveSweepService::new(
            db.archive.clone(),
            hub.clone(),
            config.archive_sweep_interval(),
            config.archive_retention_days,
        ));
        vec![mail, archive]
    })
}

pub struct Orchestrator<C, R, B> {
    config: Arc<AppConfig>,
    connector: C,
    registrar: R,
    binder: B,
    services: ServiceFactory,
    board: ServiceBoard,
    hub: RealtimeHub,
    phase: PhaseTracker,
}

impl<C, R, B> Orchestrator<C, R, B>
where
    C: DatabaseConnector,
    R: ApiRegistrar,
    B: Binder,
{
    pub fn new(config: Arc<AppConfig>, connector: C, registrar: R, binder: B) -> Self {
        let services = default_services(config.clone(), Arc::new(LogTransport));
        let phase = PhaseTracker::default();
        phase.advance(StartupPhase::ConfigLoaded);

        Self {
            config,
            connector,
            registrar,
            binder,
            services,
            board: ServiceBoard::default(),
            hub: RealtimeHub::default(),
            phase,
        }
    }

    pub fn with_services<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Database, &RealtimeHub) -> Vec<Arc<dyn BackgroundService>> + Send + Sync + 'static,
    {
        self.services = Box::new(factory);
        self
    }

    pub fn phase(&self) -> PhaseTracker {
        self.phase.clone()
    }

    pub fn hub(&self) -> RealtimeHub {
        self.hub.clone()
    }

    /// Counters of the background services this orchestrator starts.
    pub fn services(&self) -> ServiceBoard {
        self.board.clone()
    }

    /// Run the startup sequence up to a bound listener.
    pub async fn start(self) -> Result<RunningServer, StartupError> {
        let config = self.config.clone();

        if let Err(e) = config.validate() {
            return Err(self.fail(e.into()));
        }
        let addr = match config.listen_addr() {
            Ok(addr) => addr,
            Err(e) => return Err(self.fail(e.into())),
        };

        self.phase.advance(StartupPhase::DbConnecting);
        let db_timeout = config.db_connect_timeout();
        let db = match tokio::time::timeout(db_timeout, self.connector.connect()).await {
            Ok(Ok(db)) => db,
            Ok(Err(e)) => return Err(self.fail(e.into())),
            Err(_) => return Err(self.fail(StartupError::DatabaseTimeout(db_timeout))),
        };
        self.phase.advance(StartupPhase::DbConnected);

        self.phase.advance(StartupPhase::ServicesStarting);
        let (mut supervisor, failures) = ServiceSupervisor::with_board(self.board.clone());
        let failure_monitor = spawn_failure_monitor(failures);
        for service in (self.services)(&db, &self.hub) {
            supervisor.spawn(service);
        }

        self.phase.advance(StartupPhase::ApiRegistering);
        let state = AppState {
            config: config.clone(),
            db,
            hub: self.hub.clone(),
            services: supervisor.board(),
            phase: self.phase.clone(),
        };
        let register_timeout = config.api_register_timeout();
        let registered = tokio::time::timeout(
            register_timeout,
            self.registrar.register(&config.app_root, state),
        )
        .await;
        let router = match registered {
            Ok(Ok(router)) => router,
            Ok(Err(e)) => {
                supervisor.stop(config.shutdown_grace()).await;
                return Err(self.fail(e.into()));
            }
            Err(_) => {
                supervisor.stop(config.shutdown_grace()).await;
                return Err(self.fail(StartupError::RegistrationTimeout(register_timeout)));
            }
        };

        let router = attach_realtime_channel(router, self.hub.clone());
        let router = apply_insecure_cors(router, config.enable_cors_insecurely)
            .layer(TraceLayer::new_for_http());

        let listener = match self.binder.bind(addr).await {
            Ok(listener) => listener,
            Err(source) => {
                supervisor.stop(config.shutdown_grace()).await;
                return Err(self.fail(StartupError::Bind { addr, source }));
            }
        };

        self.phase.advance(StartupPhase::Listening);
        info!(
            host = %config.server_host,
            port = config.main_port,
            cors_insecure = config.enable_cors_insecurely,
            "Server listening"
        );

        Ok(RunningServer {
            listener,
            router,
            supervisor,
            failure_monitor,
            hub: self.hub,
            phase: self.phase,
            shutdown_grace: config.shutdown_grace(),
        })
    }

    fn fail(&self, err: StartupError) -> StartupError {
        error!(error = %err, phase = %self.phase.get(), "Startup failed");
        self.phase.advance(StartupPhase::StartupFailed);
        err
    }
}

/// A bound listener with its route table and running background services.
pub struct RunningServer {
    listener: TcpListener,
    router: Router,
    supervisor: ServiceSupervisor,
    failure_monitor: JoinHandle<()>,
    hub: RealtimeHub,
    phase: PhaseTracker,
    shutdown_grace: Duration,
}

impl RunningServer {
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The composed router: API routes, docs, realtime channel and layers.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn service_names(&self) -> Vec<&'static str> {
        self.supervisor.service_names()
    }

    pub fn hub(&self) -> RealtimeHub {
        self.hub.clone()
    }

    pub fn phase(&self) -> StartupPhase {
        self.phase.get()
    }

    /// Serve HTTP and the realtime channel until `shutdown` resolves, then
    /// stop the background services.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), StartupError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let served = axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await;

        info!("HTTP listener closed, stopping background services");
        self.supervisor.stop(self.shutdown_grace).await;
        let _ = tokio::time::timeout(Duration::from_secs(1), self.failure_monitor).await;

        served.map_err(StartupError::Serve)
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
