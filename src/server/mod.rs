//! HTTP server support (standalone + embeddable).
//!
//! - **Standalone**: `postroom-server` binary calls `run()`, which drives the
//!   [`Orchestrator`] from configuration to a listening socket.
//! - **Embedded**: host Axum app calls `router(state)` (and may nest it).

mod cors;
mod extract;
mod http;
mod http_errors;
mod http_types;
mod registrar;
mod socket;
mod startup;
mod state;

pub use cors::{apply_insecure_cors, ALLOW_HEADERS, ALLOW_METHODS, ALLOW_ORIGIN};
pub use registrar::{
    router, ApiRegistrar, OpenApiRegistrar, RegistrationError, DESCRIPTION_FILE,
    DESCRIPTION_URL, DOCS_PATH,
};
pub use socket::{attach_realtime_channel, SOCKET_PATH};
pub use startup::{
    default_services, shutdown_signal, Binder, Orchestrator, PhaseTracker, RunningServer,
    ServiceFactory, StartupError, StartupPhase, TcpBinder,
};
pub use state::AppState;

use crate::infrastructure::{AppConfig, PostgresConnector};
use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "postroom=info,tower_http=info";

/// Standalone entrypoint for the `postroom-server` binary.
///
/// Errors carry a [`StartupError`] underneath their context, so the caller
/// can pick an exit code with `downcast_ref`.
pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();
    dotenvy::dotenv().ok();

    let config = Arc::new(
        AppConfig::from_env()
            .map_err(StartupError::Config)
            .context("load config")?,
    );

    let connector = PostgresConnector::new(
        config.database_url.clone(),
        config.db_max_connections,
        config.db_connect_timeout(),
        config.run_migrations,
    );
    let orchestrator = Orchestrator::new(config.clone(), connector, OpenApiRegistrar, TcpBinder);

    let server = orchestrator.start().await.context("startup")?;
    tracing::info!(
        docs = %format!("http://{}:{}{}", config.server_host, config.main_port, DOCS_PATH),
        "API docs"
    );

    server.serve(shutdown_signal()).await.context("serve")?;
    Ok(())
}
