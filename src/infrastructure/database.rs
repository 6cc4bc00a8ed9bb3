use super::repository::{
    ArchiveStore, HealthProbe, MailQueue, PostgresArchiveStore, PostgresHealthProbe,
    PostgresMailQueue,
};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("connect failed: {0}")]
    Connect(#[source] sqlx::Error),
    #[error("migrations failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Capabilities backed by a live database connection.
///
/// The connection itself stays opaque; everything past startup talks to the
/// store through these trait objects.
#[derive(Clone)]
pub struct Database {
    pub probe: Arc<dyn HealthProbe>,
    pub mail: Arc<dyn MailQueue>,
    pub archive: Arc<dyn ArchiveStore>,
}

/// A single connection attempt. No retry happens here; callers decide.
#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    async fn connect(&self) -> Result<Database, DatabaseError>;
}

pub struct PostgresConnector {
    database_url: String,
    max_connections: u32,
    acquire_timeout: Duration,
    run_migrations: bool,
}

impl PostgresConnector {
    pub fn new(
        database_url: String,
        max_connections: u32,
        acquire_timeout: Duration,
        run_migrations: bool,
    ) -> Self {
        Self {
            database_url,
            max_connections,
            acquire_timeout,
            run_migrations,
        }
    }
}

#[async_trait]
impl DatabaseConnector for PostgresConnector {
    async fn connect(&self) -> Result<Database, DatabaseError> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect(&self.database_url)
            .await
            .map_err(DatabaseError::Connect)?;

        if self.run_migrations {
            sqlx::migrate!("./migrations").run(&pool).await?;
            info!("Database migrations applied");
        }

        Ok(Database {
            probe: Arc::new(PostgresHealthProbe::new(pool.clone())),
            mail: Arc::new(PostgresMailQueue::new(pool.clone())),
            archive: Arc::new(PostgresArchiveStore::new(pool)),
        })
    }
}
