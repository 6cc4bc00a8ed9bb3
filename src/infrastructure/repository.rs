use crate::domain::{MailStatus, OutboundMail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Liveness check against whatever store backs the service.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn ping(&self) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait MailQueue: Send + Sync {
    #[must_use]
    async fn enqueue(&self, mail: &OutboundMail) -> Result<(), RepositoryError>;
    #[must_use]
    async fn get_by_id(&self, id: Uuid) -> Result<OutboundMail, RepositoryError>;
    /// Lease up to `limit` pending mails, oldest first. Leased rows are
    /// invisible to other dispatchers until marked or the lease expires.
    #[must_use]
    async fn claim_pending(&self, limit: i64) -> Result<Vec<OutboundMail>, RepositoryError>;
    #[must_use]
    async fn mark_sent(&self, id: Uuid) -> Result<(), RepositoryError>;
    /// Record a delivery failure. Returns the new status: `Failed` once
    /// `max_attempts` is reached, otherwise `Pending` for a retry.
    #[must_use]
    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        max_attempts: i32,
    ) -> Result<MailStatus, RepositoryError>;
}

#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Delete sent/failed mail last touched before `threshold`.
    #[must_use]
    async fn purge_finished_before(
        &self,
        threshold: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;
}

pub struct PostgresHealthProbe {
    pool: PgPool,
}

impl PostgresHealthProbe {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HealthProbe for PostgresHealthProbe {
    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}

pub struct PostgresMailQueue {
    pool: PgPool,
}

impl PostgresMailQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MailQueue for PostgresMailQueue {
    async fn enqueue(&self, mail: &OutboundMail) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO outbound_mail
                (id, recipient, subject, body, status, attempts, last_error, created_at, updated_at, sent_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(mail.id)
        .bind(&mail.recipient)
        .bind(&mail.subject)
        .bind(&mail.body)
        .bind(mail.status.to_string())
        .bind(mail.attempts)
        .bind(&mail.last_error)
        .bind(mail.created_at)
        .bind(mail.updated_at)
        .bind(mail.sent_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<OutboundMail, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, recipient, subject, body, status, attempts, last_error, created_at, updated_at, sent_at
            FROM outbound_mail
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => RepositoryError::NotFound(format!("Mail {}", id)),
            _ => RepositoryError::DatabaseError(e),
        })?;

        row_to_mail(&row)
    }

    async fn claim_pending(&self, limit: i64) -> Result<Vec<OutboundMail>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            UPDATE outbound_mail
            SET locked_until = NOW() + INTERVAL '5 minutes'
            WHERE id IN (
                SELECT id
                FROM outbound_mail
                WHERE status = 'pending' AND (locked_until IS NULL OR locked_until < NOW())
                ORDER BY created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, recipient, subject, body, status, attempts, last_error, created_at, updated_at, sent_at
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut mails = rows.iter().map(row_to_mail).collect::<Result<Vec<_>, _>>()?;
        mails.sort_by_key(|m| m.created_at);
        Ok(mails)
    }

    async fn mark_sent(&self, id: Uuid) -> Result<(), RepositoryError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE outbound_mail
            SET status = 'sent', attempts = attempts + 1, last_error = NULL, locked_until = NULL,
                sent_at = $1, updated_at = $1
            WHERE id = $2
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("Mail {}", id)));
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        max_attempts: i32,
    ) -> Result<MailStatus, RepositoryError> {
        let row = sqlx::query(
            r#"
            UPDATE outbound_mail
            SET attempts = attempts + 1,
                last_error = $1,
                locked_until = NULL,
                status = CASE WHEN attempts + 1 >= $2 THEN 'failed' ELSE 'pending' END,
                updated_at = $3
            WHERE id = $4
            RETURNING status
            "#,
        )
        .bind(error)
        .bind(max_attempts)
        .bind(Utc::now())
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => RepositoryError::NotFound(format!("Mail {}", id)),
            _ => RepositoryError::DatabaseError(e),
        })?;

        let status: String = row.try_get("status")?;
        parse_status(&status)
    }
}

pub struct PostgresArchiveStore {
    pool: PgPool,
}

impl PostgresArchiveStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ArchiveStore for PostgresArchiveStore {
    async fn purge_finished_before(
        &self,
        threshold: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r#"
            DELETE FROM outbound_mail
            WHERE status IN ('sent', 'failed') AND updated_at < $1
            "#,
        )
        .bind(threshold)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

fn parse_status(status: &str) -> Result<MailStatus, RepositoryError> {
    MailStatus::from_str(status)
        .map_err(|_| RepositoryError::InvalidData(format!("Unknown mail status: {}", status)))
}

fn row_to_mail(row: &sqlx::postgres::PgRow) -> Result<OutboundMail, RepositoryError> {
    let status: String = row.try_get("status")?;

    Ok(OutboundMail {
        id: row.try_get("id")?,
        recipient: row.try_get("recipient")?,
        subject: row.try_get("subject")?,
        body: row.try_get("body")?,
        status: parse_status(&status)?,
        attempts: row.try_get("attempts")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        sent_at: row.try_get("sent_at")?,
    })
}
