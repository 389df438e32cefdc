use std::time::Duration;

use cask_core::config::QueueConfig;
use cask_core::job::{Job, JobFailure, JobId, Lease, QueueClient, QueueStats, RetryConfig};
use cask_core::{CaskError, Result};
use futures::future::BoxFuture;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tokio::time::Instant;
use uuid::Uuid;

/// Floor for the claim polling interval when the queue is built in code.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Postgres-backed queue shared by every process pointed at the same database.
///
/// Rows in `cask_jobs` move between `pending`, `leased` and `dead_letter`.
/// A pending row whose `run_at` is in the future is a delayed retry.
#[derive(Clone)]
pub struct PgQueue {
    pool: PgPool,
    retry: RetryConfig,
    lease_ttl: Duration,
    poll_interval: Duration,
}

impl PgQueue {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool, config: &QueueConfig) -> Self {
        Self {
            pool,
            retry: config.retry.clone(),
            lease_ttl: Duration::from_secs(config.lease_ttl_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms).max(MIN_POLL_INTERVAL),
        }
    }

    /// Connect to the configured database.
    pub async fn connect(config: &QueueConfig) -> Result<Self> {
        let pool = pool_options(config)
            .connect(database_url(config)?)
            .await
            .map_err(|e| CaskError::QueueUnavailable(format!("Failed to connect: {}", e)))?;
        Ok(Self::new(pool, config))
    }

    /// Build the queue without opening a connection until first use.
    pub fn connect_lazy(config: &QueueConfig) -> Result<Self> {
        let pool = pool_options(config)
            .connect_lazy(database_url(config)?)
            .map_err(|e| CaskError::Config(format!("Invalid queue url: {}", e)))?;
        Ok(Self::new(pool, config))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the jobs table and its indexes if missing.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cask_jobs (
                id UUID PRIMARY KEY,
                job_type VARCHAR(255) NOT NULL,
                payload JSONB NOT NULL DEFAULT '{}',
                status VARCHAR(32) NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                lease_token UUID,
                leased_at TIMESTAMPTZ,
                lease_expires_at TIMESTAMPTZ,
                run_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                enqueued_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                failed_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(queue_error)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_cask_jobs_claim ON cask_jobs (status, run_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(queue_error)?;

        tracing::debug!("cask_jobs table ready");
        Ok(())
    }

    /// Dead-letter expired leases that already used their last attempt.
    async fn reap_exhausted(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE cask_jobs
            SET
                status = 'dead_letter',
                lease_token = NULL,
                lease_expires_at = NULL,
                last_error = 'lease expired',
                failed_at = NOW()
            WHERE status = 'leased'
              AND lease_expires_at < NOW()
              AND attempts >= $1
            "#,
        )
        .bind(max_attempts(&self.retry))
        .execute(&self.pool)
        .await
        .map_err(queue_error)?;

        let reaped = result.rows_affected();
        if reaped > 0 {
            tracing::warn!(
                jobs = reaped,
                "Lease expired on final attempt, jobs moved to dead letter"
            );
        }
        Ok(reaped)
    }

    /// Claim one job using the SKIP LOCKED pattern.
    ///
    /// Rows whose lease expired are claimable again while attempts remain,
    /// which is how jobs abandoned by a crashed worker are redelivered.
    async fn claim(&self) -> Result<Option<Lease>> {
        self.reap_exhausted().await?;

        let token = Uuid::new_v4();
        let ttl = chrono::Duration::from_std(self.lease_ttl).unwrap_or_default();

        let row = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT id
                FROM cask_jobs
                WHERE (status = 'pending' AND run_at <= NOW())
                   OR (status = 'leased' AND lease_expires_at < NOW() AND attempts < $3)
                ORDER BY run_at ASC, enqueued_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE cask_jobs
            SET
                status = 'leased',
                attempts = attempts + 1,
                lease_token = $1,
                leased_at = NOW(),
                lease_expires_at = NOW() + $2
            WHERE id IN (SELECT id FROM claimable)
            RETURNING id, job_type, payload, enqueued_at, attempts, leased_at, lease_expires_at
            "#,
        )
        .bind(token)
        .bind(ttl)
        .bind(max_attempts(&self.retry))
        .fetch_optional(&self.pool)
        .await
        .map_err(queue_error)?;

        row.map(|row| lease_from_row(&row, token)).transpose()
    }

    async fn lease_within(&self, timeout: Duration) -> Result<Option<Lease>> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(lease) = self.claim().await? {
                return Ok(Some(lease));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

impl QueueClient for PgQueue {
    fn enqueue<'a>(
        &'a self,
        job_type: &'a str,
        payload: serde_json::Value,
    ) -> BoxFuture<'a, Result<JobId>> {
        Box::pin(async move {
            let job = Job::new(job_type, payload);

            sqlx::query(
                r#"
                INSERT INTO cask_jobs (id, job_type, payload, status, attempts, run_at, enqueued_at)
                VALUES ($1, $2, $3, 'pending', 0, $4, $4)
                "#,
            )
            .bind(job.id)
            .bind(&job.job_type)
            .bind(&job.payload)
            .bind(job.enqueued_at)
            .execute(&self.pool)
            .await
            .map_err(queue_error)?;

            Ok(job.id)
        })
    }

    fn lease(&self, timeout: Duration) -> BoxFuture<'_, Result<Option<Lease>>> {
        Box::pin(self.lease_within(timeout))
    }

    fn ack<'a>(&'a self, lease: &'a Lease) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let result = sqlx::query(
                r#"
                DELETE FROM cask_jobs
                WHERE id = $1 AND lease_token = $2 AND status = 'leased'
                "#,
            )
            .bind(lease.job_id())
            .bind(lease.token)
            .execute(&self.pool)
            .await
            .map_err(queue_error)?;

            if result.rows_affected() == 0 {
                return Err(CaskError::LeaseExpired(lease.token));
            }
            Ok(())
        })
    }

    fn fail<'a>(&'a self, lease: &'a Lease, failure: JobFailure) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let attempts = lease.job.attempts;
            let result = if failure.retryable && self.retry.allows_retry(attempts) {
                let backoff =
                    chrono::Duration::from_std(self.retry.calculate_backoff(attempts))
                        .unwrap_or_else(|_| chrono::Duration::seconds(60));

                sqlx::query(
                    r#"
                    UPDATE cask_jobs
                    SET
                        status = 'pending',
                        lease_token = NULL,
                        leased_at = NULL,
                        lease_expires_at = NULL,
                        last_error = $3,
                        run_at = NOW() + $4
                    WHERE id = $1 AND lease_token = $2 AND status = 'leased'
                    "#,
                )
                .bind(lease.job_id())
                .bind(lease.token)
                .bind(&failure.message)
                .bind(backoff)
                .execute(&self.pool)
                .await
            } else {
                tracing::warn!(
                    job_id = %lease.job_id(),
                    job_type = %lease.job.job_type,
                    attempts = attempts,
                    error = %failure.message,
                    "Job moved to dead letter"
                );

                sqlx::query(
                    r#"
                    UPDATE cask_jobs
                    SET
                        status = 'dead_letter',
                        lease_token = NULL,
                        lease_expires_at = NULL,
                        last_error = $3,
                        failed_at = NOW()
                    WHERE id = $1 AND lease_token = $2 AND status = 'leased'
                    "#,
                )
                .bind(lease.job_id())
                .bind(lease.token)
                .bind(&failure.message)
                .execute(&self.pool)
                .await
            };

            if result.map_err(queue_error)?.rows_affected() == 0 {
                return Err(CaskError::LeaseExpired(lease.token));
            }
            Ok(())
        })
    }

    fn stats(&self) -> BoxFuture<'_, Result<QueueStats>> {
        Box::pin(async move {
            let row = sqlx::query(
                r#"
                SELECT
                    COUNT(*) FILTER (WHERE status = 'pending' AND run_at <= NOW()) AS pending,
                    COUNT(*) FILTER (WHERE status = 'pending' AND run_at > NOW()) AS delayed,
                    COUNT(*) FILTER (WHERE status = 'leased') AS leased,
                    COUNT(*) FILTER (WHERE status = 'dead_letter') AS dead_letter
                FROM cask_jobs
                "#,
            )
            .fetch_one(&self.pool)
            .await
            .map_err(queue_error)?;

            Ok(QueueStats {
                pending: count(&row, "pending")?,
                delayed: count(&row, "delayed")?,
                leased: count(&row, "leased")?,
                dead_letter: count(&row, "dead_letter")?,
            })
        })
    }
}

fn database_url(config: &QueueConfig) -> Result<&str> {
    config
        .url
        .as_deref()
        .ok_or_else(|| CaskError::Config("queue.url is required for the postgres backend".into()))
}

fn max_attempts(retry: &RetryConfig) -> i32 {
    i32::try_from(retry.max_attempts).unwrap_or(i32::MAX)
}

fn pool_options(config: &QueueConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.pool_size)
        .acquire_timeout(Duration::from_secs(config.pool_timeout_secs))
}

/// Connectivity problems surface as `QueueUnavailable` so producers can retry.
fn queue_error(e: sqlx::Error) -> CaskError {
    match e {
        sqlx::Error::Database(db) => CaskError::Database(db.to_string()),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            CaskError::Serialization(e.to_string())
        }
        other => CaskError::QueueUnavailable(other.to_string()),
    }
}

fn lease_from_row(row: &PgRow, token: Uuid) -> Result<Lease> {
    let attempts: i32 = row.try_get("attempts").map_err(queue_error)?;
    let job = Job {
        id: row.try_get("id").map_err(queue_error)?,
        job_type: row.try_get("job_type").map_err(queue_error)?,
        payload: row.try_get("payload").map_err(queue_error)?,
        enqueued_at: row.try_get("enqueued_at").map_err(queue_error)?,
        attempts: u32::try_from(attempts).unwrap_or_default(),
    };

    Ok(Lease {
        token,
        job,
        leased_at: row.try_get("leased_at").map_err(queue_error)?,
        expires_at: row.try_get("lease_expires_at").map_err(queue_error)?,
    })
}

fn count(row: &PgRow, column: &str) -> Result<u64> {
    let value: i64 = row.try_get(column).map_err(queue_error)?;
    Ok(u64::try_from(value).unwrap_or_default())
}
