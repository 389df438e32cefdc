use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cask_core::config::QueueConfig;
use cask_core::job::{Job, JobFailure, JobId, Lease, QueueClient, QueueStats, RetryConfig};
use cask_core::{CaskError, Result};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

/// A job that exhausted its attempts or failed permanently.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub job: Job,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

struct LeasedJob {
    job: Job,
    deadline: Instant,
}

#[derive(Default)]
struct State {
    ready: VecDeque<Job>,
    delayed: Vec<(Instant, Job)>,
    leased: HashMap<Uuid, LeasedJob>,
    dead: Vec<DeadLetter>,
}

impl State {
    /// Move due retries and expired leases back onto the ready queue.
    ///
    /// An expired lease that already used its last attempt is dead-lettered.
    fn promote(&mut self, now: Instant, retry: &RetryConfig) {
        let mut due = Vec::new();
        self.delayed.retain(|(at, job)| {
            if *at <= now {
                due.push((*at, job.clone()));
                false
            } else {
                true
            }
        });
        due.sort_by_key(|(at, _)| *at);
        self.ready.extend(due.into_iter().map(|(_, job)| job));

        let expired: Vec<Uuid> = self
            .leased
            .iter()
            .filter(|(_, leased)| leased.deadline <= now)
            .map(|(token, _)| *token)
            .collect();
        for token in expired {
            let Some(leased) = self.leased.remove(&token) else {
                continue;
            };
            if !retry.allows_retry(leased.job.attempts) {
                tracing::warn!(
                    job_id = %leased.job.id,
                    job_type = %leased.job.job_type,
                    attempts = leased.job.attempts,
                    "Lease expired on final attempt, job moved to dead letter"
                );
                self.dead.push(DeadLetter {
                    job: leased.job,
                    error: "lease expired".to_string(),
                    failed_at: Utc::now(),
                });
            } else {
                tracing::warn!(
                    job_id = %leased.job.id,
                    job_type = %leased.job.job_type,
                    attempt = leased.job.attempts,
                    "Lease expired, job will be redelivered"
                );
                self.ready.push_back(leased.job);
            }
        }
    }

    /// Earliest instant at which a delayed job or lease changes state.
    fn next_change(&self) -> Option<Instant> {
        let delayed = self.delayed.iter().map(|(at, _)| *at);
        let leases = self.leased.values().map(|l| l.deadline);
        delayed.chain(leases).min()
    }
}

/// In-process queue.
///
/// Jobs live only as long as the process; use the Postgres backend when
/// producers and workers run in different processes.
pub struct MemoryQueue {
    state: Mutex<State>,
    available: Notify,
    retry: RetryConfig,
    lease_ttl: Duration,
}

impl MemoryQueue {
    pub fn new(retry: RetryConfig, lease_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            available: Notify::new(),
            retry,
            lease_ttl,
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(
            config.retry.clone(),
            Duration::from_secs(config.lease_ttl_secs),
        )
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Jobs that will never be delivered again.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.lock().dead.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_lease(&self, now: Instant) -> std::result::Result<Lease, Option<Instant>> {
        let mut state = self.lock();
        state.promote(now, &self.retry);

        let Some(mut job) = state.ready.pop_front() else {
            return Err(state.next_change());
        };

        job.attempts += 1;
        let token = Uuid::new_v4();
        let leased_at = Utc::now();
        let expires_at = leased_at + chrono::Duration::from_std(self.lease_ttl).unwrap_or_default();

        state.leased.insert(
            token,
            LeasedJob {
                job: job.clone(),
                deadline: now + self.lease_ttl,
            },
        );

        Ok(Lease {
            token,
            job,
            leased_at,
            expires_at,
        })
    }

    async fn lease_within(&self, timeout: Duration) -> Result<Option<Lease>> {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let now = Instant::now();
            let wake_at = match self.try_lease(now) {
                Ok(lease) => return Ok(Some(lease)),
                Err(next_change) => next_change.map_or(deadline, |at| at.min(deadline)),
            };

            if now >= deadline {
                return Ok(None);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    fn take_leased(&self, state: &mut State, lease: &Lease) -> Result<Job> {
        state
            .leased
            .remove(&lease.token)
            .map(|leased| leased.job)
            .ok_or(CaskError::LeaseExpired(lease.token))
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}

impl QueueClient for MemoryQueue {
    fn enqueue<'a>(
        &'a self,
        job_type: &'a str,
        payload: serde_json::Value,
    ) -> BoxFuture<'a, Result<JobId>> {
        Box::pin(async move {
            let job = Job::new(job_type, payload);
            let id = job.id;
            self.lock().ready.push_back(job);
            self.available.notify_one();
            Ok(id)
        })
    }

    fn lease(&self, timeout: Duration) -> BoxFuture<'_, Result<Option<Lease>>> {
        Box::pin(self.lease_within(timeout))
    }

    fn ack<'a>(&'a self, lease: &'a Lease) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.lock();
            self.take_leased(&mut state, lease)?;
            Ok(())
        })
    }

    fn fail<'a>(&'a self, lease: &'a Lease, failure: JobFailure) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.lock();
            let job = self.take_leased(&mut state, lease)?;

            if failure.retryable && self.retry.allows_retry(job.attempts) {
                let backoff = self.retry.calculate_backoff(job.attempts);
                tracing::debug!(
                    job_id = %job.id,
                    attempt = job.attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    "Job scheduled for retry"
                );
                state.delayed.push((Instant::now() + backoff, job));
                drop(state);
                // Waiting leases computed their wake time before this retry existed.
                self.available.notify_waiters();
            } else {
                tracing::warn!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    attempts = job.attempts,
                    error = %failure.message,
                    "Job moved to dead letter"
                );
                state.dead.push(DeadLetter {
                    job,
                    error: failure.message,
                    failed_at: Utc::now(),
                });
            }
            Ok(())
        })
    }

    fn stats(&self) -> BoxFuture<'_, Result<QueueStats>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.promote(Instant::now(), &self.retry);
            Ok(QueueStats {
                pending: state.ready.len() as u64,
                delayed: state.delayed.len() as u64,
                leased: state.leased.len() as u64,
                dead_letter: state.dead.len() as u64,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cask_core::job::BackoffStrategy;
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    const WAIT: Duration = Duration::from_secs(5);

    fn queue_with(max_attempts: u32, lease_ttl: Duration) -> MemoryQueue {
        MemoryQueue::new(
            RetryConfig {
                max_attempts,
                backoff: BackoffStrategy::Fixed,
                max_backoff_secs: 60,
            },
            lease_ttl,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_times_out_when_empty() {
        let queue = MemoryQueue::default();
        let started = Instant::now();
        let lease = queue.lease(Duration::from_secs(2)).await.unwrap();
        assert!(lease.is_none());
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_fifo_delivery() {
        let queue = MemoryQueue::default();
        let first = queue.enqueue("a", serde_json::json!(1)).await.unwrap();
        let second = queue.enqueue("b", serde_json::json!(2)).await.unwrap();

        assert_eq!(queue.lease(WAIT).await.unwrap().unwrap().job_id(), first);
        assert_eq!(queue.lease(WAIT).await.unwrap().unwrap().job_id(), second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_lease_wakes_on_enqueue() {
        let queue = Arc::new(MemoryQueue::default());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.lease(Duration::from_secs(60)).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        let id = queue.enqueue("SendEmail", serde_json::json!({})).await.unwrap();

        let lease = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(lease.job_id(), id);
        assert_eq!(lease.job.attempts, 1);
    }

    #[tokio::test]
    async fn test_ack_removes_job() {
        let queue = MemoryQueue::default();
        queue.enqueue("SendEmail", serde_json::json!({})).await.unwrap();
        let lease = queue.lease(WAIT).await.unwrap().unwrap();

        assert_eq!(queue.stats().await.unwrap().leased, 1);
        assert_ok!(queue.ack(&lease).await);
        assert_eq!(queue.stats().await.unwrap(), QueueStats::default());

        let again = assert_err!(queue.ack(&lease).await);
        assert!(matches!(again, CaskError::LeaseExpired(t) if t == lease.token));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failure_is_redelivered_after_backoff() {
        let queue = queue_with(3, Duration::from_secs(300));
        let id = queue.enqueue("flaky", serde_json::json!({})).await.unwrap();

        let lease = queue.lease(WAIT).await.unwrap().unwrap();
        queue
            .fail(&lease, JobFailure::retryable("connection reset"))
            .await
            .unwrap();
        assert_eq!(queue.stats().await.unwrap().delayed, 1);

        let started = Instant::now();
        let retry = queue.lease(WAIT).await.unwrap().unwrap();
        assert_eq!(retry.job_id(), id);
        assert_eq!(retry.job.attempts, 2);
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_attempts_dead_letter() {
        let queue = queue_with(2, Duration::from_secs(300));
        queue.enqueue("flaky", serde_json::json!({})).await.unwrap();

        for _ in 0..2 {
            let lease = queue.lease(WAIT).await.unwrap().unwrap();
            queue.fail(&lease, JobFailure::retryable("boom")).await.unwrap();
        }

        assert!(queue.lease(WAIT).await.unwrap().is_none());
        let dead = queue.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].job.attempts, 2);
        assert_eq!(dead[0].error, "boom");
        assert_eq!(queue.stats().await.unwrap().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_permanent_failure_skips_retry() {
        let queue = MemoryQueue::default();
        queue
            .enqueue("SendEmail", serde_json::json!({"to": "a@b.com"}))
            .await
            .unwrap();
        let lease = queue.lease(WAIT).await.unwrap().unwrap();
        queue
            .fail(&lease, JobFailure::permanent("no handler"))
            .await
            .unwrap();

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.dead_letter, 1);
        assert_eq!(stats.delayed, 0);
        assert_eq!(stats.pending, 0);
        assert_eq!(queue.dead_letters()[0].job.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lease_is_redelivered() {
        let queue = queue_with(3, Duration::from_secs(1));
        let id = queue.enqueue("slow", serde_json::json!({})).await.unwrap();
        let abandoned = queue.lease(WAIT).await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;

        let redelivered = queue.lease(WAIT).await.unwrap().unwrap();
        assert_eq!(redelivered.job_id(), id);
        assert_eq!(redelivered.job.attempts, 2);
        assert_ne!(redelivered.token, abandoned.token);

        assert_err!(queue.ack(&abandoned).await);
        assert_ok!(queue.ack(&redelivered).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lease_on_last_attempt_dead_letters() {
        let queue = queue_with(2, Duration::from_secs(1));
        queue.enqueue("hangs", serde_json::json!({})).await.unwrap();

        for attempt in 1..=2 {
            let lease = queue.lease(WAIT).await.unwrap().unwrap();
            assert_eq!(lease.job.attempts, attempt);
            tokio::time::sleep(Duration::from_secs(2)).await;
        }

        assert!(queue.lease(WAIT).await.unwrap().is_none());
        let dead = queue.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].job.attempts, 2);
        assert_eq!(dead[0].error, "lease expired");
        assert_eq!(queue.stats().await.unwrap().outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_lease_picks_up_retry_promptly() {
        let queue = Arc::new(queue_with(3, Duration::from_secs(300)));
        let id = queue.enqueue("flaky", serde_json::json!({})).await.unwrap();
        let lease = queue.lease(WAIT).await.unwrap().unwrap();

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.lease(Duration::from_secs(60)).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        queue
            .fail(&lease, JobFailure::retryable("connection reset"))
            .await
            .unwrap();

        let retry = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(retry.job_id(), id);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
