use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    clock::{fmt_ts, Clock},
    registry::JobRegistry,
    retry::RetryPolicy,
    types::Job,
};

/// Why a single execution attempt failed. Every variant feeds the retry path.
#[derive(Debug, Error)]
pub enum WorkError {
    /// The callback reported failure.
    #[error("{0}")]
    Failed(String),

    #[error("timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("work callback panicked: {0}")]
    Panicked(String),
}

/// The work a job stands for. The scheduler never looks inside `payload`.
#[async_trait]
pub trait JobWork: Send + Sync {
    async fn execute(&self, payload: &str) -> Result<(), WorkError>;
}

/// Runs one claimed job and applies the resulting transition through the
/// registry: `done` (then `scheduled` again when recurring), a retry with
/// backoff, or dead-letter once the policy's budget is spent.
pub struct Executor {
    registry: Arc<JobRegistry>,
    work: Arc<dyn JobWork>,
    policy: RetryPolicy,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl Executor {
    pub fn new(
        registry: Arc<JobRegistry>,
        work: Arc<dyn JobWork>,
        policy: RetryPolicy,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            work,
            policy,
            timeout,
            clock,
        }
    }

    /// Execute `job` (already `running`) and return its state afterwards.
    pub async fn run(&self, job: Job) -> Option<Job> {
        let attempt = job.retries + 1;
        info!(job_id = %job.id, attempt, "running job");
        let started = Instant::now();

        let outcome = self.attempt(&job).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let now = self.clock.now();

        match outcome {
            Ok(()) => {
                let done = self.registry.mark_done(&job.id, now)?;
                info!(job_id = %job.id, attempt, elapsed_ms, "job done");
                if !done.recurring {
                    return Some(done);
                }
                let next = now + done.interval;
                let rescheduled = self.registry.reschedule(&job.id, next, now)?;
                info!(job_id = %job.id, next = %fmt_ts(next), "recurring job rescheduled");
                Some(rescheduled)
            }
            Err(e) => {
                let reason = e.to_string();
                let retries = attempt;
                if self.policy.should_retry(retries) {
                    let delay = self.policy.delay_for(retries);
                    let run_at = now + delay.as_secs_f64();
                    warn!(
                        job_id = %job.id,
                        attempt,
                        elapsed_ms,
                        retry_in_ms = delay.as_millis() as u64,
                        "job failed, retry scheduled: {reason}"
                    );
                    self.registry.retry(&job.id, &reason, run_at, now)
                } else {
                    error!(
                        job_id = %job.id,
                        attempts = attempt,
                        "job moved to dead-letter after exhausting retries: {reason}"
                    );
                    self.registry.dead_letter(&job.id, &reason, now)
                }
            }
        }
    }

    /// One call of the work callback, bounded by the timeout.
    ///
    /// The callback runs on its own task so a panic surfaces as a failed
    /// attempt instead of leaving the job stuck in `running`.
    async fn attempt(&self, job: &Job) -> Result<(), WorkError> {
        let work = Arc::clone(&self.work);
        let payload = job.payload.clone();
        let mut handle = tokio::spawn(async move { work.execute(&payload).await });

        match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(WorkError::Panicked(join_err.to_string())),
            Err(_elapsed) => {
                handle.abort();
                Err(WorkError::Timeout {
                    ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::persistence::MemoryPersistence;
    use crate::types::JobStatus;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    pub(crate) struct AlwaysOk {
        pub calls: AtomicU32,
    }

    #[async_trait]
    impl JobWork for AlwaysOk {
        async fn execute(&self, _payload: &str) -> Result<(), WorkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    pub(crate) struct AlwaysFail {
        pub calls: AtomicU32,
    }

    #[async_trait]
    impl JobWork for AlwaysFail {
        async fn execute(&self, payload: &str) -> Result<(), WorkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(WorkError::Failed(format!("cannot process {payload}")))
        }
    }

    struct Sleepy(Duration);

    #[async_trait]
    impl JobWork for Sleepy {
        async fn execute(&self, _payload: &str) -> Result<(), WorkError> {
            tokio::time::sleep(self.0).await;
            Ok(())
        }
    }

    struct Panics;

    #[async_trait]
    impl JobWork for Panics {
        async fn execute(&self, _payload: &str) -> Result<(), WorkError> {
            panic!("callback bug")
        }
    }

    struct Harness {
        registry: Arc<JobRegistry>,
        clock: Arc<ManualClock>,
        executor: Executor,
    }

    fn harness(work: Arc<dyn JobWork>, timeout: Duration) -> Harness {
        let registry = Arc::new(JobRegistry::new(Arc::new(MemoryPersistence::new())));
        let clock = Arc::new(ManualClock::new(1_000.0));
        let executor = Executor::new(
            registry.clone(),
            work,
            RetryPolicy::default(),
            timeout,
            clock.clone(),
        );
        Harness {
            registry,
            clock,
            executor,
        }
    }

    impl Harness {
        fn submit(&self, recurring: bool, interval: f64) -> Job {
            let now = self.clock.now();
            self.registry
                .create(now, "payload".into(), recurring, interval, now)
                .unwrap()
        }

        async fn run_next(&self) -> Option<Job> {
            let job = self.registry.claim_due(self.clock.now())?;
            self.executor.run(job).await
        }
    }

    #[tokio::test]
    async fn success_marks_job_done() {
        let work = Arc::new(AlwaysOk::default());
        let h = harness(work.clone(), Duration::from_secs(5));
        let job = h.submit(false, 0.0);

        let after = h.run_next().await.unwrap();
        assert_eq!(after.status, JobStatus::Done);
        assert_eq!(h.registry.get(&job.id).unwrap().status, JobStatus::Done);
        assert!(!h.registry.is_queued(&job.id));
        assert_eq!(work.calls.load(Ordering::SeqCst), 1);
        h.registry.assert_queue_invariant();
    }

    #[tokio::test]
    async fn recurring_success_reschedules_after_interval() {
        let h = harness(Arc::new(AlwaysOk::default()), Duration::from_secs(5));
        let job = h.submit(true, 10.0);

        let mut last_run_at = job.run_at;
        for _ in 0..3 {
            let after = h.run_next().await.unwrap();
            assert_eq!(after.status, JobStatus::Scheduled);
            assert_eq!(after.run_at, h.clock.now() + 10.0);
            assert!(after.run_at > last_run_at);
            assert!(h.registry.is_queued(&job.id));
            last_run_at = after.run_at;
            h.clock.advance(10.0);
        }
        assert_eq!(h.registry.get(&job.id).unwrap().retries, 0);
        h.registry.assert_queue_invariant();
    }

    #[tokio::test]
    async fn always_failing_job_dies_after_max_retries_plus_one_attempts() {
        let work = Arc::new(AlwaysFail::default());
        let h = harness(work.clone(), Duration::from_secs(5));
        let job = h.submit(false, 0.0);

        for expected in 1..=3u32 {
            let after = h.run_next().await.unwrap();
            assert_eq!(after.status, JobStatus::Scheduled);
            assert_eq!(after.retries, expected);
            assert_eq!(after.run_at, h.clock.now() + 2.0);
            assert!(h.run_next().await.is_none(), "not due before backoff elapses");
            h.clock.advance(2.0);
        }

        let after = h.run_next().await.unwrap();
        assert_eq!(after.status, JobStatus::Dead);
        assert_eq!(after.retries, 4);
        assert_eq!(after.last_error.as_deref(), Some("cannot process payload"));
        assert_eq!(work.calls.load(Ordering::SeqCst), 4);

        h.clock.advance(3_600.0);
        assert!(h.run_next().await.is_none(), "dead jobs are never re-dispatched");
        assert_eq!(h.registry.get(&job.id).unwrap().retries, 4);
        h.registry.assert_queue_invariant();
    }

    #[tokio::test]
    async fn exponential_policy_spaces_out_retries() {
        let registry = Arc::new(JobRegistry::new(Arc::new(MemoryPersistence::new())));
        let clock = Arc::new(ManualClock::new(0.0));
        let executor = Executor::new(
            registry.clone(),
            Arc::new(AlwaysFail::default()),
            RetryPolicy::exponential(5, Duration::from_secs(1), Duration::from_secs(60)),
            Duration::from_secs(5),
            clock.clone(),
        );
        registry.create(0.0, "x".into(), false, 0.0, 0.0).unwrap();

        let mut delays = Vec::new();
        for _ in 0..3 {
            let job = registry.claim_due(clock.now()).unwrap();
            let after = executor.run(job).await.unwrap();
            delays.push(after.run_at - clock.now());
            clock.set(after.run_at);
        }
        assert_eq!(delays, vec![1.0, 2.0, 4.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_failure() {
        let h = harness(
            Arc::new(Sleepy(Duration::from_secs(60))),
            Duration::from_secs(1),
        );
        h.submit(false, 0.0);

        let after = h.run_next().await.unwrap();
        assert_eq!(after.status, JobStatus::Scheduled);
        assert_eq!(after.retries, 1);
        assert_eq!(after.last_error.as_deref(), Some("timed out after 1000ms"));
    }

    #[tokio::test]
    async fn panicking_callback_counts_as_failure() {
        let h = harness(Arc::new(Panics), Duration::from_secs(5));
        h.submit(false, 0.0);

        let after = h.run_next().await.unwrap();
        assert_eq!(after.status, JobStatus::Scheduled);
        assert_eq!(after.retries, 1);
        assert!(after
            .last_error
            .as_deref()
            .is_some_and(|e| e.starts_with("work callback panicked")));
    }
}
