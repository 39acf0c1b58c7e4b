//! The job store: authoritative map of jobs plus the time-ordered queue.
//!
//! Both structures sit behind a single mutex so a job's status and its queue
//! entry always change together: a `scheduled` job has exactly one live queue
//! entry and every other status has none. The lock is never held across an
//! `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use deferd_core::JobId;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::{
    clock::fmt_ts,
    error::{Result, SchedulerError},
    persistence::JobPersistence,
    queue::TimeQueue,
    types::{Job, JobStatus, SchedulerStats},
};

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    queue: TimeQueue,
}

pub struct JobRegistry {
    inner: Mutex<Inner>,
    persistence: Arc<dyn JobPersistence>,
    /// Wakes the dispatcher when something is queued.
    queued: Notify,
}

impl JobRegistry {
    /// An empty registry writing through to `persistence`.
    pub fn new(persistence: Arc<dyn JobPersistence>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            persistence,
            queued: Notify::new(),
        }
    }

    /// Rebuild the registry from the persistence layer's active jobs.
    ///
    /// `scheduled` jobs are re-queued at their stored `run_at`. Jobs stored as
    /// `running` were interrupted mid-execution; they go back to `scheduled`
    /// so they run again. `cancelled` and `dead` jobs are kept for inspection
    /// only.
    pub fn restore(persistence: Arc<dyn JobPersistence>, now: f64) -> Result<Self> {
        let stored = persistence.load_active_jobs()?;
        let registry = Self::new(persistence);
        let mut interrupted = 0usize;
        {
            let mut guard = registry.lock();
            let inner = &mut *guard;
            for mut job in stored {
                if job.status == JobStatus::Running {
                    job.status = JobStatus::Scheduled;
                    job.updated_at = now;
                    registry.persistence.save_job(&job)?;
                    interrupted += 1;
                }
                if job.status == JobStatus::Scheduled {
                    inner.queue.insert(job.id.clone(), job.run_at);
                }
                inner.jobs.insert(job.id.clone(), job);
            }
            info!(
                loaded = inner.jobs.len(),
                queued = inner.queue.len(),
                interrupted,
                "job registry restored"
            );
        }
        Ok(registry)
    }

    /// Create a `scheduled` job and queue it.
    ///
    /// The durable write happens first; if it fails nothing is added.
    pub fn create(
        &self,
        run_at: f64,
        payload: String,
        recurring: bool,
        interval: f64,
        now: f64,
    ) -> Result<Job> {
        let job = Job::new(run_at, payload, recurring, interval, now);
        self.persistence.save_job(&job)?;
        {
            let mut guard = self.lock();
            let inner = &mut *guard;
            inner.queue.insert(job.id.clone(), job.run_at);
            inner.jobs.insert(job.id.clone(), job.clone());
        }
        self.queued.notify_one();
        info!(
            job_id = %job.id,
            run_at = %fmt_ts(job.run_at),
            recurring = job.recurring,
            "job created"
        );
        Ok(job)
    }

    pub fn get(&self, id: &JobId) -> Result<Job> {
        self.lock()
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| SchedulerError::JobNotFound { id: id.clone() })
    }

    /// Snapshot of every job, ordered by creation time.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.lock().jobs.values().cloned().collect();
        jobs.sort_by(|a, b| {
            a.created_at
                .total_cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        jobs
    }

    /// Cancel a `scheduled` job and drop its queue entry.
    pub fn cancel(&self, id: &JobId, now: f64) -> Result<Job> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let job = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| SchedulerError::JobNotFound { id: id.clone() })?;

        match job.status {
            JobStatus::Scheduled => {}
            JobStatus::Running => return Err(SchedulerError::AlreadyRunning { id: id.clone() }),
            status => {
                return Err(SchedulerError::AlreadyTerminal {
                    id: id.clone(),
                    status,
                })
            }
        }

        let mut cancelled = job.clone();
        cancelled.status = JobStatus::Cancelled;
        cancelled.updated_at = now;
        self.persistence.save_job(&cancelled)?;

        *job = cancelled.clone();
        inner.queue.remove(id);
        info!(job_id = %id, "job cancelled");
        Ok(cancelled)
    }

    /// Pop the earliest due job and mark it `running`.
    ///
    /// Entries whose job is no longer `scheduled` are discarded.
    pub fn claim_due(&self, now: f64) -> Option<Job> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        while let Some(id) = inner.queue.pop_due(now) {
            let Some(job) = inner.jobs.get_mut(&id) else {
                warn!(job_id = %id, "queue entry without a job; discarded");
                continue;
            };
            if job.status != JobStatus::Scheduled {
                debug!(job_id = %id, status = %job.status, "stale queue entry discarded");
                continue;
            }
            job.status = JobStatus::Running;
            job.updated_at = now;
            let claimed = job.clone();
            self.persist_logged(&claimed, "claim");
            return Some(claimed);
        }
        None
    }

    /// Mark a running job `done`.
    pub fn mark_done(&self, id: &JobId, now: f64) -> Option<Job> {
        self.transition(id, JobStatus::Running, now, "done", |job, _| {
            job.status = JobStatus::Done;
            false
        })
    }

    /// Put a finished recurring job back in the queue at `run_at`.
    pub fn reschedule(&self, id: &JobId, run_at: f64, now: f64) -> Option<Job> {
        self.transition(id, JobStatus::Done, now, "reschedule", |job, queue| {
            job.status = JobStatus::Scheduled;
            job.run_at = run_at;
            queue.insert(job.id.clone(), run_at);
            true
        })
    }

    /// Record a failed attempt and queue the next one at `run_at`.
    pub fn retry(&self, id: &JobId, reason: &str, run_at: f64, now: f64) -> Option<Job> {
        self.transition(id, JobStatus::Running, now, "retry", |job, queue| {
            job.retries += 1;
            job.last_error = Some(reason.to_string());
            job.status = JobStatus::Scheduled;
            job.run_at = run_at;
            queue.insert(job.id.clone(), run_at);
            true
        })
    }

    /// Record the final failed attempt and dead-letter the job.
    pub fn dead_letter(&self, id: &JobId, reason: &str, now: f64) -> Option<Job> {
        self.transition(id, JobStatus::Running, now, "dead_letter", |job, _| {
            job.retries += 1;
            job.last_error = Some(reason.to_string());
            job.status = JobStatus::Dead;
            false
        })
    }

    /// `run_at` of the earliest queued job.
    pub fn next_due(&self) -> Option<f64> {
        self.lock().queue.next_due()
    }

    /// Whether `id` currently has a pending queue entry.
    pub fn is_queued(&self, id: &JobId) -> bool {
        self.lock().queue.contains(id)
    }

    pub fn stats(&self) -> SchedulerStats {
        let inner = self.lock();
        let mut stats = SchedulerStats {
            queue_depth: inner.queue.len(),
            ..SchedulerStats::default()
        };
        for job in inner.jobs.values() {
            stats.count(job.status);
        }
        stats
    }

    /// Resolves after the next insert into the queue.
    pub(crate) async fn queued(&self) {
        self.queued.notified().await
    }

    // --- private helpers ---------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply an executor-side transition to a job currently in `expected`.
    ///
    /// `apply` returns true when it queued the job. The change is kept in
    /// memory even if the durable write fails; the failure is logged and the
    /// next write of the job re-syncs the row.
    fn transition(
        &self,
        id: &JobId,
        expected: JobStatus,
        now: f64,
        op: &str,
        apply: impl FnOnce(&mut Job, &mut TimeQueue) -> bool,
    ) -> Option<Job> {
        let (job, queued) = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            let Some(job) = inner.jobs.get_mut(id) else {
                warn!(job_id = %id, op, "transition on unknown job ignored");
                return None;
            };
            if job.status != expected {
                warn!(job_id = %id, op, status = %job.status, "transition from unexpected status ignored");
                return None;
            }
            let queued = apply(job, &mut inner.queue);
            job.updated_at = now;
            let snapshot = job.clone();
            self.persist_logged(&snapshot, op);
            (snapshot, queued)
        };
        if queued {
            self.queued.notify_one();
        }
        Some(job)
    }

    fn persist_logged(&self, job: &Job, op: &str) {
        if let Err(e) = self.persistence.save_job(job) {
            error!(job_id = %job.id, op, status = %job.status, "failed to persist job state: {e}");
        }
    }

    #[cfg(test)]
    pub(crate) fn assert_queue_invariant(&self) {
        let inner = self.lock();
        for job in inner.jobs.values() {
            assert_eq!(
                job.status == JobStatus::Scheduled,
                inner.queue.contains(&job.id),
                "job {} in status {} breaks the queue invariant",
                job.id,
                job.status
            );
        }
        assert_eq!(
            inner.queue.len(),
            inner
                .jobs
                .values()
                .filter(|j| j.status == JobStatus::Scheduled)
                .count()
        );
    }
}
