use std::sync::Arc;
use std::time::Duration;

use deferd_core::{config::MAX_DELAY_SECS, DeferdConfig, JobId};
use tokio::sync::watch;
use tracing::info;

use crate::{
    clock::{Clock, SystemClock},
    dispatcher::Dispatcher,
    error::{Result, SchedulerError},
    executor::{Executor, JobWork},
    persistence::JobPersistence,
    registry::JobRegistry,
    retry::RetryPolicy,
    types::{Job, SchedulerStats},
};

/// Tuning knobs for the engine, usually derived from [`DeferdConfig`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub poll_interval: Duration,
    pub max_concurrency: usize,
    pub job_timeout: Duration,
    pub shutdown_grace: Duration,
    pub max_payload_bytes: usize,
    pub retry: RetryPolicy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from(&DeferdConfig::default())
    }
}

impl From<&DeferdConfig> for EngineOptions {
    fn from(config: &DeferdConfig) -> Self {
        let s = &config.scheduler;
        Self {
            poll_interval: Duration::from_millis(s.poll_interval_ms),
            max_concurrency: s.max_concurrency,
            job_timeout: Duration::from_secs(s.job_timeout_secs),
            shutdown_grace: Duration::from_secs(s.shutdown_grace_secs),
            max_payload_bytes: s.max_payload_bytes,
            retry: RetryPolicy::from(&config.retry),
        }
    }
}

/// Façade-facing handle: the create/list/get/cancel operations.
///
/// Cheap to clone; every clone talks to the same registry.
#[derive(Clone)]
pub struct SchedulerHandle {
    registry: Arc<JobRegistry>,
    clock: Arc<dyn Clock>,
    max_payload_bytes: usize,
}

impl SchedulerHandle {
    /// Submit a job due `delay` seconds from now.
    ///
    /// Rejects delays and intervals outside `[0, MAX_DELAY_SECS]` (NaN
    /// included) and oversized payloads before anything is stored.
    pub fn create_job(
        &self,
        delay: f64,
        payload: String,
        recurring: bool,
        interval: f64,
    ) -> Result<Job> {
        check_secs("delay", delay)?;
        check_secs("interval", interval)?;
        if payload.len() > self.max_payload_bytes {
            return Err(SchedulerError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload_bytes,
            });
        }

        let now = self.clock.now();
        self.registry
            .create(now + delay, payload, recurring, interval, now)
    }

    pub fn list_jobs(&self) -> Vec<Job> {
        self.registry.list()
    }

    pub fn get_job(&self, id: &JobId) -> Result<Job> {
        self.registry.get(id)
    }

    /// Cancel a job that has not been dispatched yet.
    pub fn cancel_job(&self, id: &JobId) -> Result<Job> {
        self.registry.cancel(id, self.clock.now())
    }

    pub fn stats(&self) -> SchedulerStats {
        self.registry.stats()
    }
}

fn check_secs(field: &str, value: f64) -> Result<()> {
    if (0.0..=MAX_DELAY_SECS).contains(&value) {
        return Ok(());
    }
    Err(SchedulerError::Validation(format!(
        "{field} must be between 0 and {MAX_DELAY_SECS} seconds, got {value}"
    )))
}

/// Core scheduler: restores state from persistence and drives dispatch until
/// told to shut down.
pub struct SchedulerEngine {
    dispatcher: Dispatcher,
}

impl SchedulerEngine {
    /// Restore jobs from `persistence` and wire up the dispatcher and executor.
    ///
    /// Returns the engine (to be driven with [`SchedulerEngine::run`]) and the
    /// handle the façade uses while the engine runs.
    pub fn new(
        persistence: Arc<dyn JobPersistence>,
        work: Arc<dyn JobWork>,
        options: EngineOptions,
    ) -> Result<(Self, SchedulerHandle)> {
        Self::with_clock(persistence, work, options, Arc::new(SystemClock))
    }

    pub fn with_clock(
        persistence: Arc<dyn JobPersistence>,
        work: Arc<dyn JobWork>,
        options: EngineOptions,
        clock: Arc<dyn Clock>,
    ) -> Result<(Self, SchedulerHandle)> {
        let registry = Arc::new(JobRegistry::restore(persistence, clock.now())?);
        let executor = Arc::new(Executor::new(
            Arc::clone(&registry),
            work,
            options.retry.clone(),
            options.job_timeout,
            Arc::clone(&clock),
        ));
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            executor,
            Arc::clone(&clock),
            options.max_concurrency,
            options.poll_interval,
            options.shutdown_grace,
        );
        let handle = SchedulerHandle {
            registry,
            clock,
            max_payload_bytes: options.max_payload_bytes,
        };
        Ok((Self { dispatcher }, handle))
    }

    /// Main event loop. Dispatches until `shutdown` broadcasts `true`.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        info!("scheduler engine started");
        self.dispatcher.run(shutdown).await;
        info!("scheduler engine stopped");
    }
}
