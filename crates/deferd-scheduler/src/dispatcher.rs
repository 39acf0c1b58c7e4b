use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};

use crate::{clock::Clock, executor::Executor, registry::JobRegistry};

/// The single control loop that moves due jobs from the queue to the
/// executor.
///
/// Concurrency is bounded by a semaphore: the loop takes a slot before it
/// claims a job and the slot travels with the spawned execution, so at most
/// `max_concurrency` callbacks run at once and excess due jobs simply stay in
/// the queue until a slot frees up.
pub struct Dispatcher {
    registry: Arc<JobRegistry>,
    executor: Arc<Executor>,
    clock: Arc<dyn Clock>,
    slots: Arc<Semaphore>,
    max_concurrency: usize,
    poll_interval: Duration,
    shutdown_grace: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<JobRegistry>,
        executor: Arc<Executor>,
        clock: Arc<dyn Clock>,
        max_concurrency: usize,
        poll_interval: Duration,
        shutdown_grace: Duration,
    ) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            registry,
            executor,
            clock,
            slots: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            poll_interval,
            shutdown_grace,
        }
    }

    /// Number of executions currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.max_concurrency - self.slots.available_permits()
    }

    /// Run until `shutdown` broadcasts `true` (or its sender is dropped), then
    /// wait up to the grace period for in-flight executions to finish.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            max_concurrency = self.max_concurrency,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "dispatcher started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let permit = tokio::select! {
                permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };

            let now = self.clock.now();
            if let Some(job) = self.registry.claim_due(now) {
                debug!(job_id = %job.id, in_flight = self.in_flight(), "job dispatched");
                let executor = Arc::clone(&self.executor);
                tokio::spawn(async move {
                    executor.run(job).await;
                    drop(permit);
                });
                continue;
            }
            drop(permit);

            let wait = self.idle_wait(now);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.registry.queued() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(in_flight = self.in_flight(), "dispatcher stopping");
        self.drain().await;
    }

    /// Sleep until the next known due time, but never longer than the poll interval.
    fn idle_wait(&self, now: f64) -> Duration {
        match self.registry.next_due() {
            Some(at) => Duration::try_from_secs_f64((at - now).max(0.0))
                .unwrap_or(self.poll_interval)
                .min(self.poll_interval),
            None => self.poll_interval,
        }
    }

    async fn drain(&self) {
        let all = u32::try_from(self.max_concurrency).unwrap_or(u32::MAX);
        match tokio::time::timeout(self.shutdown_grace, self.slots.acquire_many(all)).await {
            Ok(_) => info!("dispatcher stopped, in-flight jobs drained"),
            Err(_) => warn!(
                in_flight = self.in_flight(),
                grace_ms = self.shutdown_grace.as_millis() as u64,
                "shutdown grace period elapsed with jobs still running"
            ),
        }
    }
}
