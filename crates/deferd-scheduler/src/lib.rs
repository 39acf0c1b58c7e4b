//! `deferd-scheduler`: delayed and recurring job scheduling on Tokio.
//!
//! # Overview
//!
//! Jobs live in a [`registry::JobRegistry`] that owns both the job table and
//! the time-ordered [`queue::TimeQueue`] behind one lock, so a job is queued
//! exactly when its status is `scheduled`. The [`dispatcher::Dispatcher`]
//! pops due jobs into a bounded pool of executions, and the
//! [`executor::Executor`] applies the outcome: done, rescheduled (recurring),
//! retried with backoff, or dead-lettered. Every transition is written through
//! a [`persistence::JobPersistence`] backend so pending work survives a
//! restart.
//!
//! # Lifecycle
//!
//! | From        | To          | Trigger                                      |
//! |-------------|-------------|----------------------------------------------|
//! | `scheduled` | `running`   | dispatched by the dispatcher                 |
//! | `scheduled` | `cancelled` | cancel request                               |
//! | `running`   | `done`      | callback succeeded                           |
//! | `done`      | `scheduled` | recurring job, next run one interval out     |
//! | `running`   | `scheduled` | callback failed, retry budget left           |
//! | `running`   | `dead`      | callback failed, retry budget spent          |
//!
//! [`engine::SchedulerEngine`] wires the pieces together and
//! [`engine::SchedulerHandle`] exposes the create/list/get/cancel operations.

pub mod clock;
pub mod db;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod executor;
pub mod persistence;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{EngineOptions, SchedulerEngine, SchedulerHandle};
pub use error::{Result, SchedulerError};
pub use executor::{JobWork, WorkError};
pub use persistence::{JobPersistence, MemoryPersistence, SqlitePersistence};
pub use retry::{Backoff, RetryPolicy};
pub use types::{Job, JobStatus, SchedulerStats};
