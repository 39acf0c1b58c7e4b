//! Durable job records.
//!
//! The registry writes every state change through [`JobPersistence`] and reads
//! it back exactly once, at startup, to rebuild the in-memory store and queue.

use std::collections::HashMap;
use std::sync::Mutex;

use deferd_core::JobId;
use rusqlite::Connection;
use tracing::{debug, warn};

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
    types::{Job, JobStatus},
};

/// Durability contract used by the job registry.
pub trait JobPersistence: Send + Sync {
    /// Insert or replace the record for `job.id`.
    fn save_job(&self, job: &Job) -> Result<()>;

    /// Every job whose status is not `done`, ordered by `run_at`.
    fn load_active_jobs(&self) -> Result<Vec<Job>>;
}

/// SQLite-backed persistence. Owns its own connection, like every other
/// subsystem sharing the database file.
pub struct SqlitePersistence {
    conn: Mutex<Connection>,
}

impl SqlitePersistence {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl JobPersistence for SqlitePersistence {
    fn save_job(&self, job: &Job) -> Result<()> {
        self.conn().execute(
            "INSERT INTO jobs
             (id, run_at, payload, status, retries, recurring, interval_secs,
              last_error, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)
             ON CONFLICT(id) DO UPDATE SET
               run_at=excluded.run_at, payload=excluded.payload,
               status=excluded.status, retries=excluded.retries,
               recurring=excluded.recurring, interval_secs=excluded.interval_secs,
               last_error=excluded.last_error, updated_at=excluded.updated_at",
            rusqlite::params![
                job.id.as_str(),
                job.run_at,
                job.payload,
                job.status.as_str(),
                job.retries,
                job.recurring,
                job.interval,
                job.last_error,
                job.created_at,
                job.updated_at,
            ],
        )?;
        debug!(job_id = %job.id, status = %job.status, "job persisted");
        Ok(())
    }

    fn load_active_jobs(&self) -> Result<Vec<Job>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, run_at, payload, status, retries, recurring, interval_secs,
                    last_error, created_at, updated_at
             FROM jobs WHERE status != 'done' ORDER BY run_at, created_at",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,         // id
                row.get::<_, f64>(1)?,            // run_at
                row.get::<_, String>(2)?,         // payload
                row.get::<_, String>(3)?,         // status
                row.get::<_, u32>(4)?,            // retries
                row.get::<_, bool>(5)?,           // recurring
                row.get::<_, f64>(6)?,            // interval_secs
                row.get::<_, Option<String>>(7)?, // last_error
                row.get::<_, f64>(8)?,            // created_at
                row.get::<_, f64>(9)?,            // updated_at
            ))
        })?;

        let mut jobs = Vec::new();
        for row in rows {
            let (
                id,
                run_at,
                payload,
                status_str,
                retries,
                recurring,
                interval,
                last_error,
                created_at,
                updated_at,
            ) = row?;
            let status: JobStatus = match status_str.parse() {
                Ok(s) => s,
                Err(e) => {
                    warn!(job_id = %id, "skipping stored job: {e}");
                    continue;
                }
            };
            jobs.push(Job {
                id: JobId(id),
                run_at,
                payload,
                status,
                retries,
                recurring,
                interval,
                last_error,
                created_at,
                updated_at,
            });
        }
        Ok(jobs)
    }
}

/// Process-local persistence for tests and throwaway runs.
#[derive(Default)]
pub struct MemoryPersistence {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// The durable copy of a job, as last written.
    pub fn get(&self, id: &JobId) -> Option<Job> {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }
}

impl JobPersistence for MemoryPersistence {
    fn save_job(&self, job: &Job) -> Result<()> {
        self.jobs
            .lock()
            .map_err(|_| SchedulerError::Persistence("memory store lock poisoned".into()))?
            .insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn load_active_jobs(&self) -> Result<Vec<Job>> {
        let jobs = self
            .jobs
            .lock()
            .map_err(|_| SchedulerError::Persistence("memory store lock poisoned".into()))?;
        let mut active: Vec<Job> = jobs
            .values()
            .filter(|j| j.status != JobStatus::Done)
            .cloned()
            .collect();
        active.sort_by(|a, b| {
            a.run_at
                .total_cmp(&b.run_at)
                .then_with(|| a.created_at.total_cmp(&b.created_at))
        });
        Ok(active)
    }
}
