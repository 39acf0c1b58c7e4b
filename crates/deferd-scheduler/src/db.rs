use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `jobs` table (idempotent) and an index on `(status, run_at)` so
/// the startup recovery query stays cheap with a long tail of finished jobs.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id            TEXT    NOT NULL PRIMARY KEY,
            run_at        REAL    NOT NULL,   -- seconds since epoch
            payload       TEXT    NOT NULL,   -- opaque, never interpreted
            status        TEXT    NOT NULL DEFAULT 'scheduled',
            retries       INTEGER NOT NULL DEFAULT 0,
            recurring     INTEGER NOT NULL DEFAULT 0,
            interval_secs REAL    NOT NULL DEFAULT 0,
            last_error    TEXT,
            created_at    REAL    NOT NULL,
            updated_at    REAL    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_jobs_status_run_at ON jobs (status, run_at);
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(n, 0);
    }
}
