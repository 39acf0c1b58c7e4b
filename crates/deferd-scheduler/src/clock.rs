use std::sync::Mutex;

use chrono::Utc;

/// Source of wall-clock time in seconds since the Unix epoch.
///
/// The dispatcher and executor read time only through this trait so tests can
/// move time forward without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Wall clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        Utc::now().timestamp_micros() as f64 / 1_000_000.0
    }
}

/// Manually advanced clock for deterministic tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, secs: f64) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += secs;
    }

    pub fn set(&self, at: f64) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Render an epoch timestamp for log lines.
pub(crate) fn fmt_ts(secs: f64) -> String {
    chrono::DateTime::from_timestamp_micros((secs * 1_000_000.0) as i64)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| secs.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_only_when_told() {
        let clock = ManualClock::new(100.0);
        assert_eq!(clock.now(), 100.0);
        clock.advance(2.5);
        assert_eq!(clock.now(), 102.5);
        clock.set(10.0);
        assert_eq!(clock.now(), 10.0);
    }

    #[test]
    fn system_clock_is_past_2020() {
        assert!(SystemClock.now() > 1_577_836_800.0);
    }

    #[test]
    fn timestamps_render_as_rfc3339() {
        assert_eq!(fmt_ts(0.0), "1970-01-01T00:00:00+00:00");
    }
}
