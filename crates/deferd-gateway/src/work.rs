//! Placeholder work injected by the gateway binary.
//!
//! Real deployments replace this with their own [`JobWork`]. `LogWork` logs
//! the payload and simulates a bit of processing time; a payload starting with
//! `fail:` fails on purpose so the retry and dead-letter paths can be driven
//! over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use deferd_scheduler::{JobWork, WorkError};
use tracing::info;

const FAIL_PREFIX: &str = "fail:";

pub struct LogWork {
    simulated: Duration,
}

impl LogWork {
    pub fn new(simulated: Duration) -> Self {
        Self { simulated }
    }
}

#[async_trait]
impl JobWork for LogWork {
    async fn execute(&self, payload: &str) -> Result<(), WorkError> {
        info!(payload, "executing job payload");
        tokio::time::sleep(self.simulated).await;

        if let Some(reason) = payload.strip_prefix(FAIL_PREFIX) {
            return Err(WorkError::Failed(format!(
                "payload requested failure: {}",
                reason.trim()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn plain_payload_succeeds() {
        let work = LogWork::new(Duration::from_millis(500));
        assert!(work.execute("send digest").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn fail_prefix_fails() {
        let work = LogWork::new(Duration::from_millis(500));
        let err = work.execute("fail: upstream down").await.unwrap_err();
        assert_eq!(err.to_string(), "payload requested failure: upstream down");
    }
}
