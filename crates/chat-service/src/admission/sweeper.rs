//! Background task that evicts idle rate-limit entries.
//!
//! Exits when the cancellation token is triggered.

use crate::admission::AdmissionControl;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Run the sweep loop until `cancel_token` is cancelled.
pub async fn run_sweeper(
    admission: Arc<AdmissionControl>,
    sweep_interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut interval = tokio::time::interval(sweep_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately; nothing can be idle yet.
    interval.tick().await;

    info!(
        target: "chat.admission",
        interval_secs = sweep_interval.as_secs(),
        "Rate limiter sweeper started"
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let removed = admission.sweep();
                if removed > 0 {
                    debug!(
                        target: "chat.admission",
                        removed,
                        remaining = admission.tracked_keys(),
                        "Evicted idle rate limiter entries"
                    );
                }
            }
            () = cancel_token.cancelled() => {
                info!(target: "chat.admission", "Rate limiter sweeper received shutdown signal, exiting");
                break;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::admission::RateLimitConfig;

    fn admission() -> Arc<AdmissionControl> {
        Arc::new(AdmissionControl::new(RateLimitConfig {
            requests_per_minute: 60,
            burst: 5,
            idle_eviction_window: Duration::from_secs(600),
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_on_interval() {
        let admission = admission();
        admission.allow("k");
        let token = CancellationToken::new();

        let handle = tokio::spawn(run_sweeper(
            Arc::clone(&admission),
            Duration::from_secs(60),
            token.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(590)).await;
        assert_eq!(admission.tracked_keys(), 1);

        tokio::time::sleep(Duration::from_secs(70)).await;
        assert_eq!(admission.tracked_keys(), 0);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_on_cancel() {
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_sweeper(
            admission(),
            Duration::from_secs(60),
            token.clone(),
        ));

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should exit after cancellation")
            .unwrap();
    }
}
