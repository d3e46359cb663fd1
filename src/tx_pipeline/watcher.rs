//! Block-height watcher
//!
//! Waits for an externally paced condition: the network's height moving past
//! `baseline + delta`. Used to detect when a freshly extended address table
//! has become visible.
//!
//! The wait is bounded by an optional deadline and can be cancelled through a
//! [`Shutdown`] signal; both apply to in-flight RPC calls as well as to the
//! sleep between ticks. Transient RPC failures are logged and retried on the
//! next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, warn};

use super::errors::{PipelineError, PipelineResult};
use super::shutdown::Shutdown;
use crate::config::WatcherConfig;
use crate::ledger::LedgerClient;
use crate::metrics::metrics;

pub struct BlockHeightWatcher<L: ?Sized> {
    ledger: Arc<L>,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl<L: LedgerClient + ?Sized> BlockHeightWatcher<L> {
    pub fn new(ledger: Arc<L>, config: &WatcherConfig) -> Self {
        Self {
            ledger,
            poll_interval: config.poll_interval(),
            timeout: config.timeout(),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Wait until the current height is strictly greater than `baseline + delta`.
    ///
    /// With `baseline = None` the first successfully polled height becomes the
    /// baseline. Returns the height that satisfied the condition.
    pub async fn wait_for_advance(
        &self,
        baseline: Option<u64>,
        delta: u64,
        shutdown: &Shutdown,
    ) -> PipelineResult<u64> {
        let mut shutdown = shutdown.clone();
        if shutdown.is_cancelled() {
            return Err(PipelineError::Cancelled("waiting for block height"));
        }

        let started = Instant::now();
        let deadline = self.timeout.map(|t| started + t);
        let mut target = baseline.map(|b| b.saturating_add(delta));
        let timed_out = |target: Option<u64>| PipelineError::WatchTimeout {
            target: target.unwrap_or_default(),
            waited_ms: started.elapsed().as_millis() as u64,
        };

        loop {
            metrics().watcher_polls.inc();
            let polled = tokio::select! {
                polled = self.ledger.get_current_height() => polled,
                _ = shutdown.cancelled() => {
                    return Err(PipelineError::Cancelled("waiting for block height"));
                }
                _ = deadline_reached(deadline) => return Err(timed_out(target)),
            };

            match polled {
                Ok(height) => match target {
                    None => {
                        let t = height.saturating_add(delta);
                        debug!(baseline = height, target = t, "Captured baseline height");
                        target = Some(t);
                    }
                    Some(t) if height > t => {
                        debug!(
                            height,
                            target = t,
                            waited_ms = started.elapsed().as_millis() as u64,
                            "Block height advanced"
                        );
                        return Ok(height);
                    }
                    Some(t) => debug!(height, target = t, "Waiting for block height"),
                },
                Err(err) if err.is_retryable() => {
                    metrics().watcher_poll_failures.inc();
                    warn!(error = %err, "Transient failure polling block height, retrying");
                }
                Err(err) => return Err(err.into()),
            }

            tokio::select! {
                _ = sleep(self.poll_interval) => {}
                _ = shutdown.cancelled() => {
                    return Err(PipelineError::Cancelled("waiting for block height"));
                }
                _ = deadline_reached(deadline) => return Err(timed_out(target)),
            }
        }
    }
}

async fn deadline_reached(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockLedger;
    use crate::tx_pipeline::shutdown::shutdown_channel;

    fn watcher(ledger: Arc<MockLedger>, timeout: Option<Duration>) -> BlockHeightWatcher<MockLedger> {
        let config = WatcherConfig {
            poll_interval_ms: 1000,
            timeout_secs: None,
        };
        BlockHeightWatcher::new(ledger, &config).with_timeout(timeout)
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolves_strictly_past_baseline_plus_delta() {
        let ledger = Arc::new(MockLedger::new());
        let base = ledger.current_height();
        let watcher = watcher(ledger.clone(), None);

        let reached = watcher
            .wait_for_advance(Some(base), 3, &Shutdown::never())
            .await
            .unwrap();
        assert!(reached > base + 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_baseline_is_captured_at_call_time() {
        let ledger = Arc::new(MockLedger::new());
        let before = ledger.current_height();
        let watcher = watcher(ledger.clone(), None);

        let reached = watcher
            .wait_for_advance(None, 1, &Shutdown::never())
            .await
            .unwrap();
        assert!(reached > before + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_poll_failures_do_not_abort() {
        let ledger = Arc::new(MockLedger::new());
        ledger.fail_next_height_polls(3);
        let base = ledger.current_height();
        let watcher = watcher(ledger.clone(), None);

        let reached = watcher
            .wait_for_advance(Some(base), 1, &Shutdown::never())
            .await
            .unwrap();
        assert!(reached > base + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_chain_times_out() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_auto_advance(false);
        let base = ledger.current_height();
        let watcher = watcher(ledger, Some(Duration::from_secs(10)));

        let err = watcher
            .wait_for_advance(Some(base), 1, &Shutdown::never())
            .await
            .unwrap_err();
        match err {
            PipelineError::WatchTimeout { target, waited_ms } => {
                assert_eq!(target, base + 1);
                assert!(waited_ms >= 10_000);
            }
            other => panic!("expected WatchTimeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_wait() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_auto_advance(false);
        let base = ledger.current_height();
        let watcher = watcher(ledger, None);
        let (trigger, shutdown) = shutdown_channel();

        let wait = watcher.wait_for_advance(Some(base), 1, &shutdown);
        let cancel = async {
            sleep(Duration::from_secs(5)).await;
            trigger.trigger();
        };
        let (result, _) = tokio::join!(wait, cancel);
        assert!(matches!(result, Err(PipelineError::Cancelled(_))));
    }
}
