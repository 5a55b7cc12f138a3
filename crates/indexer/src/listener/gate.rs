//! Confirmation gate.
//!
//! A log observed at block N is only decoded once the head has reached
//! N + confirmations, so shallow reorgs cannot leave phantom events in
//! the durable log.

use std::time::Duration;

use tracing::warn;

use super::provider::LogSource;

/// Fixed head-poll cadence while a log is suspended at the gate.
pub const HEAD_POLL_INTERVAL: Duration = Duration::from_millis(1200);

/// Wait until `head >= block_number + confirmations`.
///
/// Head query failures are logged and retried on the same cadence; the
/// gate never proceeds early and never gives up.
pub async fn wait_for_confirmations<L: LogSource>(
    source: &L,
    block_number: u64,
    confirmations: u64,
) {
    let target = block_number.saturating_add(confirmations);
    loop {
        match source.latest_block().await {
            Ok(head) if head >= target => return,
            Ok(_) => {}
            Err(err) => {
                warn!(block_number, error = %err, "Head height query failed; retrying")
            }
        }
        tokio::time::sleep(HEAD_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::rpc::types::{Filter, Log};
    use anyhow::Result;
    use std::future::Future;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Head that advances by one block per query, starting at 100.
    struct AdvancingHead {
        head: AtomicU64,
        failures_first: u64,
        queries: AtomicU64,
    }

    impl LogSource for AdvancingHead {
        fn latest_block(&self) -> impl Future<Output = Result<u64>> + Send {
            let n = self.queries.fetch_add(1, Ordering::SeqCst);
            let fail = n < self.failures_first;
            let head = self.head.fetch_add(1, Ordering::SeqCst);
            async move {
                if fail {
                    anyhow::bail!("head unavailable")
                } else {
                    Ok(head)
                }
            }
        }

        fn logs(&self, _filter: &Filter) -> impl Future<Output = Result<Vec<Log>>> + Send {
            async move { Ok(Vec::new()) }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn releases_only_once_head_is_deep_enough() {
        let source = AdvancingHead {
            head: AtomicU64::new(100),
            failures_first: 0,
            queries: AtomicU64::new(0),
        };

        // Block 102 with 3 confirmations: released when head reaches 105,
        // which takes several poll ticks from 100.
        wait_for_confirmations(&source, 102, 3).await;
        assert!(source.head.load(Ordering::SeqCst) >= 105);
    }

    #[tokio::test(start_paused = true)]
    async fn survives_head_query_failures() {
        let source = AdvancingHead {
            head: AtomicU64::new(100),
            failures_first: 3,
            queries: AtomicU64::new(0),
        };

        wait_for_confirmations(&source, 100, 1).await;
        assert!(source.queries.load(Ordering::SeqCst) > 3);
    }

    #[tokio::test(start_paused = true)]
    async fn already_confirmed_block_returns_immediately() {
        let source = AdvancingHead {
            head: AtomicU64::new(100),
            failures_first: 0,
            queries: AtomicU64::new(0),
        };

        wait_for_confirmations(&source, 10, 3).await;
        assert_eq!(source.queries.load(Ordering::SeqCst), 1);
    }
}
