//! RPC provider wrapper and retry policy.
//!
//! Everything that fetches chain data goes through [`LogSource`], so the
//! backfill and live workers can be driven by a fake source in tests.

use std::future::Future;
use std::time::Duration;

use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{Filter, Log};
use alloy::transports::http::{Client, Http};
use anyhow::{Context, Result};
use rand::Rng;
use tracing::warn;

/// Capability to query the chain head and fetch logs.
pub trait LogSource: Send + Sync {
    /// Latest block number.
    fn latest_block(&self) -> impl Future<Output = Result<u64>> + Send;

    /// All logs matching the filter.
    fn logs(&self, filter: &Filter) -> impl Future<Output = Result<Vec<Log>>> + Send;
}

/// HTTP RPC provider.
#[derive(Clone)]
pub struct RpcProvider {
    provider: RootProvider<Http<Client>>,
}

impl RpcProvider {
    /// Create a new RPC provider.
    pub fn new(rpc_url: &str) -> Result<Self> {
        let url = rpc_url
            .parse()
            .with_context(|| format!("Invalid RPC URL: {}", rpc_url))?;

        let provider = ProviderBuilder::new().on_http(url);

        Ok(Self { provider })
    }
}

impl LogSource for RpcProvider {
    fn latest_block(&self) -> impl Future<Output = Result<u64>> + Send {
        async move {
            self.provider
                .get_block_number()
                .await
                .context("Failed to get block number")
        }
    }

    fn logs(&self, filter: &Filter) -> impl Future<Output = Result<Vec<Log>>> + Send {
        async move {
            self.provider
                .get_logs(filter)
                .await
                .context("Failed to fetch logs from RPC")
        }
    }
}

const BACKOFF_BASE_MS: u64 = 600;
const BACKOFF_JITTER_MS: u64 = 300;

/// Rate-limit or transient transport failure: worth backing off and
/// retrying the same request.
pub fn is_transient_error(err: &anyhow::Error) -> bool {
    let msg = format!("{:#}", err).to_lowercase();
    msg.contains("too many requests")
        || msg.contains("rate limit")
        || msg.contains("timeout")
        || msg.contains("timed out")
        || msg.contains("connection reset")
        || msg.contains("econnreset")
        || msg.contains("etimedout")
        || msg.contains("server error")
        || msg.contains("busy")
}

/// Provider complaint about range width or response size: a signal for
/// the caller to split the range, not a failure of the request itself.
pub fn is_range_error(err: &anyhow::Error) -> bool {
    let msg = format!("{:#}", err).to_lowercase();
    msg.contains("query returned more than")
        || msg.contains("too many results")
        || msg.contains("log response size")
        || msg.contains("block range is too wide")
        || msg.contains("response for request")
}

/// Fetch logs with pacing and bounded exponential backoff.
///
/// Each call is preceded by a `pace_ms` pause. Transient errors back off
/// `600 * 2^(attempt-1)` ms plus up to 300ms of jitter for at most
/// `max_attempts` retries. Range errors are returned immediately so the
/// caller can bisect.
pub async fn logs_with_retry<L: LogSource>(
    source: &L,
    filter: &Filter,
    pace_ms: u64,
    max_attempts: u32,
) -> Result<Vec<Log>> {
    let mut attempt: u32 = 1;
    loop {
        tokio::time::sleep(Duration::from_millis(pace_ms)).await;

        match source.logs(filter).await {
            Ok(logs) => return Ok(logs),
            Err(err) if is_range_error(&err) => return Err(err),
            Err(err) if is_transient_error(&err) && attempt <= max_attempts => {
                let base = BACKOFF_BASE_MS * 2u64.pow(attempt - 1);
                let jitter = rand::thread_rng().gen_range(0..BACKOFF_JITTER_MS);
                let wait = base + jitter;
                warn!(attempt, wait_ms = wait, "Rate-limited or busy, backing off");
                tokio::time::sleep(Duration::from_millis(wait)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakySource {
        calls: AtomicU32,
        fail_times: u32,
        error: &'static str,
    }

    impl LogSource for FlakySource {
        fn latest_block(&self) -> impl Future<Output = Result<u64>> + Send {
            async move { Ok(0) }
        }

        fn logs(&self, _filter: &Filter) -> impl Future<Output = Result<Vec<Log>>> + Send {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let fail = n < self.fail_times;
            let error = self.error;
            async move {
                if fail {
                    anyhow::bail!("{}", error)
                } else {
                    Ok(Vec::new())
                }
            }
        }
    }

    #[test]
    fn error_classification() {
        let rate = anyhow::anyhow!("429 Too Many Requests");
        assert!(is_transient_error(&rate));
        assert!(!is_range_error(&rate));

        let range = anyhow::anyhow!("query returned more than 10000 results");
        assert!(is_range_error(&range));

        let other = anyhow::anyhow!("invalid argument");
        assert!(!is_transient_error(&other));
        assert!(!is_range_error(&other));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_then_succeeds() {
        let source = FlakySource {
            calls: AtomicU32::new(0),
            fail_times: 2,
            error: "too many requests",
        };
        let filter = Filter::new();

        let logs = logs_with_retry(&source, &filter, 0, 6).await.unwrap();
        assert!(logs.is_empty());
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let source = FlakySource {
            calls: AtomicU32::new(0),
            fail_times: u32::MAX,
            error: "timeout",
        };
        let filter = Filter::new();

        let err = logs_with_retry(&source, &filter, 0, 3).await.unwrap_err();
        assert!(is_transient_error(&err));
        // 1 initial + 3 retries
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn range_errors_are_returned_without_retry() {
        let source = FlakySource {
            calls: AtomicU32::new(0),
            fail_times: u32::MAX,
            error: "block range is too wide",
        };
        let filter = Filter::new();

        let err = logs_with_retry(&source, &filter, 0, 6).await.unwrap_err();
        assert!(is_range_error(&err));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }
}
