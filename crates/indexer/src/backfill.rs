//! Historical backfill worker.
//!
//! One-shot catch-up over `getLogs`: discover where the contracts first
//! emitted logs, then walk forward in fixed chunks, bisecting any chunk the
//! provider rejects as too wide. Fetch failures abandon their subrange and
//! the walk continues; only storage and journal errors are fatal.

use alloy::rpc::types::{Filter, Log};
use anyhow::Result;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::eventlog::EventLogs;
use crate::events::decode_log;
use crate::listener::provider::{is_range_error, logs_with_retry, LogSource};
use crate::reducer;
use crate::storage::Storage;

/// The backfill worker.
pub struct BackfillEngine<L: LogSource> {
    source: L,
    storage: Storage,
    logs: EventLogs,
    config: Config,
}

impl<L: LogSource> BackfillEngine<L> {
    /// Create a backfill engine over the given log source.
    pub fn new(source: L, storage: Storage, logs: EventLogs, config: Config) -> Self {
        Self {
            source,
            storage,
            logs,
            config,
        }
    }

    /// Backfill from the discovered start block up to the current head.
    pub async fn run(&self) -> Result<()> {
        let latest = self.source.latest_block().await?;
        let start = self.find_start_block(latest).await?;

        let chunk_size = self.config.backfill.chunk_size;
        info!(start, latest, chunk_size, "Backfill starting");

        let mut from = start;
        while from <= latest {
            let to = from.saturating_add(chunk_size - 1).min(latest);
            self.process_chunk(from, to).await?;
            from = to + 1;
        }

        info!(start, latest, "Backfill complete");
        Ok(())
    }

    async fn fetch(&self, from: u64, to: u64) -> Result<Vec<Log>> {
        let filter = Filter::new()
            .address(self.config.contracts.all().to_vec())
            .from_block(from)
            .to_block(to);
        logs_with_retry(
            &self.source,
            &filter,
            self.config.backfill.pace_ms,
            self.config.backfill.max_attempts,
        )
        .await
    }

    /// Discover a start block without knowing deployment heights.
    ///
    /// Strides backwards from the head until a window contains any contract
    /// log, then refines forward in smaller steps to the earliest such log.
    /// If nothing is found within `max_lookback`, the lookback floor is the
    /// start block. Discovery is best-effort: a provider that rejects a
    /// probe window as too wide yields a conservative start instead of
    /// failing the run, and the chunk walk bisects from there.
    pub async fn find_start_block(&self, latest: u64) -> Result<u64> {
        let min_block = latest.saturating_sub(self.config.backfill.max_lookback);
        let stride = self.config.backfill.probe_stride;

        let mut high = latest;
        let mut low = high.saturating_sub(stride).max(min_block);

        info!(
            latest,
            min_block, stride, "Searching backwards for the first contract logs"
        );

        loop {
            let logs = match self.fetch(low, high).await {
                Ok(logs) => logs,
                Err(err) if is_range_error(&err) => {
                    warn!(
                        low, high, error = %err,
                        "Provider rejected the probe window; starting at the lookback floor"
                    );
                    return Ok(min_block);
                }
                Err(err) => return Err(err),
            };
            if !logs.is_empty() {
                info!(low, high, count = logs.len(), "Found a populated window");
                break;
            }
            if low <= min_block {
                warn!(
                    min_block,
                    latest, "No logs within the lookback window; starting at the floor"
                );
                return Ok(min_block);
            }
            high = low - 1;
            low = high.saturating_sub(stride - 1).max(min_block);
        }

        let refine = self.config.backfill.refine_step;
        let mut candidate = low;
        while candidate <= high {
            let to = candidate.saturating_add(refine - 1).min(high);
            let logs = match self.fetch(candidate, to).await {
                Ok(logs) => logs,
                Err(err) if is_range_error(&err) => {
                    warn!(
                        from = candidate, to, error = %err,
                        "Provider rejected the refine window; starting at the populated window"
                    );
                    return Ok(candidate);
                }
                Err(err) => return Err(err),
            };
            if let Some(earliest) = logs.iter().filter_map(|l| l.block_number).min() {
                info!(start_block = earliest, "Earliest log block found");
                return Ok(earliest);
            }
            candidate = to + 1;
        }

        Ok(low)
    }

    /// Fetch and ingest `[from, to]`, bisecting on range complaints.
    ///
    /// The worklist keeps subranges in ascending order so events are still
    /// ingested oldest-first. A single-block range the provider still
    /// rejects, or a range whose retries are exhausted, is logged and
    /// skipped rather than failing the whole run.
    async fn process_chunk(&self, from: u64, to: u64) -> Result<()> {
        let mut worklist = vec![(from, to)];

        while let Some((lo, hi)) = worklist.pop() {
            let logs = match self.fetch(lo, hi).await {
                Ok(logs) => logs,
                Err(err) if is_range_error(&err) && hi > lo => {
                    let mid = lo + (hi - lo) / 2;
                    worklist.push((mid + 1, hi));
                    worklist.push((lo, mid));
                    continue;
                }
                Err(err) => {
                    error!(from = lo, to = hi, error = %err, "Backfill chunk failed; skipping range");
                    continue;
                }
            };

            info!(from = lo, to = hi, count = logs.len(), "Backfill chunk");
            if !logs.is_empty() {
                self.ingest(logs).await?;
            }
        }

        Ok(())
    }

    /// Decode, apply, and journal a batch in `(block, logIndex)` order.
    async fn ingest(&self, mut logs: Vec<Log>) -> Result<()> {
        logs.sort_by_key(|l| {
            (
                l.block_number.unwrap_or_default(),
                l.log_index.unwrap_or_default(),
            )
        });

        for log in &logs {
            let Some(contract) = self.config.contracts.contract_at(log.inner.address) else {
                continue;
            };
            let decoded = decode_log(contract, log);
            reducer::apply_event(&self.storage, &decoded).await?;
            self.logs.append_decoded(&decoded)?;
        }

        Ok(())
    }
}
