//! Live worker: WebSocket subscription with poll fallback.
//!
//! On startup the combined JSONL log is replayed to rebuild projections,
//! then the worker follows the chain head. With a `ws_url` configured it
//! subscribes to logs from the three contracts; without one (or after the
//! subscription drops) it polls `(last+1, head)` ranges over HTTP.

use std::time::Duration;

use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log};
use alloy::transports::ws::WsConnect;
use anyhow::{Context, Result};
use futures_util::StreamExt;
use tracing::{info, warn};

use crate::config::Config;
use crate::eventlog::{self, EventLogs};
use crate::events::{decode_log, RawLogRecord};
use crate::reducer;
use crate::storage::Storage;

use super::gate;
use super::provider::{logs_with_retry, LogSource};

/// The live ingestion worker.
pub struct LiveEngine<L: LogSource> {
    source: L,
    storage: Storage,
    logs: EventLogs,
    config: Config,
}

impl<L: LogSource> LiveEngine<L> {
    /// Create a live engine over the given log source.
    pub fn new(source: L, storage: Storage, logs: EventLogs, config: Config) -> Self {
        Self {
            source,
            storage,
            logs,
            config,
        }
    }

    /// Replay the combined event log through the reducer.
    ///
    /// Every apply is idempotent, so replaying over a database that already
    /// holds some of the events converges to the same projections.
    pub async fn bootstrap(&self) -> Result<()> {
        let (events, skipped) = eventlog::load_combined(self.logs.combined_path())?;
        let total = events.len();
        for event in &events {
            reducer::apply_event(&self.storage, event).await?;
        }
        info!(events = total, skipped, "Replayed combined event log");
        Ok(())
    }

    /// Replay, then follow the chain until cancelled.
    pub async fn run(self) -> Result<()> {
        self.bootstrap().await?;

        let filter = Filter::new().address(self.config.contracts.all().to_vec());

        if let Some(ws_url) = self.config.network.ws_url() {
            match self.run_ws(ws_url, &filter).await {
                Ok(()) => warn!("Log subscription ended; falling back to polling"),
                Err(err) => warn!(error = %err, "WebSocket unavailable; falling back to polling"),
            }
        }

        self.run_poll(&filter).await
    }

    async fn run_ws(&self, ws_url: &str, filter: &Filter) -> Result<()> {
        let provider = ProviderBuilder::new()
            .on_ws(WsConnect::new(ws_url))
            .await
            .with_context(|| format!("Failed to connect to WebSocket: {}", ws_url))?;

        let sub = provider
            .subscribe_logs(filter)
            .await
            .context("Failed to subscribe to contract logs")?;
        info!(ws_url, "Subscribed to contract logs");

        let mut stream = sub.into_stream();
        while let Some(log) = stream.next().await {
            if let Err(err) = self.handle_log(&log).await {
                warn!(error = %err, "Failed to process live log");
            }
        }
        Ok(())
    }

    /// Poll-mode loop. The watermark starts at the head observed on the
    /// first successful tick, so poll mode never re-ingests history; that
    /// is the backfill worker's job.
    async fn run_poll(&self, filter: &Filter) -> Result<()> {
        info!(
            interval_ms = self.config.sync.poll_interval_ms,
            "Polling for new logs"
        );
        let interval = Duration::from_millis(self.config.sync.poll_interval_ms);
        let mut last_processed: Option<u64> = None;

        loop {
            tokio::time::sleep(interval).await;

            let head = match self.source.latest_block().await {
                Ok(head) => head,
                Err(err) => {
                    warn!(error = %err, "Head height query failed; will retry");
                    continue;
                }
            };
            let Some(prev) = last_processed else {
                last_processed = Some(head);
                continue;
            };
            if head <= prev {
                continue;
            }

            let range = filter.clone().from_block(prev + 1).to_block(head);
            let mut logs = match logs_with_retry(
                &self.source,
                &range,
                self.config.backfill.pace_ms,
                self.config.backfill.max_attempts,
            )
            .await
            {
                Ok(logs) => logs,
                Err(err) => {
                    warn!(from = prev + 1, to = head, error = %err, "Poll fetch failed; will retry");
                    continue;
                }
            };
            logs.sort_by_key(|l| (l.block_number.unwrap_or_default(), l.log_index.unwrap_or_default()));

            let mut advanced = true;
            for log in &logs {
                if let Err(err) = self.handle_log(log).await {
                    // Leave the watermark so the whole range is refetched.
                    warn!(error = %err, "Failed to process polled log");
                    advanced = false;
                    break;
                }
            }
            if advanced {
                last_processed = Some(head);
            }
        }
    }

    /// Full ingestion path for one observed log.
    ///
    /// The raw record is durable before the confirmation wait, the decoded
    /// event reaches the database before the JSONL streams, and the streams
    /// are written before the event is announced. `(tx, logIndex)`
    /// idempotence in the reducer makes re-delivery harmless.
    pub async fn handle_log(&self, log: &Log) -> Result<()> {
        self.logs.append_raw(&RawLogRecord::from_log(log))?;

        let Some(block_number) = log.block_number else {
            warn!("Dropping pending log without a block number");
            return Ok(());
        };
        gate::wait_for_confirmations(&self.source, block_number, self.config.sync.confirmations)
            .await;

        let Some(contract) = self.config.contracts.contract_at(log.inner.address) else {
            return Ok(());
        };

        let decoded = decode_log(contract, log);
        reducer::apply_event(&self.storage, &decoded).await?;
        self.logs.append_decoded(&decoded)?;

        info!(
            contract = %decoded.contract,
            event = %decoded.event,
            block = decoded.block,
            tx = %decoded.tx,
            "Indexed event"
        );
        Ok(())
    }
}
