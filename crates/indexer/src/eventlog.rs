//! Durable JSONL event log.
//!
//! Every decoded event is appended to a per-contract stream and to the
//! combined `collectible_log.jsonl`, which is the disaster-recovery source
//! of truth: replaying it through the reducer rebuilds every projection.
//! Raw logs are captured pre-decode in `raw_logs.jsonl` for forensics.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::warn;

use crate::events::{DecodedEvent, RawLogRecord, SourceContract};

/// Append-only writer for one newline-delimited JSON file.
///
/// Writes are serialized through a mutex so concurrent appenders never
/// interleave partial lines.
pub struct JsonlSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlSink {
    /// Open (or create) the file in append mode, creating parent dirs.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open event log: {}", path.display()))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Serialize `value` as one JSON line and append it.
    pub fn append<T: Serialize>(&self, value: &T) -> Result<()> {
        let line = serde_json::to_string(value).context("Failed to serialize event log line")?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("Event log writer mutex poisoned"))?;
        writeln!(file, "{}", line)
            .with_context(|| format!("Failed to append to {}", self.path.display()))?;
        Ok(())
    }

    /// Path this sink writes to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// File names of the five JSONL streams inside the data directory.
pub const RAW_LOG_FILE: &str = "raw_logs.jsonl";
pub const REGISTRY_LOG_FILE: &str = "registry_log.jsonl";
pub const NFT_LOG_FILE: &str = "nft_log.jsonl";
pub const MARKET_LOG_FILE: &str = "market_log.jsonl";
pub const COMBINED_LOG_FILE: &str = "collectible_log.jsonl";

/// The set of JSONL streams the indexer appends to.
pub struct EventLogs {
    raw: JsonlSink,
    registry: JsonlSink,
    nft: JsonlSink,
    market: JsonlSink,
    combined: JsonlSink,
}

impl EventLogs {
    /// Open all five streams under `data_dir`.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let dir = data_dir.as_ref();
        Ok(Self {
            raw: JsonlSink::open(dir.join(RAW_LOG_FILE))?,
            registry: JsonlSink::open(dir.join(REGISTRY_LOG_FILE))?,
            nft: JsonlSink::open(dir.join(NFT_LOG_FILE))?,
            market: JsonlSink::open(dir.join(MARKET_LOG_FILE))?,
            combined: JsonlSink::open(dir.join(COMBINED_LOG_FILE))?,
        })
    }

    /// Record a log as observed, before any decoding.
    pub fn append_raw(&self, record: &RawLogRecord) -> Result<()> {
        self.raw.append(record)
    }

    /// Record a decoded event in its contract stream and the combined
    /// stream. The combined append happens last so a partially written
    /// event never reaches the replay source without its origin stream.
    pub fn append_decoded(&self, event: &DecodedEvent) -> Result<()> {
        match event.contract {
            SourceContract::Registry => self.registry.append(event)?,
            SourceContract::Nft => self.nft.append(event)?,
            SourceContract::Market => self.market.append(event)?,
        }
        self.combined.append(event)
    }

    /// Path of the combined stream (the replay source).
    pub fn combined_path(&self) -> &Path {
        self.combined.path()
    }
}

/// Stream file name for a recent-events query. `None` selects the
/// combined stream.
pub fn stream_file(contract: Option<SourceContract>) -> &'static str {
    match contract {
        Some(SourceContract::Registry) => REGISTRY_LOG_FILE,
        Some(SourceContract::Nft) => NFT_LOG_FILE,
        Some(SourceContract::Market) => MARKET_LOG_FILE,
        None => COMBINED_LOG_FILE,
    }
}

/// Load a combined event log for replay, in file order.
///
/// Returns the parseable events plus a count of skipped malformed lines.
/// Corruption is never fatal: a damaged log still yields every recoverable
/// event. A missing file is an empty log.
pub fn load_combined(path: &Path) -> Result<(Vec<DecodedEvent>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("Failed to open event log: {}", path.display()))
        }
    };

    let mut events = Vec::new();
    let mut skipped = 0u64;

    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<DecodedEvent>(line) {
            Ok(ev) => events.push(ev),
            Err(err) => {
                warn!(line = lineno + 1, error = %err, "Skipping malformed event log line");
                skipped += 1;
            }
        }
    }

    Ok((events, skipped))
}

/// Read the last `limit` well-formed JSON lines of a stream, oldest first.
/// A missing file is an empty stream.
pub fn read_recent(path: &Path, limit: usize) -> Result<Vec<serde_json::Value>> {
    let data = match std::fs::read_to_string(path) {
        Ok(d) => d,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("Failed to read event log: {}", path.display()))
        }
    };

    let lines: Vec<&str> = data
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let start = lines.len().saturating_sub(limit);
    Ok(lines[start..]
        .iter()
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn sample_event(tx: &str, log_index: u64) -> DecodedEvent {
        let mut args = BTreeMap::new();
        args.insert("tokenId".to_string(), "1".to_string());
        args.insert("owner".to_string(), "0x0707".to_string());
        DecodedEvent {
            observed_at: 1,
            contract: SourceContract::Nft,
            event: "MintedNFT".to_string(),
            args,
            tx: tx.to_string(),
            block: 10,
            log_index,
        }
    }

    #[test]
    fn append_decoded_writes_contract_and_combined_streams() {
        let dir = TempDir::new().unwrap();
        let logs = EventLogs::open(dir.path()).unwrap();

        logs.append_decoded(&sample_event("0x01", 0)).unwrap();

        let nft = std::fs::read_to_string(dir.path().join(NFT_LOG_FILE)).unwrap();
        let combined = std::fs::read_to_string(dir.path().join(COMBINED_LOG_FILE)).unwrap();
        assert_eq!(nft.lines().count(), 1);
        assert_eq!(combined.lines().count(), 1);
        assert!(combined.contains("\"MintedNFT\""));

        let market = std::fs::read_to_string(dir.path().join(MARKET_LOG_FILE)).unwrap();
        assert!(market.is_empty());
    }

    #[test]
    fn load_combined_skips_malformed_lines_and_counts_them() {
        let dir = TempDir::new().unwrap();
        let logs = EventLogs::open(dir.path()).unwrap();
        logs.append_decoded(&sample_event("0x01", 0)).unwrap();
        logs.append_decoded(&sample_event("0x01", 1)).unwrap();

        // Corrupt the middle of the file.
        let path = dir.path().join(COMBINED_LOG_FILE);
        let mut contents = std::fs::read_to_string(&path).unwrap();
        contents.push_str("{not json\n");
        std::fs::write(&path, contents).unwrap();
        logs.append_decoded(&sample_event("0x02", 0)).unwrap();

        let (events, skipped) = load_combined(&path).unwrap();

        assert_eq!(skipped, 1);
        let seen: Vec<(String, u64)> = events
            .iter()
            .map(|ev| (ev.tx.clone(), ev.log_index))
            .collect();
        assert_eq!(
            seen,
            vec![
                ("0x01".to_string(), 0),
                ("0x01".to_string(), 1),
                ("0x02".to_string(), 0)
            ]
        );
    }

    #[test]
    fn load_combined_of_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let (events, skipped) = load_combined(&dir.path().join("nope.jsonl")).unwrap();
        assert!(events.is_empty());
        assert_eq!(skipped, 0);
    }

    #[test]
    fn read_recent_returns_last_lines_oldest_first() {
        let dir = TempDir::new().unwrap();
        let logs = EventLogs::open(dir.path()).unwrap();
        for i in 0..5 {
            logs.append_decoded(&sample_event("0xaa", i)).unwrap();
        }

        let recent = read_recent(&dir.path().join(COMBINED_LOG_FILE), 2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0]["logIndex"], 3);
        assert_eq!(recent[1]["logIndex"], 4);

        let missing = read_recent(&dir.path().join("absent.jsonl"), 10).unwrap();
        assert!(missing.is_empty());
    }
}
