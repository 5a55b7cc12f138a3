//! Event-sourcing indexer for the curio collectible contracts.
//!
//! This crate provides:
//! - Log decoding for the registry, NFT, and marketplace contracts
//! - A confirmation gate so shallow reorgs never reach the durable log
//! - Append-only JSONL event journals (the source of truth)
//! - A reducer that folds events into SQLite projections
//! - A live worker (WebSocket subscription with poll fallback)
//! - A one-shot historical backfill worker
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────┐
//! │  curio-indexer (this)            │
//! │                                  │
//! │  ┌──────────────┐                │
//! │  │ Live worker  │ ← WS / HTTP RPC│
//! │  │ (tokio task) │   three curio  │
//! │  └──────┬───────┘   contracts    │
//! │         │ confirmed logs         │
//! │   ┌─────▼──────┐                 │
//! │   │ JSONL logs │ ← append-only   │
//! │   │ + reducer  │   replayable    │
//! │   └─────┬──────┘                 │
//! │         │ projections            │
//! │   ┌─────▼──────┐                 │
//! │   │  SQLite    │ listings,       │
//! │   │            │ collectibles,   │
//! │   └────────────┘ activity        │
//! └──────────────────────────────────┘
//!          │
//!          │ shared DB + data dir
//!          │
//! ┌────────▼─────────────────────────┐
//! │  curio-api (separate service)    │
//! │  read-only HTTP API (axum)       │
//! └──────────────────────────────────┘
//! ```
//!
//! # Separation of Concerns
//!
//! - **indexer**: Ingests logs, journals events, maintains projections (this crate)
//! - **api**: Reads projections and journals, serves HTTP queries (curio-api)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backfill;
pub mod config;
pub mod eventlog;
pub mod events;
pub mod listener;
pub mod reducer;
pub mod storage;
