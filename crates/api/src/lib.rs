//! Axum-based read API for the curio indexer.
//!
//! This crate provides:
//! - `/health` - Chain and contract identity
//! - `/events/recent` - Tail of the JSONL event streams
//! - `/listings`, `/collectibles`, `/owner/:address` - Projection reads
//! - `/activity/:address` - Per-address activity trail
//! - `/collectible/by-token/:tokenId`, `/collectible/by-rfid-hash/:rfidHash`
//! - `/admin/rfid-hash-exists/:rfidHash` and image upload/serving
//!
//! The indexer service owns all chain ingestion; this service only reads
//! the shared database and data directory (plus the one image write).

#![warn(missing_docs)]

pub mod server;
