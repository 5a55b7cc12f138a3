//! Log ingestion for the curio contracts.
//!
//! This module provides:
//! - The `LogSource` abstraction over the RPC provider
//! - The confirmation gate (finality before decode)
//! - The live worker (WS subscription with poll fallback)

pub mod gate;
pub mod live;
pub mod provider;

pub use live::LiveEngine;
pub use provider::{LogSource, RpcProvider};
