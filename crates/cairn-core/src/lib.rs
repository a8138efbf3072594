//! # cairn-core
//! Chain-state engine: UTXO set, block tree with reorganization, and the
//! transaction pool, plus the types and traits they share.

pub mod chain;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod genesis;
pub mod locator;
pub mod mempool;
pub mod merkle;
pub mod storage;
pub mod traits;
pub mod types;
pub mod utxo;
pub mod validation;
