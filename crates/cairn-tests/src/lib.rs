//! Integration test suite for Cairn.
//!
//! Exercises the block tree, UTXO set, and transaction pool together, over
//! both the in-memory store and RocksDB, including adversarial inputs.

pub mod helpers;
