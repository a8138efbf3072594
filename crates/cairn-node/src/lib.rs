//! # cairn-node
//! RocksDB storage, configuration, and service loops.
//!
//! Composes the Cairn chain-state engine into a running node:
//! - [`storage::RocksStore`]: [`KeyValueStore`](cairn_core::traits::KeyValueStore) backed by RocksDB
//! - [`node::Node`]: chain and pool services wired through channels
//! - [`node::ChainUpdateBus`]: ordered delivery of main-chain changes
//! - [`config::NodeConfig`]: node configuration

pub mod config;
pub mod error;
pub mod node;
pub mod storage;

pub use config::NodeConfig;
pub use error::NodeError;
pub use node::{ChainUpdateBus, Node};
pub use storage::RocksStore;
