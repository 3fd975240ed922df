//! Marketplace node
//!
//! Backend for trading-bot listings: developers create listings, pin their
//! canonical metadata to IPFS, register them on the bot registry contract and
//! report the transaction back so the node can independently confirm it.
//! Consumers subscribe to published listings by paying on-chain.

pub mod api;
pub mod chain;
pub mod config;
pub mod error;
pub mod listing;
pub mod pinning;
pub mod storage;
pub mod subscription;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{MarketError, Result};
