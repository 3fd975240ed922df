//! Publish confirmation verifier.
//!
//! Given a transaction hash reported by a client, re-derive from the chain
//! that the transaction is mined, successful and final enough, and that it
//! registered an active registry entry carrying the listing's content id. Checks run cheapest first and stop at the
//! first failure so the caller gets a precise retry signal.

use ethereum_types::{H256, U256};
use ethers::abi::Token;
use log::{debug, info, warn};
use std::sync::Arc;

use super::{active_flag, format_tx_hash, registered_content_id, ChainReader, Receipt, RegistryContract};
use crate::error::{MarketError, Result};

/// Facts established about a registry transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedPublish {
    pub onchain_id: u64,
    pub transaction_hash: String,
    pub block_number: u64,
    pub confirmations: u64,
}

pub struct PublishVerifier {
    chain: Arc<dyn ChainReader>,
    registry: RegistryContract,
    min_confirmations: u64,
}

impl PublishVerifier {
    pub fn new(chain: Arc<dyn ChainReader>, registry: RegistryContract, min_confirmations: u64) -> Self {
        Self {
            chain,
            registry,
            min_confirmations,
        }
    }

    pub fn registry(&self) -> &RegistryContract {
        &self.registry
    }

    /// Receipt of a mined, successful transaction with enough confirmations.
    /// Shared by publish confirmation and payment confirmation.
    pub async fn confirmed_receipt(&self, tx_hash: H256) -> Result<(Receipt, u64)> {
        let hash = format_tx_hash(&tx_hash);

        let receipt = self.chain.get_receipt(tx_hash).await?.ok_or_else(|| {
            warn!("No receipt for {}", hash);
            MarketError::ReceiptNotFound(hash.clone())
        })?;

        if !receipt.success {
            warn!("Transaction {} reverted in block {}", hash, receipt.block_number);
            return Err(MarketError::TransactionReverted(hash));
        }

        let height = self.chain.get_current_block_height().await?;
        let confirmations = height.saturating_sub(receipt.block_number);
        debug!(
            "Transaction {}: head {}, mined in {}, {} confirmations",
            hash, height, receipt.block_number, confirmations
        );

        if confirmations < self.min_confirmations {
            warn!(
                "Transaction {} has {} confirmations, waiting for {}",
                hash, confirmations, self.min_confirmations
            );
            return Err(MarketError::InsufficientConfirmations {
                have: confirmations,
                need: self.min_confirmations,
            });
        }

        Ok((receipt, confirmations))
    }

    /// Run every publish check against `tx_hash` for the listing pinned as
    /// `expected_content_id`. Nothing is written here; applying the result is
    /// the lifecycle manager's job.
    pub async fn verify(&self, tx_hash: H256, expected_content_id: &str) -> Result<VerifiedPublish> {
        let hash = format_tx_hash(&tx_hash);
        let (receipt, confirmations) = self.confirmed_receipt(tx_hash).await?;

        let raw_id = self
            .registry
            .listing_id_from_logs(&receipt)
            .filter(|id| !id.is_zero())
            .ok_or_else(|| {
                warn!("Transaction {} carries no registry log", hash);
                MarketError::IdNotFoundInLogs(hash.clone())
            })?;

        if raw_id > U256::from(u64::MAX) {
            warn!("Registry id {} in {} does not fit 64 bits", raw_id, hash);
            return Err(MarketError::IdNotFoundInLogs(hash));
        }
        let onchain_id = raw_id.as_u64();

        let function = self.registry.details_function()?;
        let details = self
            .chain
            .call_view_function(self.registry.address(), function, &[Token::Uint(raw_id)])
            .await?;

        match active_flag(&details) {
            Some(true) => {}
            Some(false) => {
                warn!("Registry listing {} is not active", onchain_id);
                return Err(MarketError::ListingNotActiveOnchain(onchain_id));
            }
            None => {
                return Err(MarketError::ChainAccess(format!(
                    "{} returned no active flag for listing {}",
                    function.name, onchain_id
                )));
            }
        }

        match registered_content_id(&details) {
            Some(cid) if cid == expected_content_id => {}
            Some(cid) => {
                warn!(
                    "Registry listing {} in {} records content {}, expected {}",
                    onchain_id, hash, cid, expected_content_id
                );
                return Err(MarketError::Validation(format!(
                    "transaction {} registered content {} rather than {}",
                    hash, cid, expected_content_id
                )));
            }
            None => {
                return Err(MarketError::ChainAccess(format!(
                    "{} returned no content id for listing {}",
                    function.name, onchain_id
                )));
            }
        }

        info!(
            "Verified registry listing {} in transaction {} ({} confirmations)",
            onchain_id, hash, confirmations
        );

        Ok(VerifiedPublish {
            onchain_id,
            transaction_hash: hash,
            block_number: receipt.block_number,
            confirmations,
        })
    }
}
