//! Chain reader backed by an Ethereum JSON-RPC endpoint using ethers-rs.

use async_trait::async_trait;
use ethereum_types::{H160, H256, U64};
use ethers::abi::{Function, Token};
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::TransactionRequest;
use log::{debug, error};
use std::future::Future;
use std::time::Duration;

use super::{ChainError, ChainReader, LogEntry, Receipt};

pub struct RpcChainReader {
    provider: Provider<Http>,
    /// Upper bound applied to every individual RPC call
    timeout: Duration,
}

impl RpcChainReader {
    pub fn new(rpc_url: &str, timeout: Duration) -> Result<Self, ChainError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| ChainError::Transport(format!("Failed to create HTTP provider: {}", e)))?;

        Ok(Self { provider, timeout })
    }

    async fn bounded<T, E, F>(&self, call: &str, fut: F) -> Result<T, ChainError>
    where
        F: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                error!("{} failed: {}", call, e);
                Err(ChainError::Transport(format!("{}: {}", call, e)))
            }
            Err(_) => {
                error!("{} timed out after {:?}", call, self.timeout);
                Err(ChainError::Timeout(self.timeout))
            }
        }
    }
}

#[async_trait]
impl ChainReader for RpcChainReader {
    async fn get_receipt(&self, tx_hash: H256) -> Result<Option<Receipt>, ChainError> {
        let receipt = self
            .bounded(
                "eth_getTransactionReceipt",
                self.provider.get_transaction_receipt(tx_hash),
            )
            .await?;

        let receipt = match receipt {
            Some(receipt) => receipt,
            None => return Ok(None),
        };

        // a receipt without a block is not mined yet
        let block_number = match receipt.block_number {
            Some(number) => number.as_u64(),
            None => return Ok(None),
        };

        debug!(
            "Receipt for {:?}: block {}, status {:?}, {} logs",
            tx_hash,
            block_number,
            receipt.status,
            receipt.logs.len()
        );

        Ok(Some(Receipt {
            transaction_hash: receipt.transaction_hash,
            success: receipt.status == Some(U64::from(1)),
            block_number,
            logs: receipt
                .logs
                .into_iter()
                .map(|log| LogEntry {
                    address: log.address,
                    topics: log.topics,
                    data: log.data.to_vec(),
                })
                .collect(),
        }))
    }

    async fn get_current_block_height(&self) -> Result<u64, ChainError> {
        let number = self
            .bounded("eth_blockNumber", self.provider.get_block_number())
            .await?;
        Ok(number.as_u64())
    }

    async fn call_view_function(
        &self,
        contract: H160,
        function: &Function,
        args: &[Token],
    ) -> Result<Vec<Token>, ChainError> {
        let data = function
            .encode_input(args)
            .map_err(|e| ChainError::Decode(format!("Failed to encode {} call: {}", function.name, e)))?;

        let tx: TypedTransaction = TransactionRequest::new().to(contract).data(data).into();
        let output = self.bounded("eth_call", self.provider.call(&tx, None)).await?;

        function
            .decode_output(&output)
            .map_err(|e| ChainError::Decode(format!("Failed to decode {} output: {}", function.name, e)))
    }
}
