//! In-process stand-ins for the chain node and the pinning service.

use async_trait::async_trait;
use ethereum_types::{H160, H256, U256};
use ethers::abi::{Function, Token};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::chain::{ChainError, ChainReader, LogEntry, PaymentContract, Receipt};
use crate::pinning::{ContentPinner, PinError, PinnedContent};

pub const REGISTRY: H160 = H160([0x5f; 20]);
pub const PAYMENTS: H160 = H160([0x9a; 20]);
pub const SUBSCRIBER_WALLET: H160 = H160([0xab; 20]);

/// Receipt of a registry transaction announcing `onchain_id`.
pub fn registry_receipt(tx: H256, block_number: u64, success: bool, onchain_id: u64) -> Receipt {
    let mut word = [0u8; 32];
    U256::from(onchain_id).to_big_endian(&mut word);
    Receipt {
        transaction_hash: tx,
        success,
        block_number,
        logs: vec![LogEntry {
            address: REGISTRY,
            topics: vec![H256::repeat_byte(0xe1), H256::from(word)],
            data: vec![],
        }],
    }
}

/// Receipt of a payment-contract transaction settling `amount` for `bot_id`.
pub fn payment_receipt(tx: H256, block_number: u64, bot_id: u64, amount: u64) -> Receipt {
    let contract = PaymentContract::new(PAYMENTS).unwrap();
    Receipt {
        transaction_hash: tx,
        success: true,
        block_number,
        logs: vec![LogEntry {
            address: PAYMENTS,
            topics: vec![contract.event_topic()],
            data: ethers::abi::encode(&[
                Token::Uint(U256::from(bot_id)),
                Token::Address(SUBSCRIBER_WALLET),
                Token::Address(H160::repeat_byte(0xde)),
                Token::Uint(U256::from(amount)),
                Token::Uint(U256::from(amount / 20)),
            ]),
        }],
    }
}

pub struct FakeChain {
    receipts: Mutex<HashMap<H256, Receipt>>,
    bots: Mutex<HashMap<u64, (String, bool)>>,
    height: AtomicU64,
    offline: AtomicBool,
    height_calls: AtomicUsize,
    view_calls: AtomicUsize,
}

impl FakeChain {
    pub fn new(height: u64) -> Self {
        Self {
            receipts: Mutex::new(HashMap::new()),
            bots: Mutex::new(HashMap::new()),
            height: AtomicU64::new(height),
            offline: AtomicBool::new(false),
            height_calls: AtomicUsize::new(0),
            view_calls: AtomicUsize::new(0),
        }
    }

    pub fn add_receipt(&self, receipt: Receipt) {
        self.receipts.lock().insert(receipt.transaction_hash, receipt);
    }

    /// Registry entry `onchain_id` recording `content_id`.
    pub fn register_bot(&self, onchain_id: u64, content_id: &str, active: bool) {
        self.bots.lock().insert(onchain_id, (content_id.to_string(), active));
    }

    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn height_calls(&self) -> usize {
        self.height_calls.load(Ordering::SeqCst)
    }

    pub fn view_calls(&self) -> usize {
        self.view_calls.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), ChainError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ChainError::Transport("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainReader for FakeChain {
    async fn get_receipt(&self, tx_hash: H256) -> Result<Option<Receipt>, ChainError> {
        self.check_online()?;
        Ok(self.receipts.lock().get(&tx_hash).cloned())
    }

    async fn get_current_block_height(&self) -> Result<u64, ChainError> {
        self.check_online()?;
        self.height_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn call_view_function(
        &self,
        _contract: H160,
        _function: &Function,
        args: &[Token],
    ) -> Result<Vec<Token>, ChainError> {
        self.check_online()?;
        self.view_calls.fetch_add(1, Ordering::SeqCst);

        let id = match args.first() {
            Some(Token::Uint(id)) => id.as_u64(),
            _ => return Err(ChainError::Decode("expected a uint argument".to_string())),
        };
        let (content_id, active) = self.bots.lock().get(&id).cloned().unwrap_or_default();

        Ok(vec![
            Token::String(content_id),
            Token::Uint(U256::from(10_000_000u64)),
            Token::Uint(U256::from(7)),
            Token::String("Grid Trader".to_string()),
            Token::Address(H160::repeat_byte(0xde)),
            Token::Bool(true),
            Token::Bool(active),
        ])
    }
}

pub struct FakePinner {
    result: Mutex<Result<String, String>>,
    delay: Duration,
    calls: AtomicUsize,
    documents: Mutex<Vec<serde_json::Value>>,
}

impl FakePinner {
    pub fn succeeding(cid: &str) -> Self {
        Self::with_delay(Ok(cid.to_string()), Duration::ZERO)
    }

    pub fn failing(message: &str) -> Self {
        Self::with_delay(Err(message.to_string()), Duration::ZERO)
    }

    pub fn with_delay(result: Result<String, String>, delay: Duration) -> Self {
        Self {
            result: Mutex::new(result),
            delay,
            calls: AtomicUsize::new(0),
            documents: Mutex::new(Vec::new()),
        }
    }

    pub fn set_result(&self, result: Result<String, String>) {
        *self.result.lock() = result;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_document(&self) -> Option<serde_json::Value> {
        self.documents.lock().last().cloned()
    }
}

#[async_trait]
impl ContentPinner for FakePinner {
    async fn pin(&self, document: &serde_json::Value) -> Result<PinnedContent, PinError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.documents.lock().push(document.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let result = self.result.lock().clone();
        result
            .map(|cid| PinnedContent {
                retrieval_url: format!("https://gateway.pinata.cloud/ipfs/{}", cid),
                content_id: cid,
            })
            .map_err(PinError::new)
    }
}
