//! Shared harness for the HTTP tests: an in-process router wired to fake
//! chain and pinning collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use ethereum_types::{H160, H256, U256};
use ethers::abi::{Function, Token};
use jsonwebtoken::{encode, EncodingKey, Header};
use marketplace_node::{
    api::{auth::Claims, create_router, AppState, JwtAuthority},
    chain::{ChainError, ChainReader, LogEntry, PaymentContract, PublishVerifier, Receipt, RegistryContract},
    listing::{LifecycleManager, LifecycleSettings},
    pinning::{ContentPinner, PinError, PinnedContent},
    storage::MemoryStore,
    subscription::SubscriptionService,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

pub const SECRET: &str = "integration-secret";
pub const REGISTRY: H160 = H160([0x5f; 20]);
pub const PAYMENTS: H160 = H160([0x9a; 20]);

#[derive(Default)]
pub struct StubChain {
    receipts: Mutex<HashMap<H256, Receipt>>,
    bots: Mutex<HashMap<u64, (String, bool)>>,
    height: AtomicU64,
}

impl StubChain {
    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    /// Registry entry `onchain_id` recording `content_id`.
    pub fn register_bot(&self, onchain_id: u64, content_id: &str, active: bool) {
        self.bots.lock().insert(onchain_id, (content_id.to_string(), active));
    }

    /// Mined payment-contract transaction settling `amount` token units for `bot_id`.
    pub fn pay(&self, tx: H256, block_number: u64, bot_id: u64, amount: u64) {
        let contract = PaymentContract::new(PAYMENTS).expect("payment contract");
        let log = LogEntry {
            address: PAYMENTS,
            topics: vec![contract.event_topic()],
            data: ethers::abi::encode(&[
                Token::Uint(U256::from(bot_id)),
                Token::Address(H160::repeat_byte(0xab)),
                Token::Address(H160::repeat_byte(0xde)),
                Token::Uint(U256::from(amount)),
                Token::Uint(U256::from(amount / 20)),
            ]),
        };
        self.receipts.lock().insert(
            tx,
            Receipt {
                transaction_hash: tx,
                success: true,
                block_number,
                logs: vec![log],
            },
        );
    }

    /// Mined receipt; `onchain_id` adds a registry log announcing that id.
    pub fn mine(&self, tx: H256, block_number: u64, success: bool, onchain_id: Option<u64>) {
        let logs = onchain_id
            .map(|id| {
                let mut word = [0u8; 32];
                U256::from(id).to_big_endian(&mut word);
                vec![LogEntry {
                    address: REGISTRY,
                    topics: vec![H256::repeat_byte(0xe1), H256::from(word)],
                    data: vec![],
                }]
            })
            .unwrap_or_default();

        self.receipts.lock().insert(
            tx,
            Receipt {
                transaction_hash: tx,
                success,
                block_number,
                logs,
            },
        );
    }
}

#[async_trait]
impl ChainReader for StubChain {
    async fn get_receipt(&self, tx_hash: H256) -> Result<Option<Receipt>, ChainError> {
        Ok(self.receipts.lock().get(&tx_hash).cloned())
    }

    async fn get_current_block_height(&self) -> Result<u64, ChainError> {
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn call_view_function(
        &self,
        _contract: H160,
        _function: &Function,
        args: &[Token],
    ) -> Result<Vec<Token>, ChainError> {
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

pub struct StubPinner {
    result: Mutex<Result<String, String>>,
    calls: AtomicUsize,
}

impl StubPinner {
    pub fn new(cid: &str) -> Self {
        Self {
            result: Mutex::new(Ok(cid.to_string())),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_with(&self, message: &str) {
        *self.result.lock() = Err(message.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentPinner for StubPinner {
    async fn pin(&self, _document: &Value) -> Result<PinnedContent, PinError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = self.result.lock().clone();
        result
            .map(|cid| PinnedContent {
                retrieval_url: format!("https://gateway.pinata.cloud/ipfs/{}", cid),
                content_id: cid,
            })
            .map_err(PinError::new)
    }
}

pub struct TestApp {
    pub router: Router,
    pub chain: Arc<StubChain>,
    pub pinner: Arc<StubPinner>,
}

impl TestApp {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let chain = Arc::new(StubChain::default());
        chain.set_height(100);
        let pinner = Arc::new(StubPinner::new("QmAbc"));

        let registry = RegistryContract::new(REGISTRY, "registerBot", "getBotDetails").expect("registry");
        let verifier = Arc::new(PublishVerifier::new(chain.clone(), registry, 1));
        let lifecycle = Arc::new(LifecycleManager::new(
            store.clone(),
            pinner.clone(),
            verifier.clone(),
            LifecycleSettings::default(),
        ));
        let payments = PaymentContract::new(PAYMENTS).expect("payment contract");
        let subscriptions = Arc::new(SubscriptionService::new(store.clone(), store, verifier, payments, 30));

        let router = create_router(AppState {
            lifecycle,
            subscriptions,
            auth: Arc::new(JwtAuthority::new(SECRET)),
        });

        Self { router, chain, pinner }
    }

    pub async fn call(&self, method: &str, uri: &str, principal: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(principal) = principal {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token(principal)));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        let response = self.router.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }
}

pub fn token(principal: &str) -> String {
    let claims = Claims {
        sub: principal.to_string(),
        exp: (chrono::Utc::now().timestamp() + 3600) as u64,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).expect("token")
}

pub fn tx_hex(byte: u8) -> String {
    format!("0x{}", hex::encode([byte; 32]))
}
