//! Read-only access to the blockchain and the bot registry contract.

pub mod rpc;
pub mod verifier;

pub use rpc::RpcChainReader;
pub use verifier::{PublishVerifier, VerifiedPublish};

use async_trait::async_trait;
use ethereum_types::{H160, H256, U256};
use ethers::abi::{Abi, Event, Function, RawLog, Token};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::MarketError;

/// Human-readable ABI of the registry methods the node relies on.
pub const REGISTRY_ABI: &[&str] = &[
    "function registerBot(string ipfsHash, uint256 price, uint256 trialTime, string name) returns (uint256)",
    "function getBotDetails(uint256 botId) view returns (string ipfsHash, uint96 price, uint32 trialTime, string name, address developer, bool isActive, bool exists)",
];

/// Human-readable ABI of the subscription payment contract.
pub const PAYMENT_ABI: &[&str] = &[
    "function processPayment(uint256 botId, uint256 amount, uint256 durationInDays)",
    "event PaymentProcessed(uint256 botId, address subscriber, address developer, uint256 amount, uint256 platformFee)",
];

const PAYMENT_EVENT: &str = "PaymentProcessed";

#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    #[error("RPC transport error: {0}")]
    Transport(String),

    #[error("Chain call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed chain response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub address: H160,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
}

/// Outcome of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub transaction_hash: H256,
    pub success: bool,
    pub block_number: u64,
    pub logs: Vec<LogEntry>,
}

/// Blockchain node queries. Implementations do not retry; the caller owns the
/// polling cadence.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// `None` until the transaction has been mined.
    async fn get_receipt(&self, tx_hash: H256) -> Result<Option<Receipt>, ChainError>;

    async fn get_current_block_height(&self) -> Result<u64, ChainError>;

    async fn call_view_function(
        &self,
        contract: H160,
        function: &Function,
        args: &[Token],
    ) -> Result<Vec<Token>, ChainError>;
}

/// The deployed bot registry: where it lives and how to talk to it.
#[derive(Debug, Clone)]
pub struct RegistryContract {
    address: H160,
    abi: Abi,
    register_method: String,
    details_method: String,
}

impl RegistryContract {
    pub fn new(address: H160, register_method: &str, details_method: &str) -> Result<Self, MarketError> {
        let abi = ethers::abi::parse_abi(REGISTRY_ABI)
            .map_err(|e| MarketError::Internal(format!("registry ABI: {}", e)))?;

        let registry = Self {
            address,
            abi,
            register_method: register_method.to_string(),
            details_method: details_method.to_string(),
        };
        registry.details_function()?;
        Ok(registry)
    }

    pub fn address(&self) -> H160 {
        self.address
    }

    pub fn address_hex(&self) -> String {
        format!("0x{}", hex::encode(self.address.as_bytes()))
    }

    pub fn register_method(&self) -> &str {
        &self.register_method
    }

    pub fn details_function(&self) -> Result<&Function, MarketError> {
        self.abi
            .function(&self.details_method)
            .map_err(|e| MarketError::Internal(format!("registry ABI has no {}: {}", self.details_method, e)))
    }

    /// Listing id announced by the first registry log in the receipt: its
    /// first indexed topic read as a big-endian unsigned integer.
    pub fn listing_id_from_logs(&self, receipt: &Receipt) -> Option<U256> {
        receipt
            .logs
            .iter()
            .find(|log| log.address == self.address)
            .and_then(|log| log.topics.get(1))
            .map(|topic| U256::from_big_endian(topic.as_bytes()))
    }
}

/// A decoded `PaymentProcessed` log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentEvent {
    pub bot_id: U256,
    pub subscriber: H160,
    pub developer: H160,
    pub amount: U256,
    pub platform_fee: U256,
}

/// The deployed payment contract and its settlement event.
#[derive(Debug, Clone)]
pub struct PaymentContract {
    address: H160,
    event: Event,
}

impl PaymentContract {
    pub fn new(address: H160) -> Result<Self, MarketError> {
        let abi = ethers::abi::parse_abi(PAYMENT_ABI)
            .map_err(|e| MarketError::Internal(format!("payment ABI: {}", e)))?;
        let event = abi
            .event(PAYMENT_EVENT)
            .map_err(|e| MarketError::Internal(format!("payment ABI has no {}: {}", PAYMENT_EVENT, e)))?
            .clone();
        Ok(Self { address, event })
    }

    pub fn address(&self) -> H160 {
        self.address
    }

    pub fn address_hex(&self) -> String {
        format!("0x{}", hex::encode(self.address.as_bytes()))
    }

    /// `topics[0]` of every settlement log.
    pub fn event_topic(&self) -> H256 {
        self.event.signature()
    }

    /// Settlement logs emitted by this contract, decoded. Logs from other
    /// addresses or with another signature are skipped; a matching log
    /// that fails to decode is an error.
    pub fn payments_from_logs(&self, receipt: &Receipt) -> Result<Vec<PaymentEvent>, ChainError> {
        let topic = self.event_topic();
        receipt
            .logs
            .iter()
            .filter(|log| log.address == self.address && log.topics.first() == Some(&topic))
            .map(|log| self.decode(log))
            .collect()
    }

    fn decode(&self, log: &LogEntry) -> Result<PaymentEvent, ChainError> {
        let parsed = self
            .event
            .parse_log(RawLog {
                topics: log.topics.clone(),
                data: log.data.clone(),
            })
            .map_err(|e| ChainError::Decode(format!("{} log: {}", PAYMENT_EVENT, e)))?;

        let param = |name: &str| -> Result<Token, ChainError> {
            parsed
                .params
                .iter()
                .find(|p| p.name == name)
                .map(|p| p.value.clone())
                .ok_or_else(|| ChainError::Decode(format!("{} log lacks {}", PAYMENT_EVENT, name)))
        };
        let uint = |name: &str| -> Result<U256, ChainError> {
            match param(name)? {
                Token::Uint(value) => Ok(value),
                other => Err(ChainError::Decode(format!("{} is not a uint: {:?}", name, other))),
            }
        };
        let address = |name: &str| -> Result<H160, ChainError> {
            match param(name)? {
                Token::Address(value) => Ok(value),
                other => Err(ChainError::Decode(format!("{} is not an address: {:?}", name, other))),
            }
        };

        Ok(PaymentEvent {
            bot_id: uint("botId")?,
            subscriber: address("subscriber")?,
            developer: address("developer")?,
            amount: uint("amount")?,
            platform_fee: uint("platformFee")?,
        })
    }
}

/// Content id recorded by the registry: the first element of the detail tuple.
pub fn registered_content_id(details: &[Token]) -> Option<&str> {
    match details.first() {
        Some(Token::String(cid)) => Some(cid.as_str()),
        _ => None,
    }
}

/// The detail lookup returns a tuple whose final element is the active flag.
pub fn active_flag(details: &[Token]) -> Option<bool> {
    match details.last() {
        Some(Token::Bool(flag)) => Some(*flag),
        _ => None,
    }
}

/// Parse a 32-byte transaction hash, with or without the `0x` prefix.
pub fn parse_tx_hash(value: &str) -> Result<H256, MarketError> {
    let raw = value.trim();
    let raw = raw.strip_prefix("0x").unwrap_or(raw);
    if raw.len() != 64 {
        return Err(MarketError::Validation(format!("invalid transaction hash: {}", value)));
    }
    let bytes = hex::decode(raw)
        .map_err(|e| MarketError::Validation(format!("invalid transaction hash {}: {}", value, e)))?;
    Ok(H256::from_slice(&bytes))
}

pub fn format_tx_hash(hash: &H256) -> String {
    format!("0x{}", hex::encode(hash.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> RegistryContract {
        RegistryContract::new(H160::repeat_byte(0x11), "registerBot", "getBotDetails").unwrap()
    }

    fn topic(value: u64) -> H256 {
        let mut word = [0u8; 32];
        U256::from(value).to_big_endian(&mut word);
        H256::from(word)
    }

    #[test]
    fn test_listing_id_from_registry_log() {
        let registry = registry();
        let receipt = Receipt {
            transaction_hash: H256::repeat_byte(1),
            success: true,
            block_number: 10,
            logs: vec![
                // token transfer from another contract comes first
                LogEntry {
                    address: H160::repeat_byte(0x22),
                    topics: vec![H256::repeat_byte(9), topic(999)],
                    data: vec![],
                },
                LogEntry {
                    address: H160::repeat_byte(0x11),
                    topics: vec![H256::repeat_byte(7), topic(42)],
                    data: vec![],
                },
            ],
        };
        assert_eq!(registry.listing_id_from_logs(&receipt), Some(U256::from(42)));
    }

    #[test]
    fn test_listing_id_missing() {
        let registry = registry();
        let mut receipt = Receipt {
            transaction_hash: H256::repeat_byte(1),
            success: true,
            block_number: 10,
            logs: vec![LogEntry {
                address: H160::repeat_byte(0x22),
                topics: vec![H256::repeat_byte(9), topic(5)],
                data: vec![],
            }],
        };
        assert_eq!(registry.listing_id_from_logs(&receipt), None);

        // registry log without an indexed topic
        receipt.logs.push(LogEntry {
            address: H160::repeat_byte(0x11),
            topics: vec![H256::repeat_byte(7)],
            data: vec![],
        });
        assert_eq!(registry.listing_id_from_logs(&receipt), None);
    }

    #[test]
    fn test_details_function_encodes_id() {
        let registry = registry();
        let function = registry.details_function().unwrap();
        assert_eq!(function.name, "getBotDetails");
        assert_eq!(function.outputs.len(), 7);
        let input = function.encode_input(&[Token::Uint(U256::from(3))]).unwrap();
        assert_eq!(input.len(), 4 + 32);
    }

    #[test]
    fn test_active_flag_is_last_element() {
        let details = vec![
            Token::String("QmAbc".into()),
            Token::Uint(U256::from(10_000_000u64)),
            Token::Uint(U256::from(7)),
            Token::String("Grid".into()),
            Token::Address(H160::zero()),
            Token::Bool(false),
            Token::Bool(true),
        ];
        assert_eq!(active_flag(&details), Some(true));
        assert_eq!(active_flag(&[]), None);
        assert_eq!(active_flag(&[Token::String("x".into())]), None);
    }

    #[test]
    fn test_registered_content_id_is_first_element() {
        let details = vec![Token::String("QmXyz".into()), Token::Bool(true)];
        assert_eq!(registered_content_id(&details), Some("QmXyz"));
        assert_eq!(registered_content_id(&[Token::Bool(true)]), None);
        assert_eq!(registered_content_id(&[]), None);
    }

    fn payment_log(contract: &PaymentContract, bot_id: u64, amount: u64) -> LogEntry {
        LogEntry {
            address: contract.address(),
            topics: vec![contract.event_topic()],
            data: ethers::abi::encode(&[
                Token::Uint(U256::from(bot_id)),
                Token::Address(H160::repeat_byte(0xab)),
                Token::Address(H160::repeat_byte(0xde)),
                Token::Uint(U256::from(amount)),
                Token::Uint(U256::from(amount / 20)),
            ]),
        }
    }

    #[test]
    fn test_payment_event_decoding() {
        let contract = PaymentContract::new(H160::repeat_byte(0x33)).unwrap();
        let mut receipt = Receipt {
            transaction_hash: H256::repeat_byte(1),
            success: true,
            block_number: 10,
            logs: vec![
                // same signature, foreign contract
                LogEntry {
                    address: H160::repeat_byte(0x44),
                    ..payment_log(&contract, 1, 5)
                },
                payment_log(&contract, 7, 10_000_000),
            ],
        };

        let payments = contract.payments_from_logs(&receipt).unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].bot_id, U256::from(7));
        assert_eq!(payments[0].amount, U256::from(10_000_000u64));
        assert_eq!(payments[0].platform_fee, U256::from(500_000u64));
        assert_eq!(payments[0].subscriber, H160::repeat_byte(0xab));
        assert_eq!(payments[0].developer, H160::repeat_byte(0xde));

        receipt.logs.clear();
        assert!(contract.payments_from_logs(&receipt).unwrap().is_empty());

        // truncated data under the right signature
        let mut broken = payment_log(&contract, 7, 1);
        broken.data.truncate(40);
        receipt.logs.push(broken);
        assert!(contract.payments_from_logs(&receipt).is_err());
    }

    #[test]
    fn test_parse_tx_hash() {
        let hex = "ab".repeat(32);
        let hash = parse_tx_hash(&format!("0x{}", hex)).unwrap();
        assert_eq!(format_tx_hash(&hash), format!("0x{}", hex));
        assert_eq!(parse_tx_hash(&hex.to_uppercase()).unwrap(), hash);

        assert!(parse_tx_hash("0x1234").is_err());
        assert!(parse_tx_hash(&format!("0x{}", "zz".repeat(32))).is_err());
    }
}
