//! Consumer subscriptions to published listings.
//!
//! A subscription is created once its payment transaction is confirmed on
//! chain and carries a settlement log of the payment contract for the
//! listing's registry id. Its status is never stored: it is derived from the timestamps and
//! the active flag every time it is read.

use chrono::{DateTime, Duration, Utc};
use ethereum_types::U256;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::chain::{format_tx_hash, parse_tx_hash, PaymentContract, PaymentEvent, PublishVerifier, Receipt};
use crate::error::{MarketError, Result};
use crate::listing::{ListingId, ListingStatus, Price};
use crate::storage::{ListingStore, StorageError, SubscriptionStore};

pub const DEFAULT_CURRENCY: &str = "USDT";

const MAX_WRITE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubscriptionStatus {
    Pending,
    Trial,
    Subscribed,
    Expired,
    CancelledNotExpired,
}

impl SubscriptionStatus {
    /// Status at `now`. Expiration wins over everything else, including a
    /// subscription that was never deactivated.
    pub fn derive(
        now: DateTime<Utc>,
        payment_time: DateTime<Utc>,
        trial_window: Duration,
        expiration: DateTime<Utc>,
        active: bool,
    ) -> Self {
        if now > expiration {
            SubscriptionStatus::Expired
        } else if now < payment_time {
            SubscriptionStatus::Pending
        } else if !active {
            SubscriptionStatus::CancelledNotExpired
        } else if now < payment_time + trial_window {
            SubscriptionStatus::Trial
        } else {
            SubscriptionStatus::Subscribed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub subscriber: String,
    pub listing_id: ListingId,
    /// Payment transaction; unique across subscriptions
    pub transaction_hash: String,
    /// Amount settled on chain
    pub amount: Price,
    pub currency: String,
    /// Wallet that paid, as recorded by the payment contract
    pub payer: String,
    pub trial_period_days: u32,
    pub payment_time: DateTime<Utc>,
    pub expiration: DateTime<Utc>,
    /// Once false, never set back to true
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub revision: u64,
}

impl Subscription {
    pub fn trial_window(&self) -> Duration {
        Duration::days(i64::from(self.trial_period_days))
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> SubscriptionStatus {
        SubscriptionStatus::derive(now, self.payment_time, self.trial_window(), self.expiration, self.active)
    }

    pub fn view_at(self, now: DateTime<Utc>) -> SubscriptionView {
        SubscriptionView {
            status: self.status_at(now),
            subscription: self,
        }
    }
}

/// A subscription together with its status at read time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionView {
    #[serde(flatten)]
    pub subscription: Subscription,
    pub status: SubscriptionStatus,
}

/// Payment reported by a consumer. The amount is read from the chain.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfirmation {
    pub listing_id: ListingId,
    pub transaction_hash: String,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

pub struct SubscriptionService {
    store: Arc<dyn SubscriptionStore>,
    listings: Arc<dyn ListingStore>,
    verifier: Arc<PublishVerifier>,
    payments: PaymentContract,
    period: Duration,
}

impl SubscriptionService {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        listings: Arc<dyn ListingStore>,
        verifier: Arc<PublishVerifier>,
        payments: PaymentContract,
        period_days: u32,
    ) -> Self {
        Self {
            store,
            listings,
            verifier,
            payments,
            period: Duration::days(i64::from(period_days)),
        }
    }

    /// Confirm a payment transaction and open a subscription for `caller`.
    pub async fn confirm_payment(&self, caller: &str, payment: PaymentConfirmation) -> Result<SubscriptionView> {
        let tx_hash = parse_tx_hash(&payment.transaction_hash)?;
        let hash = format_tx_hash(&tx_hash);

        let currency = payment.currency.trim();
        if currency.is_empty() {
            return Err(MarketError::Validation("currency must not be empty".to_string()));
        }

        let listing = self
            .listings
            .get(payment.listing_id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("listing {}", payment.listing_id)))?;
        if listing.status != ListingStatus::Published {
            return Err(MarketError::Validation(format!(
                "listing {} is not published",
                listing.id
            )));
        }
        let onchain_id = listing.onchain_id.ok_or_else(|| {
            MarketError::Internal(format!("published listing {} has no registry id", listing.id))
        })?;
        if self.store.get(&hash).await?.is_some() {
            return Err(MarketError::Validation(format!("transaction {} was already used", hash)));
        }

        let (receipt, confirmations) = self.verifier.confirmed_receipt(tx_hash).await?;
        let settled = self.settlement(&receipt, &hash, onchain_id)?;

        if settled.amount > U256::from(u64::MAX) {
            return Err(MarketError::Validation(format!(
                "payment amount {} in {} is out of range",
                settled.amount, hash
            )));
        }
        let amount = Price::from_token_units(settled.amount.as_u64());
        if amount < listing.price {
            return Err(MarketError::Validation(format!(
                "payment of {} is below the listing price of {}",
                amount, listing.price
            )));
        }

        let now = Utc::now();
        let subscription = Subscription {
            subscriber: caller.to_string(),
            listing_id: listing.id,
            transaction_hash: hash.clone(),
            amount,
            currency: currency.to_string(),
            payer: format!("0x{}", hex::encode(settled.subscriber.as_bytes())),
            trial_period_days: listing.trial_days,
            payment_time: now,
            expiration: now + self.period,
            active: true,
            created_at: now,
            revision: 0,
        };

        let stored = self.store.insert(subscription).await.map_err(|e| match e {
            StorageError::Duplicate(_) => {
                MarketError::Validation(format!("transaction {} was already used", hash))
            }
            other => other.into(),
        })?;
        info!(
            "Subscription {} by {} to listing {} (block {}, {} confirmations)",
            hash, caller, listing.id, receipt.block_number, confirmations
        );
        Ok(stored.view_at(now))
    }

    /// The payment-contract settlement in `receipt` for registry id `onchain_id`.
    fn settlement(&self, receipt: &Receipt, hash: &str, onchain_id: u64) -> Result<PaymentEvent> {
        let events = self.payments.payments_from_logs(receipt).map_err(|e| {
            warn!("Unreadable payment log in {}: {}", hash, e);
            MarketError::Validation(format!("transaction {} carries a malformed payment log", hash))
        })?;
        if events.is_empty() {
            warn!("Transaction {} carries no payment from {}", hash, self.payments.address_hex());
            return Err(MarketError::Validation(format!(
                "transaction {} is not a payment to the marketplace",
                hash
            )));
        }

        events
            .into_iter()
            .find(|event| event.bot_id == U256::from(onchain_id))
            .ok_or_else(|| {
                warn!("Transaction {} pays for another registry id than {}", hash, onchain_id);
                MarketError::Validation(format!(
                    "transaction {} does not pay for registry id {}",
                    hash, onchain_id
                ))
            })
    }

    pub async fn list(&self, caller: &str) -> Result<Vec<SubscriptionView>> {
        let now = Utc::now();
        let subscriptions = self.store.list_by_subscriber(caller).await?;
        Ok(subscriptions.into_iter().map(|s| s.view_at(now)).collect())
    }

    pub async fn get(&self, caller: &str, transaction_hash: &str) -> Result<SubscriptionView> {
        let subscription = self.load_owned(caller, transaction_hash).await?;
        Ok(subscription.view_at(Utc::now()))
    }

    /// Deactivate a subscription. Deactivation is terminal.
    pub async fn cancel(&self, caller: &str, transaction_hash: &str) -> Result<SubscriptionView> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let current = self.load_owned(caller, transaction_hash).await?;
            if !current.active {
                return Err(MarketError::Locked(format!(
                    "subscription {} is already cancelled",
                    current.transaction_hash
                )));
            }

            let mut next = current.clone();
            next.active = false;
            match self.store.update(next, current.revision).await {
                Ok(stored) => {
                    info!("Subscription {} cancelled by {}", stored.transaction_hash, caller);
                    return Ok(stored.view_at(Utc::now()));
                }
                Err(StorageError::Conflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(MarketError::Internal(format!(
            "subscription {} is being modified concurrently",
            transaction_hash
        )))
    }

    async fn load_owned(&self, caller: &str, transaction_hash: &str) -> Result<Subscription> {
        let hash = format_tx_hash(&parse_tx_hash(transaction_hash)?);
        let subscription = self
            .store
            .get(&hash)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("subscription {}", hash)))?;
        if subscription.subscriber != caller {
            warn!("{} attempted to access subscription {}", caller, hash);
            return Err(MarketError::Forbidden(format!("subscription {} belongs to another account", hash)));
        }
        Ok(subscription)
    }
}
