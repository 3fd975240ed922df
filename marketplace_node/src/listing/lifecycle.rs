//! Listing lifecycle manager.
//!
//! Owns `Listing::status` and is the only writer of it. Transitions:
//!
//! ```text
//! draft ──pin──▶ pinned-pending ──ok──▶ pinned-locked ──confirm──▶ published
//!                    │    ▲
//!                  fail   └──retry── pin-failed
//!                    ▼
//!                pin-failed
//! ```
//!
//! Every transition is a conditional write against the revision that was
//! read, so concurrent requests race on the store rather than on memory and
//! the loser is told the record is locked. Nothing here depends on state kept
//! between requests: an attempt abandoned mid-flight leaves a persisted
//! status that a later request can resume from.

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::{Listing, ListingDraft, ListingEdit, ListingId, ListingStatus};
use crate::chain::{parse_tx_hash, PublishVerifier, VerifiedPublish};
use crate::error::{MarketError, Result};
use crate::pinning::{ContentPinner, PinnedContent};
use crate::storage::{ListingStore, StorageError};

/// Attempts for writes that may legitimately collide with a concurrent
/// writer and should be re-evaluated against the fresh record.
const MAX_WRITE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// Bound on a single pinning call
    pub pin_timeout: Duration,
    /// A `pinned-pending` claim older than this is considered abandoned
    pub pin_stale_after: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            pin_timeout: Duration::from_secs(30),
            pin_stale_after: Duration::from_secs(300),
        }
    }
}

/// What a developer signs and submits to the registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishPayload {
    pub status: &'static str,
    pub data: PublishData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishData {
    pub contract_address: String,
    pub method: String,
    pub bot_data: RegistryBotData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistryBotData {
    pub ipfs_hash: String,
    /// Smallest token unit, as a decimal string
    pub price: String,
    pub trial_time: u32,
    pub name: String,
    pub description: String,
}

pub struct LifecycleManager {
    store: Arc<dyn ListingStore>,
    pinner: Arc<dyn ContentPinner>,
    verifier: Arc<PublishVerifier>,
    settings: LifecycleSettings,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<dyn ListingStore>,
        pinner: Arc<dyn ContentPinner>,
        verifier: Arc<PublishVerifier>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            store,
            pinner,
            verifier,
            settings,
        }
    }

    pub async fn create_listing(&self, owner: &str, draft: ListingDraft) -> Result<Listing> {
        draft.validate()?;
        let listing = self
            .store
            .create(Listing::new_draft(owner, draft, Utc::now()))
            .await?;
        info!("Created draft listing {} for {}", listing.id, owner);
        Ok(listing)
    }

    /// Load a listing and check that `caller` owns it.
    pub async fn get_owned(&self, caller: &str, id: ListingId) -> Result<Listing> {
        let listing = self.load(id).await?;
        if !listing.is_owned_by(caller) {
            warn!("{} attempted to access listing {} owned by {}", caller, id, listing.owner);
            return Err(MarketError::Forbidden(format!("listing {} belongs to another developer", id)));
        }
        Ok(listing)
    }

    pub async fn list_owned(&self, caller: &str) -> Result<Vec<Listing>> {
        Ok(self.store.list_by_owner(caller).await?)
    }

    pub async fn list_published(&self) -> Result<Vec<Listing>> {
        Ok(self.store.list_published().await?)
    }

    pub async fn get_published(&self, id: ListingId) -> Result<Listing> {
        match self.store.get(id).await? {
            Some(listing) if listing.status == ListingStatus::Published => Ok(listing),
            _ => Err(MarketError::NotFound(format!("published listing {}", id))),
        }
    }

    /// Owner edit; allowed only while the record is not pin-locked.
    pub async fn edit_listing(&self, caller: &str, id: ListingId, edit: ListingEdit) -> Result<Listing> {
        edit.validate()?;

        for _ in 0..MAX_WRITE_ATTEMPTS {
            let current = self.get_owned(caller, id).await?;
            if current.is_locked {
                return Err(MarketError::Locked(format!(
                    "listing {} is {} and can no longer be edited",
                    id, current.status
                )));
            }
            if edit.is_empty() {
                return Ok(current);
            }

            let mut next = current.clone();
            edit.apply(&mut next);
            next.updated_at = Utc::now();

            match self.write(next, current.revision).await {
                Ok(stored) => {
                    info!("Listing {} edited by {}", id, caller);
                    return Ok(stored);
                }
                Err(StorageError::Conflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(MarketError::Internal(format!("listing {} is being modified concurrently", id)))
    }

    /// Pin the listing's canonical document and lock its pinned fields.
    ///
    /// The claim (`pinned-pending`) is written before the pinning call; a
    /// concurrent request that loses the claim fails with `Locked` and never
    /// reaches the pinner.
    pub async fn request_pin(&self, caller: &str, id: ListingId) -> Result<Listing> {
        let current = self.get_owned(caller, id).await?;
        let now = Utc::now();

        match current.status {
            ListingStatus::Draft | ListingStatus::PinFailed => {}
            ListingStatus::PinnedPending if self.is_stale(&current, now) => {
                warn!(
                    "Reclaiming abandoned pin of listing {} requested at {:?}",
                    id, current.pin_requested_at
                );
            }
            ListingStatus::PinnedPending => {
                return Err(MarketError::Locked(format!("listing {} is already being pinned", id)));
            }
            ListingStatus::PinnedLocked | ListingStatus::Published => {
                return Err(MarketError::Locked(format!(
                    "listing {} is {} and cannot be pinned again",
                    id, current.status
                )));
            }
        }

        let from = current.status;
        let mut claim = current.clone();
        claim.status = ListingStatus::PinnedPending;
        claim.is_locked = true;
        claim.pin_requested_at = Some(now);
        claim.updated_at = now;

        let claimed = match self.write(claim, current.revision).await {
            Ok(claimed) => claimed,
            Err(StorageError::Conflict { .. }) => {
                warn!("Lost pin claim race on listing {}", id);
                return Err(MarketError::Locked(format!("listing {} is already being pinned", id)));
            }
            Err(e) => return Err(e.into()),
        };
        info!("Listing {}: {} -> {}", id, from, claimed.status);

        let outcome = self.pin_with_timeout(&claimed.pin_document()).await;
        let mut next = claimed.clone();
        next.updated_at = Utc::now();

        match outcome {
            Ok(pinned) => {
                next.status = ListingStatus::PinnedLocked;
                next.content_id = Some(pinned.content_id);
                next.content_url = Some(pinned.retrieval_url);
                next.pinned_at = Some(next.updated_at);

                match self.write(next, claimed.revision).await {
                    Ok(stored) => {
                        info!(
                            "Listing {}: pinned-pending -> pinned-locked ({})",
                            id,
                            stored.content_id.as_deref().unwrap_or_default()
                        );
                        Ok(stored)
                    }
                    Err(StorageError::Conflict { .. }) => {
                        warn!("Pin result for listing {} superseded by a newer claim", id);
                        Err(MarketError::Locked(format!("listing {} was reclaimed by a newer pin request", id)))
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Err(cause) => {
                next.status = ListingStatus::PinFailed;
                next.is_locked = false;

                match self.write(next, claimed.revision).await {
                    Ok(_) => info!("Listing {}: pinned-pending -> pin-failed", id),
                    Err(e) => error!("Failed to record pin failure for listing {}: {}", id, e),
                }
                Err(cause)
            }
        }
    }

    /// Data the owner must sign and submit to the registry. No state change.
    pub async fn publish_payload(&self, caller: &str, id: ListingId) -> Result<PublishPayload> {
        let listing = self.get_owned(caller, id).await?;

        match listing.status {
            ListingStatus::PinnedLocked => {}
            ListingStatus::Published => {
                return Err(MarketError::Locked(format!("listing {} is already published", id)));
            }
            status => {
                return Err(MarketError::Validation(format!(
                    "listing {} must be pinned before publishing (status {})",
                    id, status
                )));
            }
        }

        let ipfs_hash = listing
            .content_id
            .clone()
            .ok_or_else(|| MarketError::Internal(format!("pinned listing {} has no content id", id)))?;
        let registry = self.verifier.registry();

        Ok(PublishPayload {
            status: "ready",
            data: PublishData {
                contract_address: registry.address_hex(),
                method: registry.register_method().to_string(),
                bot_data: RegistryBotData {
                    ipfs_hash,
                    price: listing.price.token_units().to_string(),
                    trial_time: listing.trial_days,
                    name: listing.name,
                    description: listing.description,
                },
            },
        })
    }

    /// Verify a reported registry transaction and mark the listing published.
    ///
    /// Idempotent: confirming an already published listing with the same
    /// transaction returns it unchanged. Any verification failure leaves the
    /// listing at `pinned-locked`.
    pub async fn confirm_publish(&self, caller: &str, id: ListingId, transaction_hash: &str) -> Result<Listing> {
        let tx_hash = parse_tx_hash(transaction_hash)?;
        let current = self.get_owned(caller, id).await?;
        let hash = crate::chain::format_tx_hash(&tx_hash);

        match current.status {
            ListingStatus::PinnedLocked => {}
            ListingStatus::Published => return already_published(current, &hash),
            status => {
                return Err(MarketError::Locked(format!(
                    "listing {} is {} and cannot be published",
                    id, status
                )));
            }
        }

        let content_id = current
            .content_id
            .as_deref()
            .ok_or_else(|| MarketError::Internal(format!("pinned listing {} has no content id", id)))?;
        let verified = self.verifier.verify(tx_hash, content_id).await?;
        self.apply_publish(id, verified).await
    }

    async fn apply_publish(&self, id: ListingId, verified: VerifiedPublish) -> Result<Listing> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let current = self.load(id).await?;

            if current.status == ListingStatus::Published {
                return already_published(current, &verified.transaction_hash);
            }
            if current.status != ListingStatus::PinnedLocked {
                return Err(MarketError::Locked(format!(
                    "listing {} is {} and cannot be published",
                    id, current.status
                )));
            }
            if let Some(existing) = current.onchain_id {
                if existing != verified.onchain_id {
                    return Err(MarketError::Locked(format!(
                        "listing {} is bound to registry id {}, transaction registered {}",
                        id, existing, verified.onchain_id
                    )));
                }
            }

            let now = Utc::now();
            let mut next = current.clone();
            next.onchain_id = Some(current.onchain_id.unwrap_or(verified.onchain_id));
            next.transaction_hash = Some(verified.transaction_hash.clone());
            next.status = ListingStatus::Published;
            next.published_at = Some(now);
            next.updated_at = now;

            match self.write(next, current.revision).await {
                Ok(stored) => {
                    info!(
                        "Listing {}: pinned-locked -> published (registry id {}, tx {})",
                        id, verified.onchain_id, verified.transaction_hash
                    );
                    return Ok(stored);
                }
                Err(StorageError::Conflict { .. }) => continue,
                Err(StorageError::Duplicate(key)) => {
                    warn!("Listing {}: {} is already bound to another listing", id, key);
                    return Err(MarketError::Validation(format!(
                        "{} is already bound to another listing",
                        key
                    )));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(MarketError::Internal(format!("listing {} is being modified concurrently", id)))
    }

    async fn load(&self, id: ListingId) -> Result<Listing> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("listing {}", id)))
    }

    /// Conditional write with the status invariants checked first.
    async fn write(&self, listing: Listing, expected_revision: u64) -> std::result::Result<Listing, StorageError> {
        if let Err(violation) = listing.check_invariants() {
            error!("Refusing to store listing {}: {}", listing.id, violation);
            return Err(StorageError::Backend(violation));
        }
        self.store.update(listing, expected_revision).await
    }

    async fn pin_with_timeout(&self, document: &serde_json::Value) -> Result<PinnedContent> {
        match tokio::time::timeout(self.settings.pin_timeout, self.pinner.pin(document)).await {
            Ok(result) => result.map_err(MarketError::from),
            Err(_) => Err(MarketError::PinFailure(format!(
                "pinning timed out after {:?}",
                self.settings.pin_timeout
            ))),
        }
    }

    fn is_stale(&self, listing: &Listing, now: DateTime<Utc>) -> bool {
        match listing.pin_requested_at {
            Some(requested) => now
                .signed_duration_since(requested)
                .to_std()
                .map(|age| age >= self.settings.pin_stale_after)
                .unwrap_or(false),
            None => true,
        }
    }
}

fn already_published(listing: Listing, transaction_hash: &str) -> Result<Listing> {
    if listing.transaction_hash.as_deref() == Some(transaction_hash) {
        Ok(listing)
    } else {
        Err(MarketError::Locked(format!(
            "listing {} was already published by transaction {}",
            listing.id,
            listing.transaction_hash.as_deref().unwrap_or("unknown")
        )))
    }
}
