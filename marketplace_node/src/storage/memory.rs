use super::{ListingStore, Result, StorageError, SubscriptionStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::listing::{Listing, ListingId, ListingStatus};
use crate::subscription::Subscription;

/// In-memory store for listings and subscriptions. Each map sits behind a
/// single lock, so a revision check and the write that follows it are atomic.
pub struct MemoryStore {
    listings: Mutex<HashMap<ListingId, Listing>>,
    subscriptions: Mutex<HashMap<String, Subscription>>,
    next_id: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            listings: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl ListingStore for MemoryStore {
    async fn create(&self, mut listing: Listing) -> Result<Listing> {
        listing.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        listing.revision = 0;

        let mut listings = self.listings.lock();
        listings.insert(listing.id, listing.clone());
        Ok(listing)
    }

    async fn get(&self, id: ListingId) -> Result<Option<Listing>> {
        let listings = self.listings.lock();
        Ok(listings.get(&id).cloned())
    }

    async fn update(&self, mut listing: Listing, expected_revision: u64) -> Result<Listing> {
        let mut listings = self.listings.lock();
        if let Some(key) = registry_binding_taken(&listings, &listing) {
            return Err(StorageError::Duplicate(key));
        }

        let stored = listings
            .get_mut(&listing.id)
            .ok_or_else(|| StorageError::NotFound(format!("listing {}", listing.id)))?;

        if stored.revision != expected_revision {
            return Err(StorageError::Conflict {
                key: format!("listing {}", listing.id),
                expected: expected_revision,
                found: stored.revision,
            });
        }

        listing.revision = expected_revision + 1;
        *stored = listing.clone();
        Ok(listing)
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<Listing>> {
        let listings = self.listings.lock();
        let mut owned: Vec<Listing> = listings
            .values()
            .filter(|l| l.owner == owner)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(owned)
    }

    async fn list_published(&self) -> Result<Vec<Listing>> {
        let listings = self.listings.lock();
        let mut published: Vec<Listing> = listings
            .values()
            .filter(|l| l.status == ListingStatus::Published)
            .cloned()
            .collect();
        published.sort_by(|a, b| b.published_at.cmp(&a.published_at).then(b.id.cmp(&a.id)));
        Ok(published)
    }
}

/// The registry id or transaction hash of `listing` if another listing
/// already claims it.
fn registry_binding_taken(listings: &HashMap<ListingId, Listing>, listing: &Listing) -> Option<String> {
    listings.values().filter(|other| other.id != listing.id).find_map(|other| {
        if listing.onchain_id.is_some() && other.onchain_id == listing.onchain_id {
            return listing.onchain_id.map(|id| format!("registry id {}", id));
        }
        if listing.transaction_hash.is_some() && other.transaction_hash == listing.transaction_hash {
            return listing.transaction_hash.as_ref().map(|hash| format!("transaction {}", hash));
        }
        None
    })
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn insert(&self, mut subscription: Subscription) -> Result<Subscription> {
        let mut subscriptions = self.subscriptions.lock();
        if subscriptions.contains_key(&subscription.transaction_hash) {
            return Err(StorageError::Duplicate(subscription.transaction_hash));
        }

        subscription.revision = 0;
        subscriptions.insert(subscription.transaction_hash.clone(), subscription.clone());
        Ok(subscription)
    }

    async fn get(&self, transaction_hash: &str) -> Result<Option<Subscription>> {
        let subscriptions = self.subscriptions.lock();
        Ok(subscriptions.get(transaction_hash).cloned())
    }

    async fn update(&self, mut subscription: Subscription, expected_revision: u64) -> Result<Subscription> {
        let mut subscriptions = self.subscriptions.lock();
        let stored = subscriptions
            .get_mut(&subscription.transaction_hash)
            .ok_or_else(|| StorageError::NotFound(format!("subscription {}", subscription.transaction_hash)))?;

        if stored.revision != expected_revision {
            return Err(StorageError::Conflict {
                key: format!("subscription {}", subscription.transaction_hash),
                expected: expected_revision,
                found: stored.revision,
            });
        }

        subscription.revision = expected_revision + 1;
        *stored = subscription.clone();
        Ok(subscription)
    }

    async fn list_by_subscriber(&self, subscriber: &str) -> Result<Vec<Subscription>> {
        let subscriptions = self.subscriptions.lock();
        let mut owned: Vec<Subscription> = subscriptions
            .values()
            .filter(|s| s.subscriber == subscriber)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.payment_time.cmp(&a.payment_time));
        Ok(owned)
    }
}
