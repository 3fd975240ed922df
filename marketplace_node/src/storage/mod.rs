//! Datastore contracts.
//!
//! Records are read by id and written back conditionally: every record carries
//! a `revision`, and `update` only succeeds when the stored revision still
//! equals the one the caller read. The lifecycle manager builds its
//! compare-and-set transitions on top of this.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::listing::{Listing, ListingId};
use crate::subscription::Subscription;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Revision conflict on {key}: expected {expected}, found {found}")]
    Conflict {
        key: String,
        expected: u64,
        found: u64,
    },

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait ListingStore: Send + Sync {
    /// Persist a new listing. The store assigns the id and starts the
    /// revision at zero.
    async fn create(&self, listing: Listing) -> Result<Listing>;

    async fn get(&self, id: ListingId) -> Result<Option<Listing>>;

    /// Replace the stored record if its revision still equals
    /// `expected_revision`. Returns the stored record with its new revision.
    /// Fails with `Duplicate` when another listing already holds the same
    /// registry id or transaction hash.
    async fn update(&self, listing: Listing, expected_revision: u64) -> Result<Listing>;

    /// Listings of one owner, newest first.
    async fn list_by_owner(&self, owner: &str) -> Result<Vec<Listing>>;

    /// Published listings, most recently published first.
    async fn list_published(&self) -> Result<Vec<Listing>>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Insert a subscription keyed by its payment transaction hash; fails with
    /// `Duplicate` when the hash was already used.
    async fn insert(&self, subscription: Subscription) -> Result<Subscription>;

    async fn get(&self, transaction_hash: &str) -> Result<Option<Subscription>>;

    async fn update(&self, subscription: Subscription, expected_revision: u64) -> Result<Subscription>;

    async fn list_by_subscriber(&self, subscriber: &str) -> Result<Vec<Subscription>>;
}
