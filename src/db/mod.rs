use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod listing;
#[cfg(test)]
pub mod memory;
pub mod postgres;

use listing::{Listing, ListingCounts, ListingFilter, ListingPage};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("payment reference already assigned to another listing")]
    DuplicatePaymentRef,
    #[error("listing {0} does not exist")]
    Missing(Uuid),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Durable record of listings. Every status mutation goes through a
/// [`ListingTx`] so the read of the current state and the write that follows
/// are serialized per listing.
#[async_trait]
pub trait ListingStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn ListingTx>, StoreError>;

    async fn insert(&self, listing: &Listing) -> Result<(), StoreError>;

    /// Fetch by id, including DELETED rows; callers decide visibility.
    async fn find(&self, id: Uuid) -> Result<Option<Listing>, StoreError>;

    /// Ids of listings still awaiting payment and created before `cutoff`.
    async fn stale_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError>;

    async fn search(&self, filter: &ListingFilter) -> Result<ListingPage, StoreError>;

    async fn counts(&self) -> Result<ListingCounts, StoreError>;
}

/// A unit of work holding row locks until commit. Dropping it without
/// committing discards every change made through it.
#[async_trait]
pub trait ListingTx: Send {
    /// Load a listing and lock it for the remainder of the transaction.
    async fn lock(&mut self, id: Uuid) -> Result<Option<Listing>, StoreError>;

    async fn insert(&mut self, listing: &Listing) -> Result<(), StoreError>;

    async fn save(&mut self, listing: &Listing) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
