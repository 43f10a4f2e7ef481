use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::listing::{Listing, ListingCounts, ListingFilter, ListingPage, ListingStatus};
use super::{ListingStore, ListingTx, StoreError};

type Rows = HashMap<Uuid, Listing>;

/// Store used by tests. A transaction holds the whole table lock, which is a
/// stricter form of the per-row locking the postgres store provides.
#[derive(Default, Clone)]
pub struct MemoryListingStore {
    rows: Arc<Mutex<Rows>>,
    writes: Arc<AtomicUsize>,
}

impl MemoryListingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed row writes (inserts and saves).
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn get(&self, id: Uuid) -> Option<Listing> {
        self.rows.lock().await.get(&id).cloned()
    }

    pub async fn put(&self, listing: Listing) {
        self.rows.lock().await.insert(listing.id, listing);
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }
}

fn check_payment_ref(rows: &Rows, listing: &Listing) -> Result<(), StoreError> {
    let Some(payment_id) = listing.payment_id else {
        return Ok(());
    };
    let taken = rows
        .values()
        .any(|other| other.id != listing.id && other.payment_id == Some(payment_id));
    if taken {
        Err(StoreError::DuplicatePaymentRef)
    } else {
        Ok(())
    }
}

fn write_once(current: &Listing, mut next: Listing) -> Listing {
    next.payment_id = current.payment_id.or(next.payment_id);
    next.provider_tx_ref = current.provider_tx_ref.clone().or(next.provider_tx_ref);
    next.approval_timestamp = current.approval_timestamp.or(next.approval_timestamp);
    next
}

#[async_trait]
impl ListingStore for MemoryListingStore {
    async fn begin(&self) -> Result<Box<dyn ListingTx>, StoreError> {
        let guard = self.rows.clone().lock_owned().await;
        Ok(Box::new(MemoryListingTx {
            guard,
            pending: Vec::new(),
            writes: self.writes.clone(),
        }))
    }

    async fn insert(&self, listing: &Listing) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().await;
        check_payment_ref(&rows, listing)?;
        rows.insert(listing.id, listing.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Listing>, StoreError> {
        Ok(self.get(id).await)
    }

    async fn stale_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let rows = self.rows.lock().await;
        let mut stale: Vec<&Listing> = rows
            .values()
            .filter(|l| !l.payment_status.is_terminal() && l.created_at < cutoff)
            .collect();
        stale.sort_by_key(|l| l.created_at);
        Ok(stale.into_iter().map(|l| l.id).collect())
    }

    async fn search(&self, filter: &ListingFilter) -> Result<ListingPage, StoreError> {
        let rows = self.rows.lock().await;
        let mut matched: Vec<&Listing> = rows.values().filter(|l| filter.matches(l)).collect();
        matched.sort_by(|a, b| {
            b.approval_timestamp
                .cmp(&a.approval_timestamp)
                .then(b.created_at.cmp(&a.created_at))
        });
        let total = matched.len() as i64;
        let items = matched
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .cloned()
            .collect();
        Ok(ListingPage { total, items })
    }

    async fn counts(&self) -> Result<ListingCounts, StoreError> {
        let rows = self.rows.lock().await;
        let mut counts = ListingCounts::default();
        for listing in rows.values().filter(|l| !l.is_deleted()) {
            counts.total_listings += 1;
            match listing.status {
                ListingStatus::Pending => counts.pending += 1,
                ListingStatus::Approved | ListingStatus::Reserved => counts.approved += 1,
                ListingStatus::Rejected => counts.rejected += 1,
                ListingStatus::Deleted => {}
            }
            if listing.payment_status.is_settled() {
                counts.paid += 1;
            }
        }
        Ok(counts)
    }
}

pub struct MemoryListingTx {
    guard: OwnedMutexGuard<Rows>,
    pending: Vec<Listing>,
    writes: Arc<AtomicUsize>,
}

impl MemoryListingTx {
    fn staged(&self, id: Uuid) -> Option<&Listing> {
        self.pending.iter().rev().find(|l| l.id == id).or_else(|| self.guard.get(&id))
    }
}

#[async_trait]
impl ListingTx for MemoryListingTx {
    async fn lock(&mut self, id: Uuid) -> Result<Option<Listing>, StoreError> {
        Ok(self.staged(id).cloned())
    }

    async fn insert(&mut self, listing: &Listing) -> Result<(), StoreError> {
        check_payment_ref(&self.guard, listing)?;
        self.pending.push(listing.clone());
        Ok(())
    }

    async fn save(&mut self, listing: &Listing) -> Result<(), StoreError> {
        let current = self.staged(listing.id).cloned().ok_or(StoreError::Missing(listing.id))?;
        let next = write_once(&current, listing.clone());
        check_payment_ref(&self.guard, &next)?;
        self.pending.push(next);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryListingTx { mut guard, pending, writes } = *self;
        for listing in pending {
            guard.insert(listing.id, listing);
            writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
