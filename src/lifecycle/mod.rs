//! The Lifecycle Engine: the only code allowed to change a listing's
//! `status` and `payment_status`.
//!
//! Each mutation loads the listing through a [`ListingTx`], applies one of
//! the rules in [`machine`], saves and commits. Side effects (notifications)
//! run after the commit and never fail the operation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::config::Config;
use crate::db::listing::{
    Listing, ListingFilter, ListingPage, ListingStatus, ListingUpdate, NewListing, PaymentStatus,
};
use crate::db::{ListingStore, ListingTx};
use crate::error::AppError;
use crate::services::geocoding::GeocodingResolver;
use crate::services::identity::Identity;
use crate::services::notification::{approval_message, stale_rejection_message, Notifier};
use crate::services::payment::{GatewayError, PaymentGateway, PaymentInitiation, PaymentRequest};
use crate::services::retry::RetryPolicy;

pub mod machine;
pub mod sweeper;

use machine::{Confirmation, PaymentReport};

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub auto_initiate: bool,
    pub notification_language: String,
    pub stale_after: chrono::Duration,
    pub payment_amount: Decimal,
    pub payment_retry: RetryPolicy,
    /// Longest the engine waits on one notification before moving on.
    pub notify_deadline: Duration,
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            auto_initiate: config.payment.auto_initiate,
            notification_language: config.notification_language.clone(),
            stale_after: config.stale_after,
            payment_amount: config.payment.amount,
            payment_retry: RetryPolicy::new(config.payment.max_attempts, config.payment.backoff),
            notify_deadline: config.notification_deadline,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub property_id: Uuid,
    pub status: ListingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentInitiation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentStarted {
    pub property_id: Uuid,
    pub status: ListingStatus,
    pub payment_id: Option<Uuid>,
    pub provider_tx_ref: Option<String>,
    pub checkout_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmReceipt {
    pub status: &'static str,
    pub property_status: ListingStatus,
    pub payment_status: PaymentStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ListingMetrics {
    pub total_listings: i64,
    pub pending: i64,
    pub approved: i64,
    pub rejected: i64,
    pub total_revenue: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub expired: usize,
    pub notify_failures: usize,
    pub errors: usize,
}

pub struct LifecycleEngine {
    store: Arc<dyn ListingStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    resolver: Arc<GeocodingResolver>,
    settings: EngineSettings,
}

impl LifecycleEngine {
    pub fn new(
        store: Arc<dyn ListingStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        resolver: Arc<GeocodingResolver>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            notifier,
            resolver,
            settings,
        }
    }

    pub async fn submit(&self, owner: &Identity, fields: NewListing) -> Result<Submission, AppError> {
        let fields = machine::validate_new(fields)?;
        let coordinates = self.resolver.resolve(&fields.location).await;
        let listing = Listing::create(owner.user_id, fields, coordinates.lat, coordinates.lon);

        self.store.insert(&listing).await?;
        tracing::info!(property_id = %listing.id, owner_id = %owner.user_id, "Property submitted");

        let mut submission = Submission {
            property_id: listing.id,
            status: listing.status,
            payment: None,
            payment_error: None,
        };
        if self.settings.auto_initiate {
            // the listing is committed first; a failed charge leaves it PENDING
            // for a later approve-and-pay or the stale sweep
            match self.charge_and_record(&listing, owner).await {
                Ok(initiation) => submission.payment = Some(initiation),
                Err(err) => {
                    tracing::warn!(property_id = %listing.id, "Automatic payment initiation failed, property stays pending: {err}");
                    submission.payment_error = Some(err.to_string());
                }
            }
        }
        Ok(submission)
    }

    async fn charge_and_record(&self, listing: &Listing, owner: &Identity) -> Result<PaymentInitiation, AppError> {
        let initiation = self.start_charge(listing, owner).await?;
        self.record_initiation(listing.id, owner, &initiation).await?;
        Ok(initiation)
    }

    async fn start_charge(&self, listing: &Listing, owner: &Identity) -> Result<PaymentInitiation, GatewayError> {
        let request = PaymentRequest {
            property_id: listing.id,
            owner_id: owner.user_id,
            owner_token: owner.raw_token.clone(),
        };
        let gateway = &self.gateway;
        let request = &request;
        self.settings
            .payment_retry
            .run(
                "payment initiation",
                move |_| async move { gateway.initiate(request).await },
                GatewayError::retry_decision,
            )
            .await
    }

    pub async fn initiate_payment(&self, id: Uuid, caller: &Identity) -> Result<PaymentStarted, AppError> {
        let listing = machine::visible(self.store.find(id).await?, id)?;
        machine::ensure_owner(&listing, caller)?;
        machine::can_initiate(&listing)?;

        let initiation = self.start_charge(&listing, caller).await?;
        let listing = self.record_initiation(id, caller, &initiation).await?;

        Ok(PaymentStarted {
            property_id: id,
            status: listing.status,
            payment_id: listing.payment_id,
            provider_tx_ref: listing.provider_tx_ref,
            checkout_url: initiation.checkout_url,
        })
    }

    /// Store the gateway's reference in a short transaction of its own.
    async fn record_initiation(
        &self,
        id: Uuid,
        caller: &Identity,
        initiation: &PaymentInitiation,
    ) -> Result<Listing, AppError> {
        let mut tx = self.store.begin().await?;
        let mut listing = machine::visible(tx.lock(id).await?, id)?;
        machine::ensure_owner(&listing, caller)?;
        if let Err(err) = machine::record_initiation(&mut listing, initiation, Utc::now()) {
            tracing::warn!(
                property_id = %id,
                request_id = %initiation.request_id,
                "Listing changed while payment was being initiated: {err}"
            );
            return Err(err);
        }
        tx.save(&listing).await?;
        tx.commit().await?;

        tracing::info!(property_id = %id, payment_id = ?listing.payment_id, "Payment reference stored");
        Ok(listing)
    }

    pub async fn confirm_payment(&self, report: PaymentReport) -> Result<ConfirmReceipt, AppError> {
        let id = report.property_id;
        tracing::info!(property_id = %id, outcome = ?report.outcome, payment_id = ?report.payment_id, "Received payment confirmation");

        let mut tx = self.store.begin().await?;
        let Some(mut listing) = tx.lock(id).await? else {
            tracing::warn!(property_id = %id, "Property not found for payment confirmation");
            return Err(AppError::NotFound("Property not found".to_string()));
        };

        let outcome = machine::confirm(&mut listing, &report, Utc::now());
        if outcome.mutated() {
            tx.save(&listing).await?;
            tx.commit().await?;
        } else {
            // release the row lock before replying
            drop(tx);
        }

        let status = match outcome {
            Confirmation::AlreadyProcessed => {
                tracing::info!(property_id = %id, payment_status = %listing.payment_status, "Payment already processed");
                "already_processed"
            }
            Confirmation::Approved => {
                tracing::info!(property_id = %id, "Property approved successfully");
                let message = approval_message(&self.settings.notification_language, &listing.title, &listing.location);
                self.notify(&listing, &message).await;
                "received"
            }
            Confirmation::SettledWhileDeleted => {
                tracing::warn!(property_id = %id, "Payment settled for a deleted property");
                "received"
            }
            Confirmation::Failed => {
                tracing::warn!(property_id = %id, error_message = ?report.error_message, "Payment failed");
                "received"
            }
            Confirmation::Ignored => "received",
        };

        Ok(ConfirmReceipt {
            status,
            property_status: listing.status,
            payment_status: listing.payment_status,
        })
    }

    /// Load, check ownership, apply `change`, persist; all under one row lock.
    async fn owner_transition<F>(&self, id: Uuid, caller: &Identity, change: F) -> Result<Listing, AppError>
    where
        F: FnOnce(&mut Listing) -> Result<(), AppError> + Send,
    {
        let mut tx = self.store.begin().await?;
        let mut listing = machine::visible(tx.lock(id).await?, id)?;
        machine::ensure_owner(&listing, caller)?;
        change(&mut listing)?;
        tx.save(&listing).await?;
        tx.commit().await?;
        Ok(listing)
    }

    pub async fn reserve(&self, id: Uuid, caller: &Identity) -> Result<Listing, AppError> {
        let listing = self
            .owner_transition(id, caller, |listing| machine::reserve(listing, Utc::now()))
            .await?;
        tracing::info!(property_id = %id, "Property reserved");
        Ok(listing)
    }

    pub async fn unreserve(&self, id: Uuid, caller: &Identity) -> Result<Listing, AppError> {
        let listing = self
            .owner_transition(id, caller, |listing| machine::unreserve(listing, Utc::now()))
            .await?;
        tracing::info!(property_id = %id, "Property unreserved");
        Ok(listing)
    }

    pub async fn soft_delete(&self, id: Uuid, caller: &Identity) -> Result<(), AppError> {
        self.owner_transition(id, caller, |listing| machine::soft_delete(listing, Utc::now()))
            .await?;
        tracing::info!(property_id = %id, "Property soft deleted");
        Ok(())
    }

    pub async fn update(&self, id: Uuid, caller: &Identity, update: ListingUpdate) -> Result<Listing, AppError> {
        let listing = self
            .owner_transition(id, caller, |listing| machine::apply_update(listing, update, Utc::now()))
            .await?;
        tracing::info!(property_id = %id, "Property updated");
        Ok(listing)
    }

    pub async fn get_owned(&self, id: Uuid, caller: &Identity) -> Result<Listing, AppError> {
        let listing = machine::visible(self.store.find(id).await?, id)?;
        machine::ensure_owner_or_admin(&listing, caller)?;
        Ok(listing)
    }

    pub async fn get_public(&self, id: Uuid) -> Result<Listing, AppError> {
        match self.store.find(id).await? {
            Some(listing) if listing.status == ListingStatus::Approved => Ok(listing),
            _ => Err(AppError::NotFound(format!("Property {id} not found"))),
        }
    }

    pub async fn search(&self, filter: &ListingFilter) -> Result<ListingPage, AppError> {
        Ok(self.store.search(filter).await?)
    }

    pub async fn metrics(&self) -> Result<ListingMetrics, AppError> {
        let counts = self.store.counts().await?;
        Ok(ListingMetrics {
            total_listings: counts.total_listings,
            pending: counts.pending,
            approved: counts.approved,
            rejected: counts.rejected,
            total_revenue: self.settings.payment_amount * Decimal::from(counts.paid),
        })
    }

    /// Reject every listing whose payment has been pending longer than the
    /// staleness threshold. Each listing is expired in its own transaction.
    pub async fn sweep_stale(&self) -> Result<SweepReport, AppError> {
        let cutoff = Utc::now() - self.settings.stale_after;
        let ids = self.store.stale_pending(cutoff).await?;
        let mut report = SweepReport {
            scanned: ids.len(),
            ..Default::default()
        };

        if ids.is_empty() {
            tracing::info!("No stale pending properties found");
            return Ok(report);
        }

        for id in ids {
            let listing = match self.expire_one(id, cutoff).await {
                Ok(Some(listing)) => listing,
                Ok(None) => continue,
                Err(err) => {
                    tracing::error!(property_id = %id, "Failed to expire stale property: {err}");
                    report.errors += 1;
                    continue;
                }
            };
            report.expired += 1;
            tracing::info!(property_id = %id, created_at = %listing.created_at, "Marked stale property as FAILED");

            if listing.is_deleted() {
                continue;
            }
            let message = stale_rejection_message(&listing.title, &listing.location);
            if !self.notify(&listing, &message).await {
                report.notify_failures += 1;
            }
        }

        tracing::info!(
            scanned = report.scanned,
            expired = report.expired,
            notify_failures = report.notify_failures,
            errors = report.errors,
            "Cleaned up stale pending properties"
        );
        Ok(report)
    }

    async fn expire_one(&self, id: Uuid, cutoff: chrono::DateTime<Utc>) -> Result<Option<Listing>, AppError> {
        let mut tx: Box<dyn ListingTx> = self.store.begin().await?;
        let Some(mut listing) = tx.lock(id).await? else {
            return Ok(None);
        };
        if !machine::expire(&mut listing, cutoff, Utc::now()) {
            return Ok(None);
        }
        tx.save(&listing).await?;
        tx.commit().await?;
        Ok(Some(listing))
    }

    /// Returns whether the notification went out within the deadline;
    /// failures are only logged.
    async fn notify(&self, listing: &Listing, message: &str) -> bool {
        let send = self.notifier.send(listing.owner_id, message);
        match tokio::time::timeout(self.settings.notify_deadline, send).await {
            Ok(Ok(())) => {
                tracing::info!(property_id = %listing.id, user_id = %listing.owner_id, "Notification sent");
                true
            }
            Ok(Err(err)) => {
                tracing::error!(property_id = %listing.id, user_id = %listing.owner_id, "Failed to send notification: {err}");
                false
            }
            Err(_) => {
                tracing::error!(
                    property_id = %listing.id,
                    user_id = %listing.owner_id,
                    deadline = ?self.settings.notify_deadline,
                    "Notification timed out"
                );
                false
            }
        }
    }
}
