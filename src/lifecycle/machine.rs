//! Transition rules for a listing's `status` and `payment_status`.
//!
//! Functions here only inspect and mutate an in-memory [`Listing`]; the
//! engine is responsible for loading it under a row lock and persisting the
//! result.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::listing::{Listing, ListingStatus, ListingUpdate, NewListing, PaymentStatus};
use crate::error::AppError;
use crate::services::identity::{Identity, Role};
use crate::services::payment::PaymentInitiation;

/// Treat missing and soft-deleted listings alike for every caller-facing path.
pub fn visible(listing: Option<Listing>, id: Uuid) -> Result<Listing, AppError> {
    match listing {
        Some(listing) if !listing.is_deleted() => Ok(listing),
        _ => Err(AppError::NotFound(format!("Property {id} not found"))),
    }
}

pub fn ensure_owner(listing: &Listing, caller: &Identity) -> Result<(), AppError> {
    if listing.owner_id != caller.user_id {
        tracing::warn!(property_id = %listing.id, user_id = %caller.user_id, "Ownership check failed");
        return Err(AppError::Forbidden("Not authorized to modify this property".to_string()));
    }
    Ok(())
}

pub fn ensure_owner_or_admin(listing: &Listing, caller: &Identity) -> Result<(), AppError> {
    if caller.role == Role::Admin {
        return Ok(());
    }
    ensure_owner(listing, caller)
        .map_err(|_| AppError::Forbidden("Not authorized to view this property".to_string()))
}

/// A charge may only be started for a listing that is still waiting on its
/// first payment.
pub fn can_initiate(listing: &Listing) -> Result<(), AppError> {
    if listing.status != ListingStatus::Pending || listing.payment_status != PaymentStatus::Pending {
        return Err(AppError::Conflict(format!(
            "Payment can only be initiated for PENDING/PENDING properties (status={}, payment_status={})",
            listing.status, listing.payment_status
        )));
    }
    if listing.payment_id.is_some() {
        return Err(AppError::Conflict("Payment has already been initiated for this property".to_string()));
    }
    Ok(())
}

/// First write wins: a listing keeps the first payment reference it gets.
pub fn record_initiation(listing: &mut Listing, initiation: &PaymentInitiation, now: DateTime<Utc>) -> Result<(), AppError> {
    can_initiate(listing)?;
    listing.payment_id = initiation.payment_id;
    if listing.provider_tx_ref.is_none() {
        listing.provider_tx_ref = initiation.provider_tx_ref.clone();
    }
    listing.updated_at = now;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Success,
    Failed,
    Unrecognized(String),
}

impl FromStr for PaymentOutcome {
    type Err = std::convert::Infallible;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Ok(match raw.trim().to_ascii_uppercase().as_str() {
            "SUCCESS" => PaymentOutcome::Success,
            "FAILED" => PaymentOutcome::Failed,
            _ => PaymentOutcome::Unrecognized(raw.to_string()),
        })
    }
}

/// What the payment provider told us about a listing's charge.
#[derive(Debug, Clone)]
pub struct PaymentReport {
    pub property_id: Uuid,
    pub payment_id: Option<Uuid>,
    pub outcome: PaymentOutcome,
    pub tx_ref: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// Payment status was already terminal; nothing changed.
    AlreadyProcessed,
    /// Payment cleared and the listing became APPROVED; owner gets notified.
    Approved,
    /// Payment cleared for a listing the owner already deleted.
    SettledWhileDeleted,
    Failed,
    /// Outcome not understood; nothing changed.
    Ignored,
}

impl Confirmation {
    pub fn mutated(self) -> bool {
        matches!(self, Confirmation::Approved | Confirmation::SettledWhileDeleted | Confirmation::Failed)
    }
}

pub fn confirm(listing: &mut Listing, report: &PaymentReport, now: DateTime<Utc>) -> Confirmation {
    if listing.payment_status.is_terminal() {
        return Confirmation::AlreadyProcessed;
    }
    if let PaymentOutcome::Unrecognized(raw) = &report.outcome {
        tracing::warn!(property_id = %listing.id, payment_status = %raw, "Unrecognized payment outcome");
        return Confirmation::Ignored;
    }

    match (listing.payment_id, report.payment_id) {
        (None, Some(reported)) => listing.payment_id = Some(reported),
        (Some(stored), Some(reported)) if stored != reported => {
            tracing::warn!(
                property_id = %listing.id,
                stored_payment_id = %stored,
                reported_payment_id = %reported,
                "Webhook payment reference differs from the stored one; keeping stored value"
            );
        }
        _ => {}
    }
    if listing.provider_tx_ref.is_none() {
        listing.provider_tx_ref = report.tx_ref.clone();
    }
    listing.updated_at = now;

    match report.outcome {
        PaymentOutcome::Success => {
            listing.payment_status = PaymentStatus::Success;
            if listing.is_deleted() {
                return Confirmation::SettledWhileDeleted;
            }
            listing.status = ListingStatus::Approved;
            listing.approval_timestamp.get_or_insert(now);
            Confirmation::Approved
        }
        _ => {
            // a failed charge leaves `status` untouched; only the sweep rejects
            listing.payment_status = PaymentStatus::Failed;
            Confirmation::Failed
        }
    }
}

pub fn reserve(listing: &mut Listing, now: DateTime<Utc>) -> Result<(), AppError> {
    if listing.status != ListingStatus::Approved {
        return Err(AppError::InvalidState(format!(
            "Only APPROVED properties can be reserved (status={})",
            listing.status
        )));
    }
    listing.status = ListingStatus::Reserved;
    listing.updated_at = now;
    Ok(())
}

pub fn unreserve(listing: &mut Listing, now: DateTime<Utc>) -> Result<(), AppError> {
    if listing.status != ListingStatus::Reserved {
        return Err(AppError::InvalidState(format!(
            "Only RESERVED properties can be unreserved (status={})",
            listing.status
        )));
    }
    listing.status = ListingStatus::Approved;
    listing.updated_at = now;
    Ok(())
}

pub fn soft_delete(listing: &mut Listing, now: DateTime<Utc>) -> Result<(), AppError> {
    if listing.is_deleted() {
        return Err(AppError::NotFound(format!("Property {} not found", listing.id)));
    }
    listing.status = ListingStatus::Deleted;
    listing.updated_at = now;
    Ok(())
}

/// Reject a listing whose payment never arrived. Returns whether anything
/// changed; listings already settled or failed are left alone.
pub fn expire(listing: &mut Listing, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    if listing.payment_status != PaymentStatus::Pending || listing.created_at >= cutoff {
        return false;
    }
    listing.payment_status = PaymentStatus::Failed;
    if !listing.is_deleted() {
        listing.status = ListingStatus::Rejected;
    }
    listing.updated_at = now;
    true
}

pub fn validate_title(title: &str) -> Result<String, AppError> {
    let title = title.trim();
    if title.is_empty() || title.chars().count() > 255 {
        return Err(AppError::Validation("title must be between 1 and 255 characters".to_string()));
    }
    Ok(title.to_string())
}

/// Prices are positive with at most two fraction digits.
pub fn validate_price(price: Decimal) -> Result<Decimal, AppError> {
    if price <= Decimal::ZERO {
        return Err(AppError::Validation("price must be greater than zero".to_string()));
    }
    if price.normalize().scale() > 2 {
        return Err(AppError::Validation("price must have at most two decimal places".to_string()));
    }
    if price >= Decimal::new(100_000_000, 0) {
        return Err(AppError::Validation("price exceeds the supported range".to_string()));
    }
    let mut price = price;
    price.rescale(2);
    Ok(price)
}

pub fn validate_count(field: &str, value: Option<i32>) -> Result<Option<i32>, AppError> {
    match value {
        Some(count) if count < 0 => Err(AppError::Validation(format!("{field} must not be negative"))),
        other => Ok(other),
    }
}

pub fn validate_area(value: Option<f64>) -> Result<Option<f64>, AppError> {
    match value {
        Some(area) if !area.is_finite() || area <= 0.0 => {
            Err(AppError::Validation("area_sqm must be a positive number".to_string()))
        }
        other => Ok(other),
    }
}

pub fn normalize_amenities(amenities: Vec<String>) -> Vec<String> {
    let mut seen = Vec::with_capacity(amenities.len());
    for amenity in amenities {
        let amenity = amenity.trim().to_string();
        if !amenity.is_empty() && !seen.contains(&amenity) {
            seen.push(amenity);
        }
    }
    seen
}

/// Normalise a submission and reject it before anything is persisted.
pub fn validate_new(mut fields: NewListing) -> Result<NewListing, AppError> {
    fields.title = validate_title(&fields.title)?;
    fields.location = fields.location.trim().to_string();
    if fields.location.is_empty() {
        return Err(AppError::Validation("location is required".to_string()));
    }
    fields.price = validate_price(fields.price)?;
    fields.bedrooms = validate_count("bedrooms", fields.bedrooms)?;
    fields.bathrooms = validate_count("bathrooms", fields.bathrooms)?;
    fields.area_sqm = validate_area(fields.area_sqm)?;
    fields.amenities = normalize_amenities(fields.amenities);
    Ok(fields)
}

/// Apply an owner edit. Status and payment fields are never touched here.
pub fn apply_update(listing: &mut Listing, update: ListingUpdate, now: DateTime<Utc>) -> Result<(), AppError> {
    if let Some(title) = update.title {
        listing.title = validate_title(&title)?;
    }
    if let Some(description) = update.description {
        listing.description = description;
    }
    if let Some(price) = update.price {
        listing.price = validate_price(price)?;
    }
    if let Some(amenities) = update.amenities {
        listing.amenities = normalize_amenities(amenities);
    }
    if update.bedrooms.is_some() {
        listing.bedrooms = validate_count("bedrooms", update.bedrooms)?;
    }
    if update.bathrooms.is_some() {
        listing.bathrooms = validate_count("bathrooms", update.bathrooms)?;
    }
    if update.area_sqm.is_some() {
        listing.area_sqm = validate_area(update.area_sqm)?;
    }
    listing.updated_at = now;
    Ok(())
}
