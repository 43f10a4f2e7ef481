use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub description: String,
    pub location: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub price: Decimal,
    pub house_type: HouseType,
    pub bedrooms: Option<i32>,
    pub bathrooms: Option<i32>,
    pub area_sqm: Option<f64>,
    pub amenities: Vec<String>,
    pub photos: Vec<String>,
    pub status: ListingStatus,
    pub payment_status: PaymentStatus,
    pub payment_id: Option<Uuid>,
    pub provider_tx_ref: Option<String>,
    pub approval_timestamp: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListingStatus {
    Pending,
    Approved,
    Reserved,
    Rejected,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
    /// Legacy alias of `Success` kept for rows written by older revisions.
    Paid,
}

impl PaymentStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    #[cfg(test)]
    pub fn is_settled(self) -> bool {
        matches!(self, PaymentStatus::Success | PaymentStatus::Paid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HouseType {
    Apartment,
    #[serde(alias = "private home")]
    PrivateHome,
    Condominium,
    Villa,
    GuestHouse,
    Commercial,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

macro_rules! text_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $text:literal $(| $alias:literal)*),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = UnknownVariant;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                match raw.trim() {
                    $(s if s.eq_ignore_ascii_case($text) $(|| s.eq_ignore_ascii_case($alias))* => Ok($ty::$variant),)+
                    other => Err(UnknownVariant { kind: $kind, value: other.to_string() }),
                }
            }
        }
    };
}

text_enum!(ListingStatus, "status", {
    Pending => "PENDING",
    Approved => "APPROVED",
    Reserved => "RESERVED",
    Rejected => "REJECTED",
    Deleted => "DELETED",
});

text_enum!(PaymentStatus, "payment status", {
    Pending => "PENDING",
    Success => "SUCCESS",
    Failed => "FAILED",
    Paid => "PAID",
});

text_enum!(HouseType, "house type", {
    Apartment => "apartment",
    PrivateHome => "private_home" | "private home",
    Condominium => "condominium",
    Villa => "villa",
    GuestHouse => "guest_house" | "guest house",
    Commercial => "commercial",
});

/// Commercial fields supplied at submission, after validation.
#[derive(Debug, Clone)]
pub struct NewListing {
    pub title: String,
    pub description: String,
    pub location: String,
    pub price: Decimal,
    pub house_type: HouseType,
    pub bedrooms: Option<i32>,
    pub bathrooms: Option<i32>,
    pub area_sqm: Option<f64>,
    pub amenities: Vec<String>,
    pub photos: Vec<String>,
}

impl Listing {
    pub fn create(owner_id: Uuid, fields: NewListing, latitude: f64, longitude: f64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            title: fields.title,
            description: fields.description,
            location: fields.location,
            latitude: Some(latitude),
            longitude: Some(longitude),
            price: fields.price,
            house_type: fields.house_type,
            bedrooms: fields.bedrooms,
            bathrooms: fields.bathrooms,
            area_sqm: fields.area_sqm,
            amenities: fields.amenities,
            photos: fields.photos,
            status: ListingStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_id: None,
            provider_tx_ref: None,
            approval_timestamp: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.status == ListingStatus::Deleted
    }
}

/// Mutable commercial fields of an owner update; `None` leaves a field as is.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub amenities: Option<Vec<String>>,
    pub bedrooms: Option<i32>,
    pub bathrooms: Option<i32>,
    pub area_sqm: Option<f64>,
}

/// Read-side filter; every query is implicitly restricted to APPROVED listings.
#[derive(Debug, Clone, Default)]
pub struct ListingFilter {
    pub location: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub house_type: Option<HouseType>,
    pub min_bedrooms: Option<i32>,
    pub amenities: Vec<String>,
    pub text: Option<String>,
    pub offset: i64,
    pub limit: i64,
}

impl ListingFilter {
    /// In-process equivalent of the SQL predicate used by the Postgres store.
    #[cfg(test)]
    pub fn matches(&self, listing: &Listing) -> bool {
        if listing.status != ListingStatus::Approved {
            return false;
        }
        if let Some(location) = &self.location {
            if !listing.location.to_lowercase().contains(&location.to_lowercase()) {
                return false;
            }
        }
        if self.min_price.is_some_and(|min| listing.price < min) {
            return false;
        }
        if self.max_price.is_some_and(|max| listing.price > max) {
            return false;
        }
        if self.house_type.is_some_and(|kind| listing.house_type != kind) {
            return false;
        }
        if let Some(min) = self.min_bedrooms {
            if listing.bedrooms.map_or(true, |beds| beds < min) {
                return false;
            }
        }
        if !self.amenities.iter().all(|wanted| listing.amenities.contains(wanted)) {
            return false;
        }
        if let Some(text) = &self.text {
            let needle = text.to_lowercase();
            if !listing.title.to_lowercase().contains(&needle)
                && !listing.description.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListingPage {
    pub total: i64,
    pub items: Vec<Listing>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ListingCounts {
    pub total_listings: i64,
    pub pending: i64,
    pub approved: i64,
    pub rejected: i64,
    pub paid: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_enums_parse_case_insensitively() {
        assert_eq!("approved".parse::<ListingStatus>().unwrap(), ListingStatus::Approved);
        assert_eq!(" success ".parse::<PaymentStatus>().unwrap(), PaymentStatus::Success);
        assert_eq!("private home".parse::<HouseType>().unwrap(), HouseType::PrivateHome);
        assert!("castle".parse::<HouseType>().is_err());
    }

    #[test]
    fn paid_is_terminal_and_settled() {
        assert!(PaymentStatus::Paid.is_terminal());
        assert!(PaymentStatus::Paid.is_settled());
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(!PaymentStatus::Failed.is_settled());
        assert!(!PaymentStatus::Pending.is_terminal());
    }

    #[test]
    fn status_serializes_in_upper_case() {
        let json = serde_json::to_string(&ListingStatus::Reserved).unwrap();
        assert_eq!(json, "\"RESERVED\"");
    }
}
