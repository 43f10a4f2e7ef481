use std::collections::HashMap;
use std::str::FromStr;

use axum::extract::multipart::{Field, Multipart};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::db::listing::{HouseType, ListingFilter, NewListing};
use crate::error::AppError;
use crate::services::storage::Upload;

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

fn malformed(err: impl std::fmt::Display) -> AppError {
    AppError::Validation(format!("Invalid multipart body: {err}"))
}

fn required<'a>(text: &'a HashMap<String, String>, key: &str) -> Result<&'a str, AppError> {
    text.get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::Validation(format!("{key} is required")))
}

fn parse_field<T>(key: &str, raw: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|err| AppError::Validation(format!("{key} is invalid: {err}")))
}

fn optional<T>(key: &str, raw: Option<&str>) -> Result<Option<T>, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => parse_field(key, value).map(Some),
    }
}

/// Comma separated tags, blanks dropped.
pub fn split_list(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
}

async fn read_file(field: Field<'_>) -> Result<Upload, AppError> {
    let file_name = field.file_name().map(str::to_string);
    let content_type = field.content_type().map(str::to_string);
    let bytes = field.bytes().await.map_err(malformed)?;
    Ok(Upload {
        file_name,
        content_type,
        bytes: bytes.to_vec(),
    })
}

/// Split a listing submission form into its fields and the photos still to
/// be uploaded. `photos` on the returned listing is left empty.
pub async fn read_submission(mut multipart: Multipart) -> Result<(NewListing, Vec<Upload>), AppError> {
    let mut text = HashMap::new();
    let mut amenities = Vec::new();
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" | "files" | "photos" => {
                let upload = read_file(field).await?;
                if !upload.bytes.is_empty() {
                    files.push(upload);
                }
            }
            "amenities" | "amenities[]" => {
                let value = field.text().await.map_err(malformed)?;
                amenities.extend(split_list(&value));
            }
            _ => {
                let value = field.text().await.map_err(malformed)?;
                text.insert(name, value);
            }
        }
    }

    if files.is_empty() {
        return Err(AppError::Validation("At least one photo file is required".to_string()));
    }

    let fields = NewListing {
        title: required(&text, "title")?.to_string(),
        description: required(&text, "description")?.to_string(),
        location: required(&text, "location")?.to_string(),
        price: parse_field::<Decimal>("price", required(&text, "price")?)?,
        house_type: parse_field::<HouseType>("house_type", required(&text, "house_type")?)?,
        bedrooms: optional("bedrooms", text.get("bedrooms").map(String::as_str))?,
        bathrooms: optional("bathrooms", text.get("bathrooms").map(String::as_str))?,
        area_sqm: optional("area_sqm", text.get("area_sqm").map(String::as_str))?,
        amenities,
        photos: Vec::new(),
    };
    Ok((fields, files))
}

/// Query string of the public listing endpoints. Values are parsed by hand
/// so a bad number is reported as a validation error.
#[derive(Debug, Default, Deserialize)]
pub struct ListingQuery {
    pub location: Option<String>,
    pub min_price: Option<String>,
    pub max_price: Option<String>,
    pub house_type: Option<String>,
    pub bedrooms: Option<String>,
    pub amenities: Option<String>,
    pub q: Option<String>,
    pub offset: Option<String>,
    pub limit: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl ListingQuery {
    pub fn into_filter(self) -> Result<ListingFilter, AppError> {
        let offset: i64 = optional("offset", self.offset.as_deref())?.unwrap_or(0);
        let limit: i64 = optional("limit", self.limit.as_deref())?.unwrap_or(DEFAULT_PAGE_SIZE);
        if offset < 0 {
            return Err(AppError::Validation("offset must not be negative".to_string()));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&limit) {
            return Err(AppError::Validation(format!("limit must be between 1 and {MAX_PAGE_SIZE}")));
        }

        let filter = ListingFilter {
            location: non_blank(self.location),
            min_price: optional("min_price", self.min_price.as_deref())?,
            max_price: optional("max_price", self.max_price.as_deref())?,
            house_type: optional("house_type", self.house_type.as_deref())?,
            min_bedrooms: optional("bedrooms", self.bedrooms.as_deref())?,
            amenities: self.amenities.as_deref().map(|raw| split_list(raw).collect()).unwrap_or_default(),
            text: non_blank(self.q),
            offset,
            limit,
        };
        if let (Some(min), Some(max)) = (filter.min_price, filter.max_price) {
            if min > max {
                return Err(AppError::Validation("min_price must not exceed max_price".to_string()));
            }
        }
        Ok(filter)
    }
}
