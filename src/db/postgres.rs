use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Row, Transaction};
use uuid::Uuid;

use super::listing::{Listing, ListingCounts, ListingFilter, ListingPage};
use super::{ListingStore, ListingTx, StoreError};

const PAYMENT_ID_INDEX: &str = "properties_payment_id_unique";

const COLUMNS: &str = "id, owner_id, title, description, location, latitude, longitude, price, \
    house_type, bedrooms, bathrooms, area_sqm, amenities, photos, status, payment_status, \
    payment_id, provider_tx_ref, approval_timestamp, created_at, updated_at";

#[derive(Debug, FromRow)]
struct ListingRow {
    id: Uuid,
    owner_id: Uuid,
    title: String,
    description: String,
    location: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    price: Decimal,
    house_type: String,
    bedrooms: Option<i32>,
    bathrooms: Option<i32>,
    area_sqm: Option<f64>,
    amenities: Vec<String>,
    photos: Vec<String>,
    status: String,
    payment_status: String,
    payment_id: Option<Uuid>,
    provider_tx_ref: Option<String>,
    approval_timestamp: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ListingRow> for Listing {
    type Error = StoreError;

    fn try_from(row: ListingRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = |err: super::listing::UnknownVariant| StoreError::Corrupt(format!("{id}: {err}"));
        Ok(Listing {
            house_type: row.house_type.parse().map_err(corrupt)?,
            status: row.status.parse().map_err(corrupt)?,
            payment_status: row.payment_status.parse().map_err(corrupt)?,
            id: row.id,
            owner_id: row.owner_id,
            title: row.title,
            description: row.description,
            location: row.location,
            latitude: row.latitude,
            longitude: row.longitude,
            price: row.price,
            bedrooms: row.bedrooms,
            bathrooms: row.bathrooms,
            area_sqm: row.area_sqm,
            amenities: row.amenities,
            photos: row.photos,
            payment_id: row.payment_id,
            provider_tx_ref: row.provider_tx_ref,
            approval_timestamp: row.approval_timestamp,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn classify_write(err: sqlx::Error) -> StoreError {
    match err.as_database_error() {
        Some(db) if db.is_unique_violation() && db.constraint() == Some(PAYMENT_ID_INDEX) => {
            StoreError::DuplicatePaymentRef
        }
        _ => StoreError::Database(err),
    }
}

fn insert_query(listing: &Listing) -> sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(
        r#"
        INSERT INTO properties (id, owner_id, title, description, location, latitude, longitude, price,
            house_type, bedrooms, bathrooms, area_sqm, amenities, photos, status, payment_status,
            payment_id, provider_tx_ref, approval_timestamp, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)
        "#,
    )
    .bind(listing.id)
    .bind(listing.owner_id)
    .bind(&listing.title)
    .bind(&listing.description)
    .bind(&listing.location)
    .bind(listing.latitude)
    .bind(listing.longitude)
    .bind(listing.price)
    .bind(listing.house_type.as_str())
    .bind(listing.bedrooms)
    .bind(listing.bathrooms)
    .bind(listing.area_sqm)
    .bind(&listing.amenities)
    .bind(&listing.photos)
    .bind(listing.status.as_str())
    .bind(listing.payment_status.as_str())
    .bind(listing.payment_id)
    .bind(&listing.provider_tx_ref)
    .bind(listing.approval_timestamp)
    .bind(listing.created_at)
    .bind(listing.updated_at)
}

// Listing store backed by postgres
pub struct PgListingStore {
    pool: PgPool,
}

impl PgListingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ListingStore for PgListingStore {
    async fn begin(&self) -> Result<Box<dyn ListingTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgListingTx { tx }))
    }

    async fn insert(&self, listing: &Listing) -> Result<(), StoreError> {
        insert_query(listing)
            .execute(&self.pool)
            .await
            .map_err(classify_write)?;
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Listing>, StoreError> {
        let row = sqlx::query_as::<_, ListingRow>(&format!("SELECT {COLUMNS} FROM properties WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Listing::try_from).transpose()
    }

    async fn stale_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM properties WHERE payment_status = 'PENDING' AND created_at < $1 ORDER BY created_at",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn search(&self, filter: &ListingFilter) -> Result<ListingPage, StoreError> {
        let mut count_query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM properties");
        push_filter(&mut count_query, filter);
        let total: i64 = count_query.build_query_scalar().fetch_one(&self.pool).await?;

        let mut item_query = QueryBuilder::<Postgres>::new(format!("SELECT {COLUMNS} FROM properties"));
        push_filter(&mut item_query, filter);
        item_query
            .push(" ORDER BY approval_timestamp DESC NULLS LAST, created_at DESC LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset);

        let rows = item_query
            .build_query_as::<ListingRow>()
            .fetch_all(&self.pool)
            .await?;
        let items = rows
            .into_iter()
            .map(Listing::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ListingPage { total, items })
    }

    async fn counts(&self) -> Result<ListingCounts, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status <> 'DELETED') AS total_listings,
                COUNT(*) FILTER (WHERE status = 'PENDING') AS pending,
                COUNT(*) FILTER (WHERE status IN ('APPROVED', 'RESERVED')) AS approved,
                COUNT(*) FILTER (WHERE status = 'REJECTED') AS rejected,
                COUNT(*) FILTER (WHERE status <> 'DELETED' AND payment_status IN ('SUCCESS', 'PAID')) AS paid
            FROM properties
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(ListingCounts {
            total_listings: row.try_get("total_listings")?,
            pending: row.try_get("pending")?,
            approved: row.try_get("approved")?,
            rejected: row.try_get("rejected")?,
            paid: row.try_get("paid")?,
        })
    }
}

fn push_filter(query: &mut QueryBuilder<'_, Postgres>, filter: &ListingFilter) {
    query.push(" WHERE status = 'APPROVED'");
    if let Some(location) = &filter.location {
        query.push(" AND location ILIKE ").push_bind(format!("%{location}%"));
    }
    if let Some(min) = filter.min_price {
        query.push(" AND price >= ").push_bind(min);
    }
    if let Some(max) = filter.max_price {
        query.push(" AND price <= ").push_bind(max);
    }
    if let Some(kind) = filter.house_type {
        query.push(" AND house_type = ").push_bind(kind.as_str());
    }
    if let Some(beds) = filter.min_bedrooms {
        query.push(" AND bedrooms >= ").push_bind(beds);
    }
    if !filter.amenities.is_empty() {
        query.push(" AND amenities @> ").push_bind(filter.amenities.clone());
    }
    if let Some(text) = &filter.text {
        query
            .push(" AND to_tsvector('simple', title || ' ' || description) @@ plainto_tsquery('simple', ")
            .push_bind(text.clone())
            .push(")");
    }
}

pub struct PgListingTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl ListingTx for PgListingTx {
    async fn lock(&mut self, id: Uuid) -> Result<Option<Listing>, StoreError> {
        let row = sqlx::query_as::<_, ListingRow>(&format!(
            "SELECT {COLUMNS} FROM properties WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Listing::try_from).transpose()
    }

    async fn insert(&mut self, listing: &Listing) -> Result<(), StoreError> {
        insert_query(listing)
            .execute(&mut *self.tx)
            .await
            .map_err(classify_write)?;
        Ok(())
    }

    async fn save(&mut self, listing: &Listing) -> Result<(), StoreError> {
        // payment reference, tx ref and approval time are write-once columns
        let result = sqlx::query(
            r#"
            UPDATE properties SET
                title = $2, description = $3, price = $4, bedrooms = $5, bathrooms = $6,
                area_sqm = $7, amenities = $8, photos = $9, status = $10, payment_status = $11,
                payment_id = COALESCE(payment_id, $12),
                provider_tx_ref = COALESCE(provider_tx_ref, $13),
                approval_timestamp = COALESCE(approval_timestamp, $14),
                updated_at = $15
            WHERE id = $1
            "#,
        )
        .bind(listing.id)
        .bind(&listing.title)
        .bind(&listing.description)
        .bind(listing.price)
        .bind(listing.bedrooms)
        .bind(listing.bathrooms)
        .bind(listing.area_sqm)
        .bind(&listing.amenities)
        .bind(&listing.photos)
        .bind(listing.status.as_str())
        .bind(listing.payment_status.as_str())
        .bind(listing.payment_id)
        .bind(&listing.provider_tx_ref)
        .bind(listing.approval_timestamp)
        .bind(listing.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(classify_write)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(listing.id));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}
