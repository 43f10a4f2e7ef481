use axum::{
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use futures::future::try_join_all;
use uuid::Uuid;

use super::{auth, rate_limit, utils, AppState};
use crate::db::listing::{Listing, ListingPage, ListingUpdate};
use crate::error::AppError;
use crate::lifecycle::{machine, ListingMetrics, PaymentStarted, Submission};

async fn submit_property(
    headers: HeaderMap,
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Submission>), AppError> {
    let owner = auth::authenticate_owner(&headers, state.verifier.as_ref()).await?;
    let (fields, files) = utils::read_submission(multipart).await?;
    // reject bad input before anything reaches object storage
    let mut fields = machine::validate_new(fields)?;

    tracing::info!(owner_id = %owner.user_id, files = files.len(), "Uploading property photos");
    let storage = &state.storage;
    fields.photos = try_join_all(files.into_iter().map(|file| storage.upload(file))).await?;

    let submission = state.engine.submit(&owner, fields).await?;
    Ok((StatusCode::CREATED, Json(submission)))
}

async fn approve_and_pay(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentStarted>, AppError> {
    let owner = auth::authenticate_owner(&headers, state.verifier.as_ref()).await?;
    tracing::info!(property_id = %id, owner_id = %owner.user_id, "Initiating payment for property");
    Ok(Json(state.engine.initiate_payment(id, &owner).await?))
}

async fn reserve_property(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Listing>, AppError> {
    let owner = auth::authenticate_owner(&headers, state.verifier.as_ref()).await?;
    Ok(Json(state.engine.reserve(id, &owner).await?))
}

async fn unreserve_property(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Listing>, AppError> {
    let owner = auth::authenticate_owner(&headers, state.verifier.as_ref()).await?;
    Ok(Json(state.engine.unreserve(id, &owner).await?))
}

async fn delete_property(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let owner = auth::authenticate_owner(&headers, state.verifier.as_ref()).await?;
    state.engine.soft_delete(id, &owner).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_property(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<ListingUpdate>,
) -> Result<Json<Listing>, AppError> {
    let owner = auth::authenticate_owner(&headers, state.verifier.as_ref()).await?;
    Ok(Json(state.engine.update(id, &owner, update).await?))
}

// owner or admin only
async fn get_property(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Listing>, AppError> {
    let caller = auth::authenticate(&headers, state.verifier.as_ref()).await?;
    Ok(Json(state.engine.get_owned(id, &caller).await?))
}

async fn list_properties(
    State(state): State<AppState>,
    Query(query): Query<utils::ListingQuery>,
) -> Result<Json<ListingPage>, AppError> {
    let filter = query.into_filter()?;
    Ok(Json(state.engine.search(&filter).await?))
}

async fn get_public_property(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Listing>, AppError> {
    Ok(Json(state.engine.get_public(id).await?))
}

async fn property_metrics(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<ListingMetrics>, AppError> {
    let caller = auth::authenticate(&headers, state.verifier.as_ref()).await?;
    auth::require_admin(&caller)?;
    Ok(Json(state.engine.metrics().await?))
}

pub fn property_routes(state: AppState) -> Router {
    Router::new()
        .route("/properties/submit", post(submit_property))
        .route("/properties/metrics", get(property_metrics))
        .route("/properties", get(list_properties))
        .route("/properties/public", get(list_properties))
        .route("/properties/public/:id", get(get_public_property))
        .route(
            "/properties/:id",
            get(get_property).put(update_property).delete(delete_property),
        )
        .route("/properties/:id/approve-and-pay", patch(approve_and_pay))
        .route("/properties/:id/reserve", patch(reserve_property))
        .route("/properties/:id/unreserve", patch(unreserve_property))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit::limit_per_client))
        .with_state(state)
}
