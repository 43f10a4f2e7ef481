use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use super::{auth, AppState};
use crate::error::AppError;
use crate::lifecycle::machine::{PaymentOutcome, PaymentReport};
use crate::lifecycle::ConfirmReceipt;

/// Body the payment provider posts once a charge settles.
#[derive(Debug, Deserialize)]
pub struct PaymentConfirmation {
    pub property_id: Uuid,
    pub payment_id: Option<Uuid>,
    pub status: String,
    pub tx_ref: Option<String>,
    pub error_message: Option<String>,
}

impl From<PaymentConfirmation> for PaymentReport {
    fn from(body: PaymentConfirmation) -> Self {
        let outcome = body
            .status
            .parse::<PaymentOutcome>()
            .unwrap_or_else(|never| match never {});
        PaymentReport {
            property_id: body.property_id,
            payment_id: body.payment_id,
            outcome,
            tx_ref: body.tx_ref,
            error_message: body.error_message,
        }
    }
}

// runs before the JSON body is extracted
async fn require_api_key(State(state): State<AppState>, request: Request, next: Next) -> Result<Response, AppError> {
    auth::check_api_key(request.headers(), &state.webhook_key)?;
    Ok(next.run(request).await)
}

async fn confirm_payment(
    State(state): State<AppState>,
    Json(body): Json<PaymentConfirmation>,
) -> Result<Json<ConfirmReceipt>, AppError> {
    Ok(Json(state.engine.confirm_payment(body.into()).await?))
}

pub fn payment_routes(state: AppState) -> Router {
    Router::new()
        .route("/payments/confirm", post(confirm_payment))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .with_state(state)
}
