use super::common::ShopperId;
use crate::{
    errors::ServiceError,
    services::checkout::{CheckoutRequest, CheckoutSessionResponse},
    ApiResponse, AppState,
};
use axum::{extract::State, http::StatusCode, Json};

/// POST /api/v1/checkout/sessions
///
/// Returns the processor's hosted checkout URL. No order exists until the
/// processor confirms payment through the webhook.
pub async fn create_checkout_session(
    State(state): State<AppState>,
    ShopperId(shopper_id): ShopperId,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CheckoutSessionResponse>>), ServiceError> {
    let session = state
        .services
        .checkout
        .create_checkout_session(shopper_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(session))))
}
