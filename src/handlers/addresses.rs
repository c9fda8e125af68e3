use super::common::ShopperId;
use crate::{
    errors::ServiceError,
    services::addresses::{AddAddressInput, ShopperAddress, UpdateAddressInput},
    ApiResponse, AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

/// GET /api/v1/addresses
pub async fn list_addresses(
    State(state): State<AppState>,
    ShopperId(shopper_id): ShopperId,
) -> Result<Json<ApiResponse<Vec<ShopperAddress>>>, ServiceError> {
    let addresses = state.services.addresses.list_addresses(shopper_id).await?;
    Ok(Json(ApiResponse::success(addresses)))
}

/// POST /api/v1/addresses
pub async fn add_address(
    State(state): State<AppState>,
    ShopperId(shopper_id): ShopperId,
    Json(request): Json<AddAddressInput>,
) -> Result<(StatusCode, Json<ApiResponse<ShopperAddress>>), ServiceError> {
    let address = state
        .services
        .addresses
        .add_address(shopper_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(address))))
}

/// PUT /api/v1/addresses/:address_id
pub async fn update_address(
    State(state): State<AppState>,
    ShopperId(shopper_id): ShopperId,
    Path(address_id): Path<Uuid>,
    Json(request): Json<UpdateAddressInput>,
) -> Result<Json<ApiResponse<ShopperAddress>>, ServiceError> {
    let address = state
        .services
        .addresses
        .update_address(shopper_id, address_id, request)
        .await?;
    Ok(Json(ApiResponse::success(address)))
}

/// POST /api/v1/addresses/:address_id/default
pub async fn set_default_address(
    State(state): State<AppState>,
    ShopperId(shopper_id): ShopperId,
    Path(address_id): Path<Uuid>,
) -> Result<Json<ApiResponse<ShopperAddress>>, ServiceError> {
    let address = state
        .services
        .addresses
        .set_default(shopper_id, address_id)
        .await?;
    Ok(Json(ApiResponse::success(address)))
}
