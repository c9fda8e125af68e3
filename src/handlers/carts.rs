use super::common::ShopperId;
use crate::{
    entities::cart_item,
    errors::ServiceError,
    services::cart::{AddToCartInput, CartView},
    ApiResponse, AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct UpdateQuantityRequest {
    pub quantity: i32,
}

/// GET /api/v1/cart
pub async fn get_cart(
    State(state): State<AppState>,
    ShopperId(shopper_id): ShopperId,
) -> Result<Json<ApiResponse<CartView>>, ServiceError> {
    let cart = state.services.cart.get_cart(shopper_id).await?;
    Ok(Json(ApiResponse::success(cart)))
}

/// POST /api/v1/cart/items
pub async fn add_item(
    State(state): State<AppState>,
    ShopperId(shopper_id): ShopperId,
    Json(request): Json<AddToCartInput>,
) -> Result<(StatusCode, Json<ApiResponse<cart_item::Model>>), ServiceError> {
    let item = state.services.cart.add_item(shopper_id, request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(item))))
}

/// PUT /api/v1/cart/items/:product_id
///
/// A quantity of zero removes the line and returns no data.
pub async fn update_item(
    State(state): State<AppState>,
    ShopperId(shopper_id): ShopperId,
    Path(product_id): Path<Uuid>,
    Json(request): Json<UpdateQuantityRequest>,
) -> Result<Json<ApiResponse<Option<cart_item::Model>>>, ServiceError> {
    let item = state
        .services
        .cart
        .update_item_quantity(shopper_id, product_id, request.quantity)
        .await?;
    Ok(Json(ApiResponse::success(item)))
}

/// DELETE /api/v1/cart/items/:product_id
pub async fn remove_item(
    State(state): State<AppState>,
    ShopperId(shopper_id): ShopperId,
    Path(product_id): Path<Uuid>,
) -> Result<StatusCode, ServiceError> {
    state
        .services
        .cart
        .remove_item(shopper_id, product_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
