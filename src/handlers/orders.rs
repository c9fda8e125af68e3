use super::common::{PaginatedResponse, PaginationParams, RequireAdmin, ShopperId};
use crate::{
    entities::order,
    errors::ServiceError,
    services::orders::{CancelOrderInput, CreateOrderInput, UpdateOrderInput},
    ApiResponse, AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

/// GET /api/v1/orders
pub async fn list_my_orders(
    State(state): State<AppState>,
    ShopperId(shopper_id): ShopperId,
    Query(params): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PaginatedResponse<order::Model>>>, ServiceError> {
    let result = state
        .services
        .orders
        .list_orders_for_shopper(shopper_id, params.page, params.per_page)
        .await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        result.orders,
        result.page,
        result.per_page,
        result.total,
    ))))
}

/// GET /api/v1/orders/:id
pub async fn get_my_order(
    State(state): State<AppState>,
    ShopperId(shopper_id): ShopperId,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<order::Model>>, ServiceError> {
    let order = state
        .services
        .orders
        .get_order_for_shopper(shopper_id, id)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// POST /api/v1/admin/orders
pub async fn create_order(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Json(request): Json<CreateOrderInput>,
) -> Result<(StatusCode, Json<ApiResponse<order::Model>>), ServiceError> {
    let order = state.services.orders.create_order(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

/// GET /api/v1/admin/orders/:id
pub async fn get_order(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<order::Model>>, ServiceError> {
    let order = state.services.orders.get_order(id).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// GET /api/v1/admin/orders/by-number/:order_number
pub async fn get_order_by_number(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Path(order_number): Path<String>,
) -> Result<Json<ApiResponse<order::Model>>, ServiceError> {
    let order = state
        .services
        .orders
        .get_order_by_number(&order_number)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// PATCH /api/v1/admin/orders/:id
pub async fn update_order(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateOrderInput>,
) -> Result<Json<ApiResponse<order::Model>>, ServiceError> {
    let order = state.services.orders.update_order(id, request).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// POST /api/v1/admin/orders/:id/cancel
pub async fn cancel_order(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Path(id): Path<Uuid>,
    Json(request): Json<CancelOrderInput>,
) -> Result<Json<ApiResponse<order::Model>>, ServiceError> {
    let order = state.services.orders.cancel_order(id, request).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// DELETE /api/v1/admin/orders/:id
pub async fn delete_order(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ServiceError> {
    state.services.orders.delete_order(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
