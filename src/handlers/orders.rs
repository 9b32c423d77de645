use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::entities::OrderStatus;
use crate::handlers::common::page_limit;
use crate::services::orders::{
    OrderListQuery, OrderPage, OrderSortField, OrderStatistics, OrderView, SortDirection,
};
use crate::session::Principal;
use crate::{errors::ServiceError, ApiResponse, ApiResult, AppState};

/// Shopper-facing order history
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_my_orders))
        .route("/:id", get(get_my_order))
}

/// Admin order management; authorization is enforced upstream
pub fn admin_order_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders))
        .route("/stats", get(order_stats))
        .route("/:id/cancel", post(cancel_order))
        .route("/:id/status", put(update_order_status))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct AdminOrderListParams {
    /// 1-based page number
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub status: Option<OrderStatus>,
    pub sort_by: Option<OrderSortField>,
    pub sort_dir: Option<SortDirection>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "Current user's orders",
    description = "Order history of the authenticated user, newest first",
    params(
        ("x-user-id" = Option<String>, Header, description = "Local user id"),
        ("x-user-email" = Option<String>, Header, description = "Externally authenticated email"),
    ),
    responses(
        (status = 200, description = "Orders", body = ApiResponse<Vec<OrderView>>),
        (status = 401, description = "No authenticated user", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn list_my_orders(
    State(state): State<AppState>,
    principal: Principal,
) -> ApiResult<Vec<OrderView>> {
    let orders = state
        .services
        .orders
        .list_for_user(principal.user_id())
        .await?;
    Ok(Json(ApiResponse::success(
        orders.into_iter().map(OrderView::from).collect(),
    )))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get one of the current user's orders",
    params(
        ("id" = Uuid, Path, description = "Order id"),
        ("x-user-id" = Option<String>, Header, description = "Local user id"),
        ("x-user-email" = Option<String>, Header, description = "Externally authenticated email"),
    ),
    responses(
        (status = 200, description = "Order", body = ApiResponse<OrderView>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn get_my_order(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderView> {
    let order = state
        .services
        .orders
        .find(id)
        .await?
        // someone else's order is reported the same as a missing one
        .filter(|o| o.user_id == principal.user_id())
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))?;
    Ok(Json(ApiResponse::success(order.into())))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/orders",
    summary = "List all orders",
    params(AdminOrderListParams),
    responses(
        (status = 200, description = "Page of orders", body = ApiResponse<OrderPage>),
        (status = 400, description = "Invalid query", body = crate::errors::ErrorResponse),
    ),
    tag = "Admin"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(params): Query<AdminOrderListParams>,
) -> ApiResult<OrderPage> {
    let query = OrderListQuery {
        page: params.page.unwrap_or(1).max(1),
        limit: page_limit(
            params.limit,
            state.config.api_default_page_size,
            state.config.api_max_page_size,
        ),
        status: params.status,
        sort_by: params.sort_by.unwrap_or_default(),
        sort_dir: params.sort_dir.unwrap_or_default(),
    };
    let page = state.services.orders.list_orders(query).await?;
    Ok(Json(ApiResponse::success(page)))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/orders/stats",
    summary = "Order counts per status",
    responses((status = 200, description = "Statistics", body = ApiResponse<OrderStatistics>)),
    tag = "Admin"
)]
pub async fn order_stats(State(state): State<AppState>) -> ApiResult<OrderStatistics> {
    let stats = state.services.orders.order_statistics().await?;
    Ok(Json(ApiResponse::success(stats)))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/orders/{id}/cancel",
    summary = "Cancel an order",
    description = "Cancels a PROCESSING or SHIPPED order and credits its stock back",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order cancelled", body = ApiResponse<OrderView>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Already cancelled or delivered", body = crate::errors::ErrorResponse),
    ),
    tag = "Admin"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderView> {
    let order = state.services.checkout.cancel_order(id).await?;
    Ok(Json(ApiResponse::success(order.into())))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/orders/{id}/status",
    summary = "Move an order along its fulfilment states",
    request_body = UpdateOrderStatusRequest,
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Status updated", body = ApiResponse<OrderView>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Transition not allowed", body = crate::errors::ErrorResponse),
    ),
    tag = "Admin"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> ApiResult<OrderView> {
    let order = state
        .services
        .checkout
        .update_order_status(id, payload.status)
        .await?;
    Ok(Json(ApiResponse::success(order.into())))
}
