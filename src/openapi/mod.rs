use axum::{response::Json, routing::get, Router};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Bookstore Orders API",
        version = "1.0.0",
        description = r#"
# Bookstore Orders API

Checkout, payment and order management for the bookstore storefront.

## Sessions and identity

- `x-session-id` keys the shopper's cart.
- `x-user-id` (local accounts) or `x-user-email` (external sign-in) identifies the
  acting user; both are set by the authentication layer in front of this service.

## Payments

Cash orders are final at checkout. Wallet orders return gateway payment URLs and
settle through the signed gateway notification or client polling, whichever
arrives first.

## Error Handling

```json
{
  "error": "Unprocessable Entity",
  "message": "Insufficient stock for \"Dune\": requested 3, available 1",
  "request_id": "req-abc123xyz",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers((url = "http://localhost:8080", description = "Local development")),
    tags(
        (name = "Cart", description = "Session cart endpoints"),
        (name = "Checkout", description = "Order placement"),
        (name = "Payments", description = "Wallet payment settlement"),
        (name = "Orders", description = "Shopper order history"),
        (name = "Session", description = "Login and logout hooks"),
        (name = "Admin", description = "Order administration")
    ),
    paths(
        // Cart
        crate::handlers::cart::get_cart,
        crate::handlers::cart::add_item,
        crate::handlers::cart::update_item,
        crate::handlers::cart::remove_item,
        crate::handlers::cart::clear_cart,

        // Checkout
        crate::handlers::checkout::checkout,

        // Payments
        crate::handlers::payments::wallet_ipn,
        crate::handlers::payments::payment_status,
        crate::handlers::payments::wallet_return,

        // Orders
        crate::handlers::orders::list_my_orders,
        crate::handlers::orders::get_my_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::order_stats,
        crate::handlers::orders::cancel_order,
        crate::handlers::orders::update_order_status,

        // Session hooks
        crate::handlers::session::login,
        crate::handlers::session::logout,
    ),
    components(
        schemas(
            crate::handlers::cart::CartView,
            crate::handlers::cart::AddItemRequest,
            crate::handlers::cart::UpdateQuantityRequest,
            crate::handlers::checkout::CheckoutRequest,
            crate::handlers::checkout::CheckoutResponse,
            crate::handlers::orders::UpdateOrderStatusRequest,
            crate::models::CartItem,
            crate::services::checkout::PaymentSession,
            crate::services::checkout::PaymentStatusView,
            crate::services::orders::OrderView,
            crate::services::orders::OrderPage,
            crate::services::orders::OrderStatistics,
            crate::services::payment_gateway::WalletCallback,
            crate::entities::OrderLine,
            crate::entities::OrderStatus,
            crate::entities::PaymentStatus,
            crate::entities::PaymentMethod,
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

/// Serves the generated document at `/api-docs/openapi.json`.
pub fn openapi_routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route(
        "/api-docs/openapi.json",
        get(|| async { Json(ApiDocV1::openapi()) }),
    )
}
