use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json},
    routing::{get, post, put},
    Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::handlers::common::{no_content_response, validate_input};
use crate::models::{Cart, CartItem};
use crate::session::SessionId;
use crate::{errors::ServiceError, ApiResponse, ApiResult, AppState};

/// Creates the router for session cart endpoints
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart).delete(clear_cart))
        .route("/items", post(add_item))
        .route("/items/:book_id", put(update_item).delete(remove_item))
}

/// Cart as shown to the shopper
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CartView {
    pub items: Vec<CartItem>,
    pub total_quantity: i64,
    pub total_price: Decimal,
}

impl From<&Cart> for CartView {
    fn from(cart: &Cart) -> Self {
        Self {
            items: cart.items().to_vec(),
            total_quantity: cart.total_quantity(),
            total_price: cart.total_price(),
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AddItemRequest {
    pub book_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateQuantityRequest {
    /// Stored as given; zero keeps the line with quantity 0
    #[validate(range(min = 0))]
    pub quantity: i32,
}

#[utoipa::path(
    get,
    path = "/api/v1/cart",
    summary = "Get session cart",
    params(("x-session-id" = String, Header, description = "Session key")),
    responses(
        (status = 200, description = "Current cart", body = ApiResponse<CartView>),
        (status = 400, description = "Missing session header", body = crate::errors::ErrorResponse),
    ),
    tag = "Cart"
)]
pub async fn get_cart(State(state): State<AppState>, session: SessionId) -> ApiResult<CartView> {
    let cart = state.sessions.cart(session.as_str());
    Ok(Json(ApiResponse::success(CartView::from(&cart))))
}

#[utoipa::path(
    post,
    path = "/api/v1/cart/items",
    summary = "Add a book to the cart",
    description = "Adds the book with its current catalog title and price. Quantities for a book already in the cart are summed.",
    request_body = AddItemRequest,
    params(("x-session-id" = String, Header, description = "Session key")),
    responses(
        (status = 200, description = "Updated cart", body = ApiResponse<CartView>),
        (status = 400, description = "Invalid quantity", body = crate::errors::ErrorResponse),
        (status = 404, description = "Book not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Not enough stock", body = crate::errors::ErrorResponse),
    ),
    tag = "Cart"
)]
pub async fn add_item(
    State(state): State<AppState>,
    session: SessionId,
    Json(payload): Json<AddItemRequest>,
) -> ApiResult<CartView> {
    validate_input(&payload)?;

    let book = state
        .services
        .stock
        .get_book(payload.book_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Book {} not found", payload.book_id)))?;

    let max_line = state.config.max_cart_line_quantity;
    // checked under the session entry lock so concurrent adds cannot
    // overshoot the limits
    let cart = state.sessions.with_cart(session.as_str(), |cart| {
        let in_cart = cart.get(book.id).map(|i| i.quantity).unwrap_or(0);
        let wanted = in_cart + payload.quantity;

        if wanted > max_line {
            return Err(ServiceError::ValidationError(format!(
                "at most {} copies of one book per order",
                max_line
            )));
        }
        if wanted > book.quantity {
            return Err(ServiceError::InsufficientStock {
                book_id: book.id,
                title: book.title.clone(),
                requested: wanted,
                available: book.quantity,
            });
        }

        cart.add_item(CartItem::new(book.id, book.title.clone(), book.price, payload.quantity));
        Ok(cart.clone())
    })?;
    Ok(Json(ApiResponse::success(CartView::from(&cart))))
}

#[utoipa::path(
    put,
    path = "/api/v1/cart/items/{book_id}",
    summary = "Set the quantity of a cart line",
    request_body = UpdateQuantityRequest,
    params(
        ("book_id" = Uuid, Path, description = "Book id"),
        ("x-session-id" = String, Header, description = "Session key"),
    ),
    responses(
        (status = 200, description = "Updated cart", body = ApiResponse<CartView>),
        (status = 404, description = "Book not in cart", body = crate::errors::ErrorResponse),
    ),
    tag = "Cart"
)]
pub async fn update_item(
    State(state): State<AppState>,
    session: SessionId,
    Path(book_id): Path<Uuid>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> ApiResult<CartView> {
    validate_input(&payload)?;
    if payload.quantity > state.config.max_cart_line_quantity {
        return Err(ServiceError::ValidationError(format!(
            "at most {} copies of one book per order",
            state.config.max_cart_line_quantity
        )));
    }

    let (found, cart) = state.sessions.with_cart(session.as_str(), |cart| {
        (cart.update_quantity(book_id, payload.quantity), cart.clone())
    });
    if !found {
        return Err(ServiceError::NotFound(format!("Book {} is not in the cart", book_id)));
    }
    Ok(Json(ApiResponse::success(CartView::from(&cart))))
}

#[utoipa::path(
    delete,
    path = "/api/v1/cart/items/{book_id}",
    summary = "Remove a cart line",
    params(
        ("book_id" = Uuid, Path, description = "Book id"),
        ("x-session-id" = String, Header, description = "Session key"),
    ),
    responses(
        (status = 200, description = "Updated cart", body = ApiResponse<CartView>),
        (status = 404, description = "Book not in cart", body = crate::errors::ErrorResponse),
    ),
    tag = "Cart"
)]
pub async fn remove_item(
    State(state): State<AppState>,
    session: SessionId,
    Path(book_id): Path<Uuid>,
) -> ApiResult<CartView> {
    let (removed, cart) = state
        .sessions
        .with_cart(session.as_str(), |cart| (cart.remove_item(book_id), cart.clone()));
    if !removed {
        return Err(ServiceError::NotFound(format!("Book {} is not in the cart", book_id)));
    }
    Ok(Json(ApiResponse::success(CartView::from(&cart))))
}

#[utoipa::path(
    delete,
    path = "/api/v1/cart",
    summary = "Empty the cart",
    params(("x-session-id" = String, Header, description = "Session key")),
    responses((status = 204, description = "Cart emptied")),
    tag = "Cart"
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    session: SessionId,
) -> Result<impl IntoResponse, ServiceError> {
    state.sessions.clear_cart(session.as_str());
    Ok(no_content_response())
}
