use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::entities::PaymentMethod;
use crate::services::checkout::{CheckoutOutcome, PaymentSession};
use crate::services::orders::OrderView;
use crate::session::{Principal, SessionId};
use crate::{errors::ServiceError, ApiResponse, AppState};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CheckoutResponse {
    pub order: OrderView,
    /// Present for wallet orders; the shopper completes payment there
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentSession>,
}

#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    summary = "Place an order from the session cart",
    description = "Reserves stock for every cart line and creates the invoice. Cash orders clear the cart immediately; wallet orders return the gateway payment URLs and keep the cart until payment is confirmed.",
    request_body = CheckoutRequest,
    params(
        ("x-session-id" = String, Header, description = "Session key"),
        ("x-user-id" = Option<String>, Header, description = "Local user id"),
        ("x-user-email" = Option<String>, Header, description = "Externally authenticated email"),
    ),
    responses(
        (status = 201, description = "Order placed", body = ApiResponse<CheckoutResponse>),
        (status = 400, description = "Empty cart or invalid quantity", body = crate::errors::ErrorResponse),
        (status = 401, description = "No authenticated user", body = crate::errors::ErrorResponse),
        (status = 402, description = "Gateway rejected the payment", body = crate::errors::ErrorResponse),
        (status = 409, description = "Stock changed during checkout", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway unreachable", body = crate::errors::ErrorResponse),
    ),
    tag = "Checkout"
)]
pub async fn checkout(
    State(state): State<AppState>,
    session: SessionId,
    principal: Principal,
    Json(payload): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.sessions.cart(session.as_str());

    let outcome = state
        .services
        .checkout
        .checkout(principal.user_id(), &cart, payload.payment_method)
        .await?;

    let response = match outcome {
        CheckoutOutcome::Placed(order) => {
            state.sessions.clear_cart(session.as_str());
            CheckoutResponse {
                order: order.into(),
                payment: None,
            }
        }
        CheckoutOutcome::AwaitingPayment { order, session: payment } => {
            state
                .sessions
                .set_pending_order(session.as_str(), Some(order.id));
            info!(order_id = %order.id, "Cart kept until wallet payment is confirmed");
            CheckoutResponse {
                order: order.into(),
                payment: Some(payment),
            }
        }
    };

    Ok((StatusCode::CREATED, Json(ApiResponse::success(response))))
}
