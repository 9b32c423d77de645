use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use tracing::{info, warn};
use utoipa::IntoParams;
use uuid::Uuid;

use crate::handlers::common::no_content_response;
use crate::services::checkout::{CallbackAck, PaymentStatusView};
use crate::services::payment_gateway::WalletCallback;
use crate::session::SessionId;
use crate::{errors::ServiceError, ApiResponse, ApiResult, AppState};

/// Creates the router for wallet payment endpoints
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/wallet/ipn", post(wallet_ipn))
        .route("/wallet/return", get(wallet_return))
        .route("/:order_id/status", get(payment_status))
}

/// Query string the gateway appends when redirecting the browser back
#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct WalletReturnParams {
    pub order_id: Uuid,
    pub result_code: Option<i32>,
}

/// Settles the order from the client side and clears the session cart once
/// the order is PAID and still the session's in-flight wallet order.
async fn poll_and_complete(
    state: &AppState,
    session: Option<&SessionId>,
    order_id: Uuid,
) -> Result<PaymentStatusView, ServiceError> {
    let view = state.services.checkout.poll_status(order_id).await?;
    if view.paid {
        if let Some(session) = session {
            if state
                .sessions
                .complete_pending_order(session.as_str(), order_id)
            {
                info!(%order_id, "Wallet payment confirmed, session cart cleared");
            }
        }
    }
    Ok(view)
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/wallet/ipn",
    summary = "Wallet payment notification",
    description = "Signed notification posted by the wallet gateway. Duplicates of an already settled order are acknowledged without changes.",
    request_body = WalletCallback,
    responses(
        (status = 204, description = "Notification applied or already settled"),
        (status = 400, description = "Malformed notification", body = crate::errors::ErrorResponse),
        (status = 401, description = "Signature or amount mismatch", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse),
    ),
    tag = "Payments"
)]
pub async fn wallet_ipn(
    State(state): State<AppState>,
    payload: Result<Json<WalletCallback>, JsonRejection>,
) -> Result<impl IntoResponse, ServiceError> {
    let Json(callback) = payload.map_err(|e| {
        warn!(error = %e, "Malformed wallet notification");
        ServiceError::BadRequest(format!("malformed notification: {}", e.body_text()))
    })?;

    match state
        .services
        .checkout
        .handle_gateway_callback(&callback)
        .await?
    {
        CallbackAck::Applied(status) => {
            info!(order_id = %callback.order_id, payment_status = %status, "Wallet notification applied");
        }
        CallbackAck::Duplicate => {
            info!(order_id = %callback.order_id, "Duplicate wallet notification acknowledged");
        }
    }
    Ok(no_content_response())
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/{order_id}/status",
    summary = "Poll wallet payment status",
    description = "Queries the gateway once while the order awaits payment. Gateway errors return the stored status.",
    params(
        ("order_id" = Uuid, Path, description = "Order id"),
        ("x-session-id" = Option<String>, Header, description = "Session key; its cart is cleared once PAID"),
    ),
    responses(
        (status = 200, description = "Current payment status", body = ApiResponse<PaymentStatusView>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Payments"
)]
pub async fn payment_status(
    State(state): State<AppState>,
    session: Option<SessionId>,
    Path(order_id): Path<Uuid>,
) -> ApiResult<PaymentStatusView> {
    let view = poll_and_complete(&state, session.as_ref(), order_id).await?;
    Ok(Json(ApiResponse::success(view)))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/wallet/return",
    summary = "Browser return from the wallet gateway",
    params(
        WalletReturnParams,
        ("x-session-id" = Option<String>, Header, description = "Session key; its cart is cleared once PAID"),
    ),
    responses(
        (status = 200, description = "Current payment status", body = ApiResponse<PaymentStatusView>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Payments"
)]
pub async fn wallet_return(
    State(state): State<AppState>,
    session: Option<SessionId>,
    Query(params): Query<WalletReturnParams>,
) -> ApiResult<PaymentStatusView> {
    // the redirect's own result code is unsigned, so only the gateway query counts
    if let Some(code) = params.result_code {
        info!(order_id = %params.order_id, result_code = code, "Shopper returned from wallet");
    }
    let view = poll_and_complete(&state, session.as_ref(), params.order_id).await?;
    Ok(Json(ApiResponse::success(view)))
}
