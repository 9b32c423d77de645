//! Hooks called by the authentication layer around login and logout.
//!
//! Both always answer 204: snapshot failures are logged and never block the
//! surrounding auth flow.

use axum::{
    extract::State,
    response::IntoResponse,
    routing::post,
    Router,
};

use crate::handlers::common::no_content_response;
use crate::session::{Principal, SessionId};
use crate::{errors::ServiceError, AppState};

pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
}

#[utoipa::path(
    post,
    path = "/api/v1/session/login",
    summary = "Merge the saved cart into the session",
    params(
        ("x-session-id" = String, Header, description = "Session key"),
        ("x-user-id" = Option<String>, Header, description = "Local user id"),
        ("x-user-email" = Option<String>, Header, description = "Externally authenticated email"),
    ),
    responses((status = 204, description = "Login hook ran")),
    tag = "Session"
)]
pub async fn login(
    State(state): State<AppState>,
    session: SessionId,
    principal: Principal,
) -> Result<impl IntoResponse, ServiceError> {
    let live = state.sessions.cart(session.as_str());
    let merged = state
        .services
        .snapshots
        .restore_on_login(principal.user_id(), live)
        .await;
    state.sessions.replace_cart(session.as_str(), merged);
    Ok(no_content_response())
}

#[utoipa::path(
    post,
    path = "/api/v1/session/logout",
    summary = "Save the session cart and end the session",
    params(
        ("x-session-id" = String, Header, description = "Session key"),
        ("x-user-id" = Option<String>, Header, description = "Local user id"),
        ("x-user-email" = Option<String>, Header, description = "Externally authenticated email"),
    ),
    responses((status = 204, description = "Logout hook ran")),
    tag = "Session"
)]
pub async fn logout(
    State(state): State<AppState>,
    session: SessionId,
    principal: Principal,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.sessions.cart(session.as_str());
    state
        .services
        .snapshots
        .save_on_logout(principal.user_id(), &cart)
        .await;
    state.sessions.remove(session.as_str());
    Ok(no_content_response())
}
