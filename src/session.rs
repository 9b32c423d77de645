//! Per-session context: the live cart and the in-flight wallet order.
//!
//! State lives in an explicit [`SessionStore`] held by `AppState`; handlers
//! receive the session key through the [`SessionId`] extractor and the
//! acting user through [`Principal`].

use axum::{extract::FromRequestParts, http::request::Parts};
use dashmap::DashMap;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::Cart;

pub const SESSION_ID_HEADER: &str = "x-session-id";
pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";

#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub cart: Cart,
    /// Wallet order awaiting payment; the cart is kept until it is PAID.
    pub pending_order: Option<Uuid>,
}

/// Concurrent map of session key to session state.
///
/// Shard guards are never held across an `.await`: every accessor takes a
/// synchronous closure or returns an owned copy.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<String, SessionState>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the session cart, empty for unknown sessions.
    pub fn cart(&self, session_id: &str) -> Cart {
        self.sessions
            .get(session_id)
            .map(|s| s.cart.clone())
            .unwrap_or_default()
    }

    /// Mutates the session cart in place, creating the session on first use.
    pub fn with_cart<R>(&self, session_id: &str, f: impl FnOnce(&mut Cart) -> R) -> R {
        let mut entry = self.sessions.entry(session_id.to_string()).or_default();
        f(&mut entry.cart)
    }

    pub fn replace_cart(&self, session_id: &str, cart: Cart) {
        self.with_cart(session_id, |c| *c = cart);
    }

    pub fn clear_cart(&self, session_id: &str) {
        if let Some(mut state) = self.sessions.get_mut(session_id) {
            state.cart.clear();
        }
    }

    pub fn set_pending_order(&self, session_id: &str, order_id: Option<Uuid>) {
        let mut entry = self.sessions.entry(session_id.to_string()).or_default();
        entry.pending_order = order_id;
    }

    pub fn pending_order(&self, session_id: &str) -> Option<Uuid> {
        self.sessions.get(session_id).and_then(|s| s.pending_order)
    }

    /// Clears the cart only if `order_id` is still the session's pending
    /// wallet order, so a newer cart is never wiped by a stale poll.
    pub fn complete_pending_order(&self, session_id: &str, order_id: Uuid) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(mut state) if state.pending_order == Some(order_id) => {
                state.cart.clear();
                state.pending_order = None;
                true
            }
            _ => false,
        }
    }

    /// Drops the whole session, returning its last state.
    pub fn remove(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.remove(session_id).map(|(_, state)| state)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Session key taken from the `x-session-id` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for SessionId
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| SessionId(v.to_string()))
            .ok_or_else(|| ServiceError::BadRequest(format!("missing {} header", SESSION_ID_HEADER)))
    }
}

/// The acting user, however they authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// Account in the local user store.
    LocalUser(String),
    /// Identity asserted by an external provider; keyed by email.
    ExternalUser(String),
}

impl Principal {
    /// Single user id used by orders and cart snapshots.
    pub fn user_id(&self) -> &str {
        match self {
            Principal::LocalUser(id) => id,
            Principal::ExternalUser(email) => email,
        }
    }

    fn from_parts(parts: &Parts) -> Option<Self> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        header(USER_ID_HEADER)
            .map(Principal::LocalUser)
            .or_else(|| header(USER_EMAIL_HEADER).map(|e| Principal::ExternalUser(e.to_lowercase())))
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Principal::from_parts(parts)
            .ok_or_else(|| ServiceError::Unauthorized("no authenticated user".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CartItem;
    use axum::http::Request;
    use rust_decimal_macros::dec;

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        let (parts, _) = builder.body(()).unwrap().into_parts();
        parts
    }

    #[tokio::test]
    async fn local_user_wins_over_email() {
        let mut p = parts(&[(USER_ID_HEADER, "u-1"), (USER_EMAIL_HEADER, "a@b.c")]);
        let principal = Principal::from_request_parts(&mut p, &()).await.unwrap();
        assert_eq!(principal, Principal::LocalUser("u-1".into()));
        assert_eq!(principal.user_id(), "u-1");
    }

    #[tokio::test]
    async fn external_user_resolves_to_email() {
        let mut p = parts(&[(USER_EMAIL_HEADER, "Reader@Example.com")]);
        let principal = Principal::from_request_parts(&mut p, &()).await.unwrap();
        assert_eq!(principal.user_id(), "reader@example.com");
    }

    #[tokio::test]
    async fn missing_identity_is_unauthorized() {
        let mut p = parts(&[]);
        let err = Principal::from_request_parts(&mut p, &()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));

        let err = SessionId::from_request_parts(&mut p, &()).await.unwrap_err();
        assert!(matches!(err, ServiceError::BadRequest(_)));
    }

    #[test]
    fn stale_poll_does_not_clear_newer_cart() {
        let store = SessionStore::new();
        let book = Uuid::new_v4();
        store.with_cart("s1", |c| c.add_item(CartItem::new(book, "Dune", dec!(1000), 1)));
        let old_order = Uuid::new_v4();
        let new_order = Uuid::new_v4();
        store.set_pending_order("s1", Some(new_order));

        assert!(!store.complete_pending_order("s1", old_order));
        assert_eq!(store.cart("s1").len(), 1);

        assert!(store.complete_pending_order("s1", new_order));
        assert!(store.cart("s1").is_empty());
        assert_eq!(store.pending_order("s1"), None);
    }
}
