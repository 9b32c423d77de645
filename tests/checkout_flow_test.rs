//! Integration tests for checkout: cart to invoice with stock reservation,
//! for both cash-on-delivery and wallet orders.

mod common;

use std::sync::atomic::Ordering;

use assert_matches::assert_matches;
use axum::http::{Method, StatusCode};
use bookstore_orders::entities::{OrderStatus, PaymentMethod, PaymentStatus};
use bookstore_orders::errors::ServiceError;
use bookstore_orders::models::{Cart, CartItem};
use bookstore_orders::services::checkout::CheckoutOutcome;
use common::{body_json, CreateScript, TestApp, TEST_SESSION, TEST_USER};
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

async fn add_to_cart(app: &TestApp, book_id: Uuid, quantity: i32) {
    let response = app
        .request(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({ "book_id": book_id, "quantity": quantity })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

// ==================== Session cart ====================

#[tokio::test]
async fn concurrent_adds_respect_the_line_limit() {
    let app = TestApp::new().await;
    let book = app.seed_book("Dune", dec!(120000), 1000).await;
    let add = || {
        app.request(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({ "book_id": book.id, "quantity": 40 })),
        )
    };

    let (a, b, c) = tokio::join!(add(), add(), add());
    let statuses = [a.status(), b.status(), c.status()];
    let accepted = statuses.iter().filter(|s| **s == StatusCode::OK).count();
    let rejected = statuses
        .iter()
        .filter(|s| **s == StatusCode::BAD_REQUEST)
        .count();
    assert_eq!((accepted, rejected), (2, 1));

    // default limit is 99 copies per line
    let cart = app.state.sessions.cart(TEST_SESSION);
    assert_eq!(cart.get(book.id).map(|i| i.quantity), Some(80));
}

#[tokio::test]
async fn adding_beyond_stock_names_the_book() {
    let app = TestApp::new().await;
    let book = app.seed_book("Emma", dec!(85000), 3).await;
    add_to_cart(&app, book.id, 2).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({ "book_id": book.id, "quantity": 2 })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert!(body["message"].as_str().unwrap().contains("Emma"));
    assert_eq!(
        app.state.sessions.cart(TEST_SESSION).get(book.id).map(|i| i.quantity),
        Some(2)
    );
}

// ==================== Cash on delivery ====================

#[tokio::test]
async fn cod_checkout_reserves_stock_and_clears_cart() {
    let app = TestApp::new().await;
    let dune = app.seed_book("Dune", dec!(120000), 5).await;
    let emma = app.seed_book("Emma", dec!(85000), 2).await;

    add_to_cart(&app, dune.id, 2).await;
    add_to_cart(&app, emma.id, 1).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({ "payment_method": "COD" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = body_json(response).await;
    let order = &body["data"]["order"];
    assert_eq!(order["order_status"], "PROCESSING");
    assert_eq!(order["payment_status"], "COD_PENDING");
    assert_eq!(order["payment_method"], "COD");
    assert_eq!(order["user_id"], TEST_USER);
    assert_eq!(order["lines"].as_array().unwrap().len(), 2);
    assert!(body["data"].get("payment").is_none());

    let order_id: Uuid = order["id"].as_str().unwrap().parse().unwrap();
    let invoice = app.invoice(order_id).await;
    assert_eq!(invoice.total_price, dec!(325000));

    assert_eq!(app.stock(dune.id).await, 3);
    assert_eq!(app.stock(emma.id).await, 1);
    assert!(app.state.sessions.cart(TEST_SESSION).is_empty());
    assert_eq!(app.gateway.create_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_cart_is_rejected() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({ "payment_method": "COD" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let stats = app.state.services.orders.order_statistics().await.unwrap();
    assert_eq!(stats.total, 0);
}

#[tokio::test]
async fn checkout_requires_an_authenticated_user() {
    let app = TestApp::new().await;
    let book = app.seed_book("Dune", dec!(120000), 5).await;
    add_to_cart(&app, book.id, 1).await;

    let response = app
        .request_with_headers(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({ "payment_method": "COD" })),
            &[("x-session-id", TEST_SESSION)],
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.stock(book.id).await, 5);
}

#[tokio::test]
async fn insufficient_stock_names_the_book_and_changes_nothing() {
    let app = TestApp::new().await;
    let dune = app.seed_book("Dune", dec!(120000), 5).await;
    let emma = app.seed_book("Emma", dec!(85000), 1).await;

    // the cart endpoint caps at stock, so build the cart directly
    let cart = Cart::from_items([
        CartItem::new(dune.id, "Dune", dec!(120000), 2),
        CartItem::new(emma.id, "Emma", dec!(85000), 3),
    ]);
    app.state.sessions.replace_cart(TEST_SESSION, cart);

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({ "payment_method": "COD" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert!(body["message"].as_str().unwrap().contains("Emma"));

    assert_eq!(app.stock(dune.id).await, 5);
    assert_eq!(app.stock(emma.id).await, 1);
    assert_eq!(app.state.sessions.cart(TEST_SESSION).len(), 2);
    let stats = app.state.services.orders.order_statistics().await.unwrap();
    assert_eq!(stats.total, 0);
}

#[tokio::test]
async fn zero_quantity_line_fails_validation() {
    let app = TestApp::new().await;
    let dune = app.seed_book("Dune", dec!(120000), 5).await;
    let cart = Cart::from_items([CartItem::new(dune.id, "Dune", dec!(120000), 0)]);

    let err = app
        .state
        .services
        .checkout
        .checkout(TEST_USER, &cart, PaymentMethod::Cod)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
    assert_eq!(app.stock(dune.id).await, 5);
}

#[tokio::test]
async fn last_unit_goes_to_exactly_one_of_two_concurrent_checkouts() {
    let app = TestApp::new().await;
    let book = app.seed_book("The Last Copy", dec!(50000), 1).await;
    let cart = Cart::from_items([CartItem::new(book.id, "The Last Copy", dec!(50000), 1)]);

    let checkout = app.state.services.checkout.clone();
    let (first, second) = tokio::join!(
        checkout.checkout("reader-a", &cart, PaymentMethod::Cod),
        checkout.checkout("reader-b", &cart, PaymentMethod::Cod),
    );

    let results = [first, second];
    let placed = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(placed, 1);

    let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert_matches!(
        loser,
        ServiceError::InsufficientStock { title, available: 0, .. } if title == "The Last Copy"
    );

    assert_eq!(app.stock(book.id).await, 0);
    let stats = app.state.services.orders.order_statistics().await.unwrap();
    assert_eq!(stats.total, 1);
}

// ==================== Wallet ====================

#[tokio::test]
async fn wallet_checkout_returns_payment_session_and_keeps_cart() {
    let app = TestApp::new().await;
    let book = app.seed_book("Dune", dec!(120000), 5).await;
    add_to_cart(&app, book.id, 2).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({ "payment_method": "WALLET" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = body_json(response).await;
    let order_id: Uuid = body["data"]["order"]["id"].as_str().unwrap().parse().unwrap();
    assert_eq!(body["data"]["order"]["payment_status"], "PENDING_PAYMENT");
    assert_eq!(body["data"]["payment"]["amount"], 240000);
    assert_eq!(
        body["data"]["payment"]["pay_url"],
        format!("https://wallet.test/pay/{}", order_id)
    );

    let invoice = app.invoice(order_id).await;
    assert_eq!(
        invoice.request_id.as_deref(),
        Some(format!("{}_1700000000000", order_id).as_str())
    );
    assert_eq!(app.stock(book.id).await, 3);
    assert_eq!(app.state.sessions.cart(TEST_SESSION).len(), 1);
    assert_eq!(app.state.sessions.pending_order(TEST_SESSION), Some(order_id));
}

#[tokio::test]
async fn wallet_rejection_marks_payment_failed() {
    let app = TestApp::new().await;
    app.gateway.script_create(CreateScript::Reject(11));
    let book = app.seed_book("Dune", dec!(120000), 5).await;
    let cart = Cart::from_items([CartItem::new(book.id, "Dune", dec!(120000), 1)]);

    let err = app
        .state
        .services
        .checkout
        .checkout(TEST_USER, &cart, PaymentMethod::Wallet)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PaymentFailed(_));

    let orders = app
        .state
        .services
        .orders
        .list_for_user(TEST_USER)
        .await
        .unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].payment_status, PaymentStatus::PaymentFailed);
    assert_eq!(orders[0].order_status, OrderStatus::Processing);
    // stock stays reserved until the order is cancelled
    assert_eq!(app.stock(book.id).await, 4);
}

#[tokio::test]
async fn unreachable_gateway_leaves_order_pending() {
    let app = TestApp::new().await;
    app.gateway.script_create(CreateScript::Unreachable);
    let book = app.seed_book("Dune", dec!(120000), 5).await;
    add_to_cart(&app, book.id, 1).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({ "payment_method": "WALLET" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let orders = app
        .state
        .services
        .orders
        .list_for_user(TEST_USER)
        .await
        .unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].payment_status, PaymentStatus::PendingPayment);
    assert_eq!(app.state.sessions.cart(TEST_SESSION).len(), 1);
}

#[tokio::test]
async fn cod_outcome_carries_the_invoice() {
    let app = TestApp::new().await;
    let book = app.seed_book("Dune", dec!(120000), 5).await;
    let cart = Cart::from_items([CartItem::new(book.id, "Dune", dec!(120000), 1)]);

    let outcome = app
        .state
        .services
        .checkout
        .checkout(TEST_USER, &cart, PaymentMethod::Cod)
        .await
        .unwrap();
    assert_matches!(outcome, CheckoutOutcome::Placed(_));
    assert_eq!(outcome.order().payment_status, PaymentStatus::CodPending);
    assert_eq!(outcome.order().lines().len(), 1);
}
