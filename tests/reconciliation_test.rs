mod common;

use std::time::Duration;

use bookstore_orders::entities::invoice::Model as InvoiceModel;
use bookstore_orders::entities::{OrderStatus, PaymentMethod, PaymentStatus};
use bookstore_orders::models::{Cart, CartItem};
use bookstore_orders::services::reconciliation::{PendingPaymentReconciler, ReconcileReport};
use chrono::Utc;
use common::{CreateScript, QueryScript, TestApp, TEST_USER};
use rust_decimal_macros::dec;
use tokio::sync::watch;
use uuid::Uuid;

const TTL: Duration = Duration::from_secs(15 * 60);

fn reconciler(app: &TestApp) -> PendingPaymentReconciler {
    PendingPaymentReconciler::new(
        app.state.services.checkout.clone(),
        app.state.event_sender.clone(),
        TTL,
        Duration::from_millis(20),
    )
}

async fn place(app: &TestApp, book_id: Uuid, qty: i32, method: PaymentMethod) -> InvoiceModel {
    let cart = Cart::from_items([CartItem::new(book_id, "Dune", dec!(120000), qty)]);
    app.state
        .services
        .checkout
        .checkout(TEST_USER, &cart, method)
        .await
        .unwrap()
        .order()
        .clone()
}

#[tokio::test]
async fn abandoned_wallet_orders_are_cancelled_and_restocked() {
    let app = TestApp::new().await;
    let book = app.seed_book("Dune", dec!(120000), 5).await;
    let order = place(&app, book.id, 2, PaymentMethod::Wallet).await;
    assert_eq!(app.stock(book.id).await, 3);

    let report = reconciler(&app)
        .run_once(Utc::now() + chrono::Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(
        report,
        ReconcileReport {
            examined: 1,
            paid: 0,
            expired: 1,
            errors: 0
        }
    );

    let invoice = app.invoice(order.id).await;
    assert_eq!(invoice.order_status, OrderStatus::Cancelled);
    assert_eq!(invoice.payment_status, PaymentStatus::PaymentFailed);
    assert_eq!(app.stock(book.id).await, 5);

    // nothing left to do on the next sweep
    let report = reconciler(&app)
        .run_once(Utc::now() + chrono::Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(report.examined, 0);
    assert_eq!(app.stock(book.id).await, 5);
}

#[tokio::test]
async fn orders_within_ttl_are_left_alone() {
    let app = TestApp::new().await;
    let book = app.seed_book("Dune", dec!(120000), 5).await;
    let order = place(&app, book.id, 1, PaymentMethod::Wallet).await;

    let report = reconciler(&app).run_once(Utc::now()).await.unwrap();
    assert_eq!(report.examined, 0);
    assert_eq!(app.gateway.query_count(), 0);
    assert_eq!(
        app.invoice(order.id).await.payment_status,
        PaymentStatus::PendingPayment
    );
}

#[tokio::test]
async fn late_payment_found_by_the_sweep_is_kept() {
    let app = TestApp::new().await;
    let book = app.seed_book("Dune", dec!(120000), 5).await;
    let order = place(&app, book.id, 1, PaymentMethod::Wallet).await;
    app.gateway.script_query(QueryScript::Paid(77));

    let report = reconciler(&app)
        .run_once(Utc::now() + chrono::Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(report.paid, 1);
    assert_eq!(report.expired, 0);

    let invoice = app.invoice(order.id).await;
    assert_eq!(invoice.payment_status, PaymentStatus::Paid);
    assert_eq!(invoice.order_status, OrderStatus::Processing);
    assert_eq!(app.stock(book.id).await, 4);
}

#[tokio::test]
async fn unreachable_gateway_leaves_the_order_pending() {
    let app = TestApp::new().await;
    let book = app.seed_book("Dune", dec!(120000), 5).await;
    let order = place(&app, book.id, 1, PaymentMethod::Wallet).await;
    app.gateway.script_query(QueryScript::Unreachable);

    let later = Utc::now() + chrono::Duration::hours(1);
    let report = reconciler(&app).run_once(later).await.unwrap();
    assert_eq!(
        report,
        ReconcileReport {
            examined: 1,
            paid: 0,
            expired: 0,
            errors: 1
        }
    );
    let invoice = app.invoice(order.id).await;
    assert_eq!(invoice.order_status, OrderStatus::Processing);
    assert_eq!(invoice.payment_status, PaymentStatus::PendingPayment);
    assert_eq!(app.stock(book.id).await, 4);

    // the shopper paid during the outage; the next sweep finds out
    app.gateway.script_query(QueryScript::Paid(88));
    let report = reconciler(&app).run_once(later).await.unwrap();
    assert_eq!(report.paid, 1);
    let invoice = app.invoice(order.id).await;
    assert_eq!(invoice.payment_status, PaymentStatus::Paid);
    assert_eq!(invoice.order_status, OrderStatus::Processing);
    assert_eq!(app.stock(book.id).await, 4);
}

#[tokio::test]
async fn gateway_failure_verdict_expires_the_order() {
    let app = TestApp::new().await;
    let book = app.seed_book("Dune", dec!(120000), 5).await;
    let order = place(&app, book.id, 2, PaymentMethod::Wallet).await;
    app.gateway.script_query(QueryScript::Failed(1007));

    let report = reconciler(&app)
        .run_once(Utc::now() + chrono::Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(report.expired, 1);
    let invoice = app.invoice(order.id).await;
    assert_eq!(invoice.order_status, OrderStatus::Cancelled);
    assert_eq!(invoice.payment_status, PaymentStatus::PaymentFailed);
    assert_eq!(app.stock(book.id).await, 5);
}

#[tokio::test]
async fn rejected_wallet_orders_release_their_stock() {
    let app = TestApp::new().await;
    app.gateway.script_create(CreateScript::Reject(11));
    let book = app.seed_book("Dune", dec!(120000), 5).await;
    let cart = Cart::from_items([CartItem::new(book.id, "Dune", dec!(120000), 2)]);
    app.state
        .services
        .checkout
        .checkout(TEST_USER, &cart, PaymentMethod::Wallet)
        .await
        .unwrap_err();
    assert_eq!(app.stock(book.id).await, 3);

    let report = reconciler(&app)
        .run_once(Utc::now() + chrono::Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(report.expired, 1);
    // already failed, so the gateway is not asked again
    assert_eq!(app.gateway.query_count(), 0);
    assert_eq!(app.stock(book.id).await, 5);
}

#[tokio::test]
async fn cod_and_admin_cancelled_orders_are_ignored() {
    let app = TestApp::new().await;
    let book = app.seed_book("Dune", dec!(120000), 5).await;
    place(&app, book.id, 1, PaymentMethod::Cod).await;
    let wallet = place(&app, book.id, 1, PaymentMethod::Wallet).await;
    app.state.services.orders.cancel(wallet.id).await.unwrap();
    assert_eq!(app.stock(book.id).await, 4);

    let report = reconciler(&app)
        .run_once(Utc::now() + chrono::Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(report.examined, 0);
    assert_eq!(app.stock(book.id).await, 4);
}

#[tokio::test]
async fn background_loop_stops_on_shutdown() {
    let app = TestApp::new().await;
    let (tx, rx) = watch::channel(false);
    let handle = reconciler(&app).spawn(rx);

    tokio::time::sleep(Duration::from_millis(50)).await;
    tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("reconciler did not stop")
        .unwrap();
}
