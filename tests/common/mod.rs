#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    Router,
};
use bookstore_orders::{
    config::AppConfig,
    db::{self, DbConfig},
    entities::{book, invoice},
    errors::ServiceError,
    events::{self, EventSender},
    handlers::AppServices,
    services::payment_gateway::{
        CreatePaymentResponse, PaymentGateway, QueryStatusResponse, WalletCallback, WalletSigner,
    },
    session::{SessionStore, SESSION_ID_HEADER, USER_ID_HEADER},
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_ACCESS_KEY: &str = "test-access-key";
pub const TEST_SECRET: &str = "test-wallet-secret-0123456789abcdef";
pub const TEST_SESSION: &str = "session-1";
pub const TEST_USER: &str = "reader-1";

/// What the fake gateway answers to `create_payment`.
#[derive(Debug, Clone)]
pub enum CreateScript {
    Accept,
    Reject(i32),
    Unreachable,
}

/// What the fake gateway answers to `query_status`.
#[derive(Debug, Clone)]
pub enum QueryScript {
    Paid(i64),
    Pending,
    Failed(i32),
    Unreachable,
}

/// In-process wallet gateway with scripted answers and the real signer, so
/// tests can produce genuinely signed notifications.
pub struct FakeGateway {
    signer: WalletSigner,
    create: Mutex<CreateScript>,
    query: Mutex<QueryScript>,
    pub create_calls: AtomicUsize,
    pub query_calls: AtomicUsize,
    pub last_query_request_id: Mutex<Option<String>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            signer: WalletSigner::new(TEST_ACCESS_KEY, TEST_SECRET),
            create: Mutex::new(CreateScript::Accept),
            query: Mutex::new(QueryScript::Pending),
            create_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
            last_query_request_id: Mutex::new(None),
        }
    }

    pub fn script_create(&self, script: CreateScript) {
        *self.create.lock().unwrap() = script;
    }

    pub fn script_query(&self, script: QueryScript) {
        *self.query.lock().unwrap() = script;
    }

    pub fn query_count(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    /// A notification for `order_id` signed with the shared test secret.
    pub fn signed_callback(
        &self,
        order_id: Uuid,
        amount: i64,
        result_code: i32,
        trans_id: Option<i64>,
    ) -> WalletCallback {
        let mut cb = WalletCallback {
            partner_code: "MOMO".into(),
            order_id: order_id.to_string(),
            request_id: format!("{}_1700000000000", order_id),
            amount,
            order_info: format!("Payment for bookstore order #{}", order_id),
            order_type: "momo_wallet".into(),
            trans_id,
            result_code,
            message: if result_code == 0 {
                "Successful.".into()
            } else {
                "Transaction denied by user.".into()
            },
            pay_type: "qr".into(),
            response_time: 1_700_000_000_000,
            extra_data: String::new(),
            signature: String::new(),
        };
        cb.signature = self.signer.sign(&self.signer.callback_raw(&cb));
        cb
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_payment(
        &self,
        order_id: &str,
        _amount: i64,
        _order_info: &str,
    ) -> Result<CreatePaymentResponse, ServiceError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let script = self.create.lock().unwrap().clone();
        let accepted = |code: i32, message: &str| CreatePaymentResponse {
            request_id: format!("{}_1700000000000", order_id),
            order_id: order_id.to_string(),
            result_code: code,
            message: message.to_string(),
            pay_url: (code == 0).then(|| format!("https://wallet.test/pay/{}", order_id)),
            qr_code_url: None,
            deeplink: None,
        };
        match script {
            CreateScript::Accept => Ok(accepted(0, "Successful.")),
            CreateScript::Reject(code) => Ok(accepted(code, "Bad request")),
            CreateScript::Unreachable => Err(ServiceError::ExternalServiceError(
                "payment gateway unreachable: connection refused".into(),
            )),
        }
    }

    async fn query_status(
        &self,
        _order_id: &str,
        request_id: &str,
    ) -> Result<QueryStatusResponse, ServiceError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_query_request_id.lock().unwrap() = Some(request_id.to_string());
        let script = self.query.lock().unwrap().clone();
        let answer = |code: i32, trans_id: Option<i64>| QueryStatusResponse {
            result_code: code,
            trans_id,
            message: String::new(),
        };
        match script {
            QueryScript::Paid(trans) => Ok(answer(0, Some(trans))),
            QueryScript::Pending => Ok(answer(1000, None)),
            QueryScript::Failed(code) => Ok(answer(code, None)),
            QueryScript::Unreachable => Err(ServiceError::ExternalServiceError(
                "payment gateway timed out".into(),
            )),
        }
    }

    fn verify_callback_signature(&self, callback: &WalletCallback) -> bool {
        self.signer.verify_callback(callback)
    }
}

/// In-memory SQLite with migrations applied. A single pooled connection
/// keeps every query on the same in-memory database.
pub async fn test_db() -> Arc<DatabaseConnection> {
    let pool = db::establish_connection_with_config(&DbConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        min_connections: 1,
        connect_timeout: Duration::from_secs(5),
        idle_timeout: Duration::from_secs(3600),
        acquire_timeout: Duration::from_secs(30),
    })
    .await
    .expect("in-memory sqlite");
    db::run_migrations(&pool).await.expect("migrations");
    Arc::new(pool)
}

pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::new("sqlite::memory:".into(), "test".into());
    cfg.wallet.access_key = TEST_ACCESS_KEY.into();
    cfg.wallet.secret_key = TEST_SECRET.into();
    cfg
}

/// Application state, router and fake gateway over a fresh database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<FakeGateway>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let db = test_db().await;
        let cfg = test_config();

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(FakeGateway::new());
        let services = AppServices::new(db.clone(), event_sender.clone(), gateway.clone(), &cfg);

        let state = AppState {
            db,
            config: cfg,
            event_sender,
            sessions: Arc::new(SessionStore::new()),
            services,
        };
        let router = bookstore_orders::build_router(state.clone());

        Self {
            router,
            state,
            gateway,
            _event_task: event_task,
        }
    }

    pub async fn seed_book(&self, title: &str, price: Decimal, quantity: i32) -> book::Model {
        seed_book(&self.state.db, title, price, quantity).await
    }

    pub async fn stock(&self, book_id: Uuid) -> i32 {
        stock(&self.state.db, book_id).await
    }

    pub async fn invoice(&self, order_id: Uuid) -> invoice::Model {
        invoice::Entity::find_by_id(order_id)
            .one(&*self.state.db)
            .await
            .expect("invoice query")
            .expect("invoice exists")
    }

    /// Sends a request as the default session and user.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request_with_headers(
            method,
            uri,
            body,
            &[(SESSION_ID_HEADER, TEST_SESSION), (USER_ID_HEADER, TEST_USER)],
        )
        .await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn seed_book(
    db: &DatabaseConnection,
    title: &str,
    price: Decimal,
    quantity: i32,
) -> book::Model {
    book::ActiveModel {
        id: Set(Uuid::new_v4()),
        title: Set(title.to_string()),
        price: Set(price),
        quantity: Set(quantity),
    }
    .insert(db)
    .await
    .expect("seed book")
}

pub async fn stock(db: &DatabaseConnection, book_id: Uuid) -> i32 {
    book::Entity::find_by_id(book_id)
        .one(db)
        .await
        .expect("book query")
        .expect("book exists")
        .quantity
}

/// Event sender whose receiver is drained in the background.
pub fn event_sender() -> Arc<EventSender> {
    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(events::process_events(rx));
    Arc::new(EventSender::new(tx))
}

pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}
