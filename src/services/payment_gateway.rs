//! Wallet payment gateway adapter.
//!
//! Outbound requests and inbound notifications are authenticated with
//! HMAC-SHA256 over `key=value` pairs joined by `&` in alphabetical key
//! order, hex encoded. Amounts are whole currency units.

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::config::WalletGatewayConfig;
use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

const REQUEST_TYPE: &str = "captureWallet";

/// Result code the gateway uses for "accepted" and "paid".
pub const RESULT_SUCCESS: i32 = 0;

/// Query result codes meaning the shopper has not finished paying yet.
pub const PENDING_RESULT_CODES: std::ops::RangeInclusive<i32> = 1000..=1006;

/// Gateway answer to a create-payment request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentResponse {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub order_id: String,
    pub result_code: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub pay_url: Option<String>,
    #[serde(default)]
    pub qr_code_url: Option<String>,
    #[serde(default)]
    pub deeplink: Option<String>,
}

impl CreatePaymentResponse {
    pub fn is_accepted(&self) -> bool {
        self.result_code == RESULT_SUCCESS
    }
}

/// Gateway answer to a transaction status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStatusResponse {
    pub result_code: i32,
    #[serde(default)]
    pub trans_id: Option<i64>,
    #[serde(default)]
    pub message: String,
}

/// What a status query says about the order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryVerdict {
    Paid { transaction_id: Option<String> },
    Pending,
    Failed { reason: String },
}

impl QueryStatusResponse {
    pub fn verdict(&self) -> QueryVerdict {
        match self.result_code {
            RESULT_SUCCESS => QueryVerdict::Paid {
                transaction_id: self.trans_id.map(|t| t.to_string()),
            },
            code if PENDING_RESULT_CODES.contains(&code) => QueryVerdict::Pending,
            code => QueryVerdict::Failed {
                reason: format!("gateway result {}: {}", code, self.message),
            },
        }
    }
}

/// Instant payment notification posted by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WalletCallback {
    pub partner_code: String,
    pub order_id: String,
    pub request_id: String,
    pub amount: i64,
    #[serde(default)]
    pub order_info: String,
    #[serde(default)]
    pub order_type: String,
    #[serde(default)]
    pub trans_id: Option<i64>,
    pub result_code: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub pay_type: String,
    #[serde(default)]
    pub response_time: i64,
    #[serde(default)]
    pub extra_data: String,
    pub signature: String,
}

/// Port to the third-party wallet provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a payment session. `result_code == 0` means the gateway
    /// accepted the request, not that the shopper has paid.
    async fn create_payment(
        &self,
        order_id: &str,
        amount: i64,
        order_info: &str,
    ) -> Result<CreatePaymentResponse, ServiceError>;

    /// Polls the current status of a payment session.
    async fn query_status(
        &self,
        order_id: &str,
        request_id: &str,
    ) -> Result<QueryStatusResponse, ServiceError>;

    /// Recomputes the notification signature and compares it to the one
    /// provided.
    fn verify_callback_signature(&self, callback: &WalletCallback) -> bool;
}

/// Rounds an invoice total to the integer amount sent to the gateway.
/// The same value must be used when signing and when checking callbacks.
pub fn gateway_amount(total: Decimal) -> Result<i64, ServiceError> {
    total
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| ServiceError::ValidationError(format!("amount {} out of range", total)))
}

/// Description shown to the shopper on the gateway page.
pub fn order_info(prefix: &str, order_id: &str) -> String {
    format!("{} #{}", prefix, order_id)
}

/// Joins `key=value` pairs with `&`, keys sorted alphabetically.
pub fn canonical_string(fields: &[(&str, String)]) -> String {
    let mut sorted: Vec<&(&str, String)> = fields.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn mac_for(secret: &str, raw: &str) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(raw.as_bytes());
    mac
}

/// Hex HMAC-SHA256 of `raw` under `secret`.
pub fn sign(secret: &str, raw: &str) -> String {
    hex::encode(mac_for(secret, raw).finalize().into_bytes())
}

/// Constant-time check of a hex signature.
pub fn verify(secret: &str, raw: &str, signature_hex: &str) -> bool {
    match hex::decode(signature_hex.trim()) {
        Ok(bytes) => mac_for(secret, raw).verify_slice(&bytes).is_ok(),
        Err(_) => false,
    }
}

/// Signature strings of the three gateway messages.
#[derive(Clone)]
pub struct WalletSigner {
    access_key: String,
    secret_key: String,
}

impl WalletSigner {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    pub fn create_payment_raw(&self, req: &CreatePaymentBody) -> String {
        canonical_string(&[
            ("accessKey", self.access_key.clone()),
            ("amount", req.amount.to_string()),
            ("extraData", req.extra_data.clone()),
            ("ipnUrl", req.ipn_url.clone()),
            ("orderId", req.order_id.clone()),
            ("orderInfo", req.order_info.clone()),
            ("partnerCode", req.partner_code.clone()),
            ("redirectUrl", req.redirect_url.clone()),
            ("requestId", req.request_id.clone()),
            ("requestType", req.request_type.clone()),
        ])
    }

    pub fn query_raw(&self, partner_code: &str, order_id: &str, request_id: &str) -> String {
        canonical_string(&[
            ("accessKey", self.access_key.clone()),
            ("orderId", order_id.to_string()),
            ("partnerCode", partner_code.to_string()),
            ("requestId", request_id.to_string()),
        ])
    }

    pub fn callback_raw(&self, cb: &WalletCallback) -> String {
        canonical_string(&[
            ("accessKey", self.access_key.clone()),
            ("amount", cb.amount.to_string()),
            ("extraData", cb.extra_data.clone()),
            ("message", cb.message.clone()),
            ("orderId", cb.order_id.clone()),
            ("orderInfo", cb.order_info.clone()),
            ("orderType", cb.order_type.clone()),
            ("partnerCode", cb.partner_code.clone()),
            ("payType", cb.pay_type.clone()),
            ("requestId", cb.request_id.clone()),
            ("responseTime", cb.response_time.to_string()),
            ("resultCode", cb.result_code.to_string()),
            (
                "transId",
                cb.trans_id.map(|t| t.to_string()).unwrap_or_default(),
            ),
        ])
    }

    pub fn sign(&self, raw: &str) -> String {
        sign(&self.secret_key, raw)
    }

    pub fn verify_callback(&self, cb: &WalletCallback) -> bool {
        verify(&self.secret_key, &self.callback_raw(cb), &cb.signature)
    }
}

/// Body of the capture request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentBody {
    pub partner_code: String,
    pub partner_name: String,
    pub store_id: String,
    pub request_id: String,
    pub amount: i64,
    pub order_id: String,
    pub order_info: String,
    pub redirect_url: String,
    pub ipn_url: String,
    pub lang: String,
    pub extra_data: String,
    pub request_type: String,
    pub auto_capture: bool,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryBody<'a> {
    partner_code: &'a str,
    request_id: &'a str,
    order_id: &'a str,
    lang: &'a str,
    signature: String,
}

/// HTTP client for the wallet provider.
#[derive(Clone)]
pub struct WalletGatewayClient {
    http: reqwest::Client,
    config: WalletGatewayConfig,
    signer: WalletSigner,
}

impl WalletGatewayClient {
    pub fn new(config: WalletGatewayConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(Duration::from_secs(config.request_timeout_secs.min(5)))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("failed to build HTTP client: {}", e)))?;
        let signer = WalletSigner::new(config.access_key.clone(), config.secret_key.clone());
        Ok(Self {
            http,
            config,
            signer,
        })
    }

    pub fn signer(&self) -> &WalletSigner {
        &self.signer
    }

    fn new_request_id(order_id: &str) -> String {
        format!("{}_{}", order_id, chrono::Utc::now().timestamp_millis())
    }

    async fn post_json<B, R>(&self, url: &str, body: &B) -> Result<R, ServiceError>
    where
        B: Serialize + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let response = self.http.post(url).json(body).send().await?;
        let status = response.status();
        if status.is_server_error() {
            return Err(ServiceError::ExternalServiceError(format!(
                "payment gateway responded with {}",
                status
            )));
        }
        Ok(response.json::<R>().await?)
    }
}

#[async_trait]
impl PaymentGateway for WalletGatewayClient {
    #[instrument(skip(self, order_info))]
    async fn create_payment(
        &self,
        order_id: &str,
        amount: i64,
        order_info: &str,
    ) -> Result<CreatePaymentResponse, ServiceError> {
        let mut body = CreatePaymentBody {
            partner_code: self.config.partner_code.clone(),
            partner_name: self.config.partner_name.clone(),
            store_id: self.config.store_id.clone(),
            request_id: Self::new_request_id(order_id),
            amount,
            order_id: order_id.to_string(),
            order_info: order_info.to_string(),
            redirect_url: self.config.return_url.clone(),
            ipn_url: self.config.ipn_url.clone(),
            lang: self.config.lang.clone(),
            extra_data: String::new(),
            request_type: REQUEST_TYPE.to_string(),
            auto_capture: true,
            signature: String::new(),
        };
        body.signature = self.signer.sign(&self.signer.create_payment_raw(&body));

        let mut response: CreatePaymentResponse =
            self.post_json(&self.config.endpoint, &body).await?;
        if response.request_id.is_empty() {
            response.request_id = body.request_id.clone();
        }

        info!(
            order_id,
            request_id = %response.request_id,
            result_code = response.result_code,
            "wallet payment session requested"
        );
        Ok(response)
    }

    #[instrument(skip(self))]
    async fn query_status(
        &self,
        order_id: &str,
        request_id: &str,
    ) -> Result<QueryStatusResponse, ServiceError> {
        let raw = self
            .signer
            .query_raw(&self.config.partner_code, order_id, request_id);
        let body = QueryBody {
            partner_code: &self.config.partner_code,
            request_id,
            order_id,
            lang: &self.config.lang,
            signature: self.signer.sign(&raw),
        };

        let response: QueryStatusResponse =
            self.post_json(&self.config.query_endpoint, &body).await?;
        info!(order_id, result_code = response.result_code, "wallet status queried");
        Ok(response)
    }

    fn verify_callback_signature(&self, callback: &WalletCallback) -> bool {
        let ok = self.signer.verify_callback(callback);
        if !ok {
            warn!(security = true, order_id = %callback.order_id, "wallet callback signature mismatch");
        }
        ok
    }
}
