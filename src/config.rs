use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PENDING_TTL_SECS: u64 = 900;
const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 60;
const DEV_PLACEHOLDER_SECRET: &str = "dev-wallet-secret";

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),
    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationErrors),
}

/// Credentials and endpoints of the third-party wallet gateway.
#[derive(Clone, Debug, Deserialize, Validate)]
/// Missing keys fall back to the sandbox defaults, so a single
/// `APP__WALLET__SECRET_KEY` override is enough.
#[serde(default, deny_unknown_fields)]
pub struct WalletGatewayConfig {
    #[validate(length(min = 1))]
    pub partner_code: String,

    #[validate(length(min = 1))]
    pub access_key: String,

    /// Shared HMAC-SHA256 secret
    #[validate(length(min = 1))]
    pub secret_key: String,

    /// Capture (create payment) endpoint
    #[validate(url)]
    pub endpoint: String,

    /// Transaction status query endpoint
    #[validate(url)]
    pub query_endpoint: String,

    /// Where the gateway sends the shopper's browser afterwards
    pub return_url: String,

    /// Server-to-server notification (IPN) URL
    pub ipn_url: String,

    #[serde(default = "default_partner_name")]
    pub partner_name: String,

    #[serde(default = "default_store_id")]
    pub store_id: String,

    #[serde(default = "default_lang")]
    pub lang: String,

    /// Hard timeout for every outbound gateway call
    #[serde(default = "default_gateway_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub request_timeout_secs: u64,

    /// Prefix of the order description shown to the shopper
    #[serde(default = "default_order_info_prefix")]
    pub order_info_prefix: String,
}

impl Default for WalletGatewayConfig {
    fn default() -> Self {
        Self {
            partner_code: "MOMO".to_string(),
            access_key: "dev-access-key".to_string(),
            secret_key: DEV_PLACEHOLDER_SECRET.to_string(),
            endpoint: "https://test-payment.momo.vn/v2/gateway/api/create".to_string(),
            query_endpoint: "https://test-payment.momo.vn/v2/gateway/api/query".to_string(),
            return_url: "http://localhost:8080/api/v1/payments/wallet/return".to_string(),
            ipn_url: "http://localhost:8080/api/v1/payments/wallet/ipn".to_string(),
            partner_name: default_partner_name(),
            store_id: default_store_id(),
            lang: default_lang(),
            request_timeout_secs: default_gateway_timeout_secs(),
            order_info_prefix: default_order_info_prefix(),
        }
    }
}

impl WalletGatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Background sweep over abandoned wallet payments.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct ReconciliationConfig {
    #[serde(default = "default_true_bool")]
    pub enabled: bool,

    #[serde(default = "default_reconcile_interval_secs")]
    #[validate(range(min = 1))]
    pub interval_secs: u64,

    /// Age after which a wallet order still waiting for payment is expired
    #[serde(default = "default_pending_ttl_secs")]
    #[validate(range(min = 60))]
    pub pending_ttl_secs: u64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_reconcile_interval_secs(),
            pending_ttl_secs: default_pending_ttl_secs(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1))]
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[validate(length(min = 1))]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 1))]
    pub event_channel_capacity: usize,

    /// Upper bound on the quantity of a single cart line
    #[serde(default = "default_max_line_quantity")]
    #[validate(range(min = 1))]
    pub max_cart_line_quantity: i32,

    /// Default page size for the admin order listing
    #[serde(default = "default_api_page_size")]
    pub api_default_page_size: u64,

    /// Maximum page size for the admin order listing
    #[serde(default = "default_api_max_page_size")]
    pub api_max_page_size: u64,

    /// Wallet gateway settings
    #[serde(default)]
    #[validate]
    pub wallet: WalletGatewayConfig,

    /// Pending payment reconciliation settings
    #[serde(default)]
    #[validate]
    pub reconciliation: ReconciliationConfig,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the
    /// database URL and environment.
    pub fn new(database_url: String, environment: String) -> Self {
        Self {
            database_url,
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            max_cart_line_quantity: default_max_line_quantity(),
            api_default_page_size: default_api_page_size(),
            api_max_page_size: default_api_max_page_size(),
            wallet: WalletGatewayConfig::default(),
            reconciliation: ReconciliationConfig::default(),
        }
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
            || self.environment.eq_ignore_ascii_case("test")
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn pending_payment_ttl(&self) -> Duration {
        Duration::from_secs(self.reconciliation.pending_ttl_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconciliation.interval_secs)
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.is_development() && self.wallet.secret_key == DEV_PLACEHOLDER_SECRET {
            let mut err = ValidationError::new("wallet_secret_required");
            err.message = Some(
                "Set APP__WALLET__SECRET_KEY for non-development environments".into(),
            );
            errors.add("wallet", err);
        }

        if self.api_default_page_size == 0 || self.api_default_page_size > self.api_max_page_size
        {
            let mut err = ValidationError::new("page_size");
            err.message =
                Some("api_default_page_size must be between 1 and api_max_page_size".into());
            errors.add("api_default_page_size", err);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_true_bool() -> bool {
    true
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_max_line_quantity() -> i32 {
    99
}

fn default_api_page_size() -> u64 {
    20
}

fn default_api_max_page_size() -> u64 {
    100
}

fn default_partner_name() -> String {
    "Bookstore".to_string()
}

fn default_store_id() -> String {
    "BookstoreOnline".to_string()
}

fn default_lang() -> String {
    "vi".to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}

fn default_order_info_prefix() -> String {
    "Payment for bookstore order".to_string()
}

fn default_reconcile_interval_secs() -> u64 {
    DEFAULT_RECONCILE_INTERVAL_SECS
}

fn default_pending_ttl_secs() -> u64 {
    DEFAULT_PENDING_TTL_SECS
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    match level.to_ascii_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => {
            let mut err = ValidationError::new("log_level");
            err.message = Some("log_level must be one of trace, debug, info, warn, error".into());
            Err(err)
        }
    }
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("bookstore_orders={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://bookstore.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", run_env.clone())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
