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
const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";
const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;

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

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback
    #[serde(default)]
    pub cors_allow_any_origin: bool,

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
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Default currency code for checkout line items
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub default_currency: String,

    /// Secret key for the payment processor REST API
    #[serde(default)]
    pub stripe_secret_key: Option<String>,

    /// Base URL of the payment processor REST API
    #[serde(default = "default_stripe_api_base")]
    pub stripe_api_base: String,

    /// Webhook secret for verifying payment processor callbacks
    #[serde(default)]
    pub payment_webhook_secret: Option<String>,

    /// Webhook timestamp tolerance (seconds)
    #[serde(default)]
    pub payment_webhook_tolerance_secs: Option<u64>,

    /// Timeout for outbound payment processor calls (seconds)
    #[serde(default = "default_payment_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub payment_timeout_secs: u64,

    /// Where the hosted checkout redirects after a successful payment
    #[serde(default = "default_checkout_success_url")]
    #[validate(url)]
    pub checkout_success_url: String,

    /// Where the hosted checkout redirects when the shopper abandons payment
    #[serde(default = "default_checkout_cancel_url")]
    #[validate(url)]
    pub checkout_cancel_url: String,

    /// Shared key required on `/admin` routes; admin routes are open when unset
    #[serde(default)]
    pub admin_api_key: Option<String>,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the basics
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            default_currency: default_currency(),
            stripe_secret_key: None,
            stripe_api_base: default_stripe_api_base(),
            payment_webhook_secret: None,
            payment_webhook_tolerance_secs: None,
            payment_timeout_secs: default_payment_timeout_secs(),
            checkout_success_url: default_checkout_success_url(),
            checkout_cancel_url: default_checkout_cancel_url(),
            admin_api_key: None,
        }
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Returns true if explicit CORS origins are configured
    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_ref()
            .map(|raw| raw.split(',').any(|origin| !origin.trim().is_empty()))
            .unwrap_or(false)
    }

    /// Whether we should fall back to permissive CORS
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    pub fn webhook_tolerance(&self) -> Duration {
        Duration::from_secs(
            self.payment_webhook_tolerance_secs
                .unwrap_or(DEFAULT_WEBHOOK_TOLERANCE_SECS),
        )
    }

    pub fn payment_timeout(&self) -> Duration {
        Duration::from_secs(self.payment_timeout_secs)
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if self.is_production() && self.payment_webhook_secret.is_none() {
            let mut err = ValidationError::new("payment_webhook_secret_required");
            err.message = Some(
                "Set APP__PAYMENT_WEBHOOK_SECRET in production so webhook events are authenticated"
                    .into(),
            );
            errors.add("payment_webhook_secret", err);
        }

        if self.db_min_connections > self.db_max_connections {
            let mut err = ValidationError::new("db_pool_bounds");
            err.message = Some("db_min_connections must not exceed db_max_connections".into());
            errors.add("db_min_connections", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
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

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_currency() -> String {
    "usd".to_string()
}

fn default_stripe_api_base() -> String {
    DEFAULT_STRIPE_API_BASE.to_string()
}

fn default_payment_timeout_secs() -> u64 {
    15
}

fn default_checkout_success_url() -> String {
    "http://localhost:3000/checkout/success".to_string()
}

fn default_checkout_cancel_url() -> String {
    "http://localhost:3000/checkout/cancel".to_string()
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("storefront_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
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
    load_config_from(Path::new(CONFIG_DIR), &run_env)
}

/// Layers `<dir>/default`, `<dir>/<run_env>` and `APP__*` variables over
/// built-in defaults, then validates the result.
pub fn load_config_from(dir: &Path, run_env: &str) -> Result<AppConfig, AppConfigError> {
    info!("Loading configuration for environment: {}", run_env);

    if !dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            dir.display()
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", 8080)?
        .set_default("environment", run_env)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::from(dir.join("default")).required(false))
        .add_source(File::from(dir.join(run_env)).required(false))
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
