use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info, warn};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::numbering::{NumberingScheme, NumberingStrategy};

const CONFIG_DIR: &str = "config";
const DEVELOPMENT: &str = "development";
const DEFAULT_NUMBER_WIDTH: usize = 6;
const DEFAULT_NUMBERING_ATTEMPTS: u32 = 5;
const DEV_DEFAULT_SETTINGS_KEY: &str = "tenantdesk-development-settings-key-do-not-use-in-prod";
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Prefixes and padding used when generating document numbers.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct NumberingConfig {
    #[serde(default = "default_invoice_prefix")]
    #[validate(length(min = 1, max = 16))]
    pub invoice_prefix: String,

    #[serde(default = "default_quote_prefix")]
    #[validate(length(min = 1, max = 16))]
    pub quote_prefix: String,

    #[serde(default = "default_sales_order_prefix")]
    #[validate(length(min = 1, max = 16))]
    pub sales_order_prefix: String,

    #[serde(default = "default_purchase_order_prefix")]
    #[validate(length(min = 1, max = 16))]
    pub purchase_order_prefix: String,

    #[serde(default = "default_delivery_order_prefix")]
    #[validate(length(min = 1, max = 16))]
    pub delivery_order_prefix: String,

    #[serde(default = "default_return_order_prefix")]
    #[validate(length(min = 1, max = 16))]
    pub return_order_prefix: String,

    #[serde(default = "default_receipt_order_prefix")]
    #[validate(length(min = 1, max = 16))]
    pub receipt_order_prefix: String,

    /// Zero-pad width of the numeric part
    #[serde(default = "default_number_width")]
    #[validate(range(min = 1, max = 12))]
    pub width: usize,

    /// Attempts before a numbering collision is reported as a conflict
    #[serde(default = "default_numbering_attempts")]
    #[validate(range(min = 1, max = 50))]
    pub max_attempts: u32,
}

impl Default for NumberingConfig {
    fn default() -> Self {
        Self {
            invoice_prefix: default_invoice_prefix(),
            quote_prefix: default_quote_prefix(),
            sales_order_prefix: default_sales_order_prefix(),
            purchase_order_prefix: default_purchase_order_prefix(),
            delivery_order_prefix: default_delivery_order_prefix(),
            return_order_prefix: default_return_order_prefix(),
            receipt_order_prefix: default_receipt_order_prefix(),
            width: default_number_width(),
            max_attempts: default_numbering_attempts(),
        }
    }
}

impl NumberingConfig {
    pub fn invoice(&self) -> NumberingScheme {
        NumberingScheme::new(
            &self.invoice_prefix,
            self.width,
            NumberingStrategy::YearlySequence,
        )
    }

    pub fn quote(&self) -> NumberingScheme {
        self.max_id_scheme(&self.quote_prefix)
    }

    pub fn sales_order(&self) -> NumberingScheme {
        self.max_id_scheme(&self.sales_order_prefix)
    }

    pub fn purchase_order(&self) -> NumberingScheme {
        self.max_id_scheme(&self.purchase_order_prefix)
    }

    pub fn delivery_order(&self) -> NumberingScheme {
        self.max_id_scheme(&self.delivery_order_prefix)
    }

    pub fn return_order(&self) -> NumberingScheme {
        self.max_id_scheme(&self.return_order_prefix)
    }

    pub fn receipt_order(&self) -> NumberingScheme {
        self.max_id_scheme(&self.receipt_order_prefix)
    }

    fn max_id_scheme(&self, prefix: &str) -> NumberingScheme {
        NumberingScheme::new(prefix, self.width, NumberingStrategy::MaxIdPlusOne)
    }
}

/// Connection pool settings for the tenant database.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[validate(length(min = 1))]
    pub url: String,
    #[serde(default = "DatabaseConfig::default_max_connections")]
    #[validate(range(min = 1))]
    pub max_connections: u32,
    #[serde(default = "DatabaseConfig::default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "DatabaseConfig::default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "DatabaseConfig::default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "DatabaseConfig::default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: Self::default_max_connections(),
            min_connections: Self::default_min_connections(),
            connect_timeout_secs: Self::default_connect_timeout_secs(),
            idle_timeout_secs: Self::default_idle_timeout_secs(),
            acquire_timeout_secs: Self::default_acquire_timeout_secs(),
        }
    }

    fn default_max_connections() -> u32 {
        16
    }
    fn default_min_connections() -> u32 {
        1
    }
    fn default_connect_timeout_secs() -> u64 {
        30
    }
    fn default_idle_timeout_secs() -> u64 {
        600
    }
    fn default_acquire_timeout_secs() -> u64 {
        8
    }
}

#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    #[validate(custom = "validate_log_level")]
    pub level: String,
    /// Emit one JSON object per line instead of the human format
    #[serde(default)]
    pub json: bool,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
        }
    }
}

/// Everything the CLI and the service layer read at start-up.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// `development`, `test`, `production`...
    pub environment: String,

    #[validate]
    pub database: DatabaseConfig,

    #[serde(default)]
    #[validate]
    pub logging: LoggingConfig,

    /// Apply pending schema migrations before running a command
    #[serde(default)]
    pub auto_migrate: bool,

    #[serde(default = "default_event_buffer")]
    #[validate(range(min = 1))]
    pub event_channel_capacity: usize,

    /// Currency stamped on documents when the company has none
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub default_currency: String,

    /// Secret the payment settings cipher key is derived from
    #[validate(length(min = 32))]
    pub settings_encryption_key: String,

    #[serde(default)]
    #[validate]
    pub numbering: NumberingConfig,
}

impl AppConfig {
    pub fn new(database_url: String, settings_encryption_key: String, environment: String) -> Self {
        Self {
            environment,
            database: DatabaseConfig::with_url(database_url),
            logging: LoggingConfig::default(),
            auto_migrate: false,
            event_channel_capacity: default_event_buffer(),
            default_currency: default_currency(),
            settings_encryption_key,
            numbering: NumberingConfig::default(),
        }
    }

    /// `test` counts as development so the bundled key stays usable there.
    pub fn is_development(&self) -> bool {
        ["development", "test"]
            .iter()
            .any(|env| self.environment.eq_ignore_ascii_case(env))
    }

    fn check_deployment_rules(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.is_development() && self.settings_encryption_key.trim() == DEV_DEFAULT_SETTINGS_KEY
        {
            let mut err = ValidationError::new("settings_encryption_key_default_dev");
            err.message = Some(
                "the bundled development key cannot protect payment settings here; set APP__SETTINGS_ENCRYPTION_KEY"
                    .into(),
            );
            errors.add("settings_encryption_key", err);
        }

        if self.database.min_connections > self.database.max_connections {
            let mut err = ValidationError::new("min_connections");
            err.message = Some("database.min_connections is above database.max_connections".into());
            errors.add("database", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("could not read configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationErrors),
}

fn default_event_buffer() -> usize {
    1024
}
fn default_currency() -> String {
    "USD".to_string()
}
fn default_invoice_prefix() -> String {
    "INV-".to_string()
}
fn default_quote_prefix() -> String {
    "QUO-".to_string()
}
fn default_sales_order_prefix() -> String {
    "SO-".to_string()
}
fn default_purchase_order_prefix() -> String {
    "PO-".to_string()
}
fn default_delivery_order_prefix() -> String {
    "DO-".to_string()
}
fn default_return_order_prefix() -> String {
    "RET-".to_string()
}
fn default_receipt_order_prefix() -> String {
    "RCO-".to_string()
}
fn default_number_width() -> usize {
    DEFAULT_NUMBER_WIDTH
}
fn default_numbering_attempts() -> u32 {
    DEFAULT_NUMBERING_ATTEMPTS
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    if LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
        return Ok(());
    }
    let mut err = ValidationError::new("log_level");
    err.message = Some(format!("expected one of {}", LOG_LEVELS.join(", ")).into());
    Err(err)
}

/// Installs the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_tracing(logging: &LoggingConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = match env::var("RUST_LOG") {
        Ok(directive) if !directive.trim().is_empty() => EnvFilter::new(directive),
        _ => EnvFilter::new(format!("tenantdesk={},sea_orm=warn", logging.level)),
    };

    let builder = fmt().with_env_filter(filter);
    let _ = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Reads `config/default.toml`, then `config/<RUN_ENV>.toml`, then `APP__*`
/// variables, later sources overriding earlier ones.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    load_config_from(CONFIG_DIR)
}

pub fn load_config_from(dir: &str) -> Result<AppConfig, AppConfigError> {
    let run_env = ["RUN_ENV", "APP_ENV"]
        .iter()
        .find_map(|name| env::var(name).ok())
        .unwrap_or_else(|| DEVELOPMENT.to_string());
    info!(environment = %run_env, "loading tenantdesk configuration");

    if !Path::new(dir).is_dir() {
        warn!(dir, "configuration directory missing, using defaults and APP__* variables");
    }

    let mut builder = Config::builder()
        .set_default("environment", run_env.as_str())?
        .set_default("database.url", "sqlite://tenantdesk.db?mode=rwc")?
        .add_source(File::with_name(&format!("{dir}/default")).required(false))
        .add_source(File::with_name(&format!("{dir}/{run_env}")).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"));
    if run_env.eq_ignore_ascii_case(DEVELOPMENT) {
        builder = builder.set_default("settings_encryption_key", DEV_DEFAULT_SETTINGS_KEY)?;
    }
    let raw = builder.build()?;

    if raw.get_string("settings_encryption_key").is_err() {
        error!("no settings_encryption_key configured; set APP__SETTINGS_ENCRYPTION_KEY (32+ characters)");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "settings_encryption_key".into(),
        )));
    }

    let cfg: AppConfig = raw.try_deserialize()?;
    if let Err(e) = cfg.validate().and_then(|_| cfg.check_deployment_rules()) {
        error!(errors = ?e, "configuration rejected");
        return Err(AppConfigError::Validation(e));
    }

    info!(environment = %cfg.environment, auto_migrate = cfg.auto_migrate, "configuration ready");
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn production() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "a-long-and-properly-random-settings-key-0123456789".into(),
            "production".into(),
        )
    }

    #[test]
    fn production_config_with_real_key_is_accepted() {
        let cfg = production();
        assert!(cfg.validate().is_ok());
        assert!(cfg.check_deployment_rules().is_ok());
    }

    #[test]
    fn bundled_key_only_allowed_in_development() {
        let mut cfg = production();
        cfg.settings_encryption_key = DEV_DEFAULT_SETTINGS_KEY.into();
        assert!(cfg.check_deployment_rules().is_err());

        cfg.environment = "Test".into();
        assert!(cfg.check_deployment_rules().is_ok());
    }

    #[test]
    fn short_settings_key_fails_validation() {
        let mut cfg = production();
        cfg.settings_encryption_key = "short".into();
        let errors = cfg.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("settings_encryption_key"));
    }

    #[test]
    fn pool_bounds_and_log_level_are_checked() {
        let mut cfg = production();
        cfg.database.min_connections = 20;
        cfg.database.max_connections = 4;
        assert!(cfg.check_deployment_rules().is_err());

        let mut cfg = production();
        cfg.logging.level = "loud".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn numbering_defaults_match_document_formats() {
        let numbering = NumberingConfig::default();
        assert_eq!(numbering.invoice().strategy, NumberingStrategy::YearlySequence);
        assert_eq!(numbering.quote().prefix, "QUO-");
        assert_eq!(numbering.sales_order().width, 6);
        assert_eq!(
            numbering.receipt_order().strategy,
            NumberingStrategy::MaxIdPlusOne
        );
    }

    #[test]
    fn loads_toml_file_with_nested_sections() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut file = std::fs::File::create(dir.path().join("default.toml")).unwrap();
        writeln!(
            file,
            r#"
            settings_encryption_key = "file-provided-settings-key-with-enough-length"

            [database]
            url = "sqlite::memory:"
            max_connections = 2

            [logging]
            level = "debug"

            [numbering]
            quote_prefix = "Q-"
            width = 4
            "#
        )
        .unwrap();

        let cfg = load_config_from(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.database.url, "sqlite::memory:");
        assert_eq!(cfg.database.max_connections, 2);
        assert_eq!(cfg.database.idle_timeout_secs, 600);
        assert_eq!(cfg.logging.level, "debug");
        assert!(!cfg.logging.json);
        assert_eq!(cfg.numbering.quote_prefix, "Q-");
        assert_eq!(cfg.numbering.width, 4);
        assert_eq!(cfg.numbering.invoice_prefix, "INV-");
    }
}
