//! Configuration module for billing-engine.

use chrono::NaiveTime;
use rust_decimal::Decimal;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub pricing: PricingConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// When absent the service runs on the in-memory store.
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct PricingConfig {
    /// System-wide tax percentage applied to subscriptions.
    pub subscription_tax_percentage: Decimal,
    /// Tax percentage used when a bill does not carry one.
    pub default_bill_tax_rate: Decimal,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub tick_seconds: u64,
    pub renewal_at: NaiveTime,
    pub due_soon_at: NaiveTime,
    pub overdue_at: NaiveTime,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            subscription_tax_percentage: Decimal::from(18),
            default_bill_tax_rate: Decimal::ZERO,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_seconds: 60,
            renewal_at: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default(),
            due_soon_at: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            overdue_at: NaiveTime::from_hms_opt(10, 0, 0).unwrap_or_default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            min_connections: 2,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            common: core_config::Config::default(),
            service_name: "billing-engine".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            database: DatabaseConfig::default(),
            pricing: PricingConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let scheduler_defaults = SchedulerConfig::default();
        let pricing_defaults = PricingConfig::default();

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "billing-engine".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
                max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: parse_or("DATABASE_MIN_CONNECTIONS", 2)?,
            },
            pricing: PricingConfig {
                subscription_tax_percentage: parse_or(
                    "SUBSCRIPTION_TAX_PERCENTAGE",
                    pricing_defaults.subscription_tax_percentage,
                )?,
                default_bill_tax_rate: parse_or(
                    "DEFAULT_BILL_TAX_RATE",
                    pricing_defaults.default_bill_tax_rate,
                )?,
            },
            scheduler: SchedulerConfig {
                enabled: parse_or("SCHEDULER_ENABLED", scheduler_defaults.enabled)?,
                tick_seconds: parse_or("SCHEDULER_TICK_SECONDS", scheduler_defaults.tick_seconds)?,
                renewal_at: time_or("SWEEP_RENEWAL_AT", scheduler_defaults.renewal_at)?,
                due_soon_at: time_or("SWEEP_DUE_SOON_AT", scheduler_defaults.due_soon_at)?,
                overdue_at: time_or("SWEEP_OVERDUE_AT", scheduler_defaults.overdue_at)?,
            },
        })
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            AppError::ConfigError(anyhow::anyhow!("{} has an invalid value: {}", key, raw))
        }),
        Err(_) => Ok(default),
    }
}

fn time_or(key: &str, default: NaiveTime) -> Result<NaiveTime, AppError> {
    match env::var(key) {
        Ok(raw) => NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|_| {
            AppError::ConfigError(anyhow::anyhow!("{} must be HH:MM, got {}", key, raw))
        }),
        Err(_) => Ok(default),
    }
}
