//! Environment-driven configuration.

use std::str::FromStr;
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub port: u16,
    pub nats_url: Option<String>,
    pub stripe: StripeConfig,
    pub store_currency: String,
    pub refund_max_age_days: i64,
    pub notify_max_attempts: u32,
    /// Where staff-facing alerts (failed refunds) are addressed.
    pub staff_email: Option<String>,
}

#[derive(Clone, Debug)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base: String,
    pub webhook_tolerance_secs: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &'static str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));
        let or = |key: &'static str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            db_max_connections: parse("DB_MAX_CONNECTIONS", or("DB_MAX_CONNECTIONS", "10"))?,
            port: parse("PORT", or("PORT", "8083"))?,
            nats_url: get("NATS_URL"),
            stripe: StripeConfig {
                secret_key: required("STRIPE_SECRET_KEY")?,
                webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
                api_base: or("STRIPE_API_BASE", "https://api.stripe.com"),
                webhook_tolerance_secs: parse("WEBHOOK_TOLERANCE_SECS", or("WEBHOOK_TOLERANCE_SECS", "300"))?,
            },
            store_currency: or("STORE_CURRENCY", "USD").to_uppercase(),
            refund_max_age_days: parse("REFUND_MAX_AGE_DAYS", or("REFUND_MAX_AGE_DAYS", "180"))?,
            notify_max_attempts: parse::<u32>("NOTIFY_MAX_ATTEMPTS", or("NOTIFY_MAX_ATTEMPTS", "3"))?.max(1),
            staff_email: get("STAFF_EMAIL"),
        })
    }
}

fn parse<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid { key, value })
}
