//! Environment-driven configuration.

use chrono::{FixedOffset, Offset, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::services::approval::AutoApprovalRules;
use crate::services::orders::{Identity, Role};
use crate::services::pricing::PricingConfig;

const DEFAULT_PORT: u16 = 8083;
const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_SUBJECT_PREFIX: &str = "orders";
/// India Standard Time.
const DEFAULT_TZ_OFFSET_MINUTES: i32 = 330;
const DEFAULT_DAILY_BASE: u32 = 5000;
const DEFAULT_SCAN_WINDOW: usize = 50;
const DEFAULT_NOTIFICATION_TIMEOUT_MS: u64 = 3000;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderIdConfig {
    /// Calendar used by the daily sequence.
    pub offset: FixedOffset,
    pub daily_base: u32,
    pub scan_window: usize,
}

/// Bearer tokens mapped to the identity they authenticate.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ApiTokens {
    tokens: HashMap<String, Identity>,
}

impl ApiTokens {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, token: impl Into<String>, identity: Identity) -> Self {
        self.tokens.insert(token.into(), identity);
        self
    }

    /// Parses `token:subject,token:subject`. Blank entries are ignored.
    fn parse_into(&mut self, key: &str, raw: &str, role: Role) -> Result<(), ConfigError> {
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (token, subject) = entry
                .split_once(':')
                .filter(|(t, s)| !t.is_empty() && !s.is_empty())
                .ok_or_else(|| ConfigError::Invalid { key: key.to_string(), reason: "expected token:subject".to_string() })?;
            self.tokens.insert(token.to_string(), Identity::new(subject, role));
        }
        Ok(())
    }

    pub fn resolve(&self, token: &str) -> Option<&Identity> { self.tokens.get(token) }

    pub fn is_empty(&self) -> bool { self.tokens.is_empty() }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    /// Absent: run on the in-memory store.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    /// Absent: events are only logged.
    pub nats_url: Option<String>,
    pub nats_subject_prefix: String,
    pub tokens: ApiTokens,
    pub pricing: PricingConfig,
    pub order_ids: OrderIdConfig,
    pub auto_approval: AutoApprovalRules,
    pub notification_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: None,
            database_max_connections: DEFAULT_MAX_CONNECTIONS,
            nats_url: None,
            nats_subject_prefix: DEFAULT_SUBJECT_PREFIX.to_string(),
            tokens: ApiTokens::default(),
            pricing: PricingConfig::default(),
            order_ids: OrderIdConfig {
                offset: ist(),
                daily_base: DEFAULT_DAILY_BASE,
                scan_window: DEFAULT_SCAN_WINDOW,
            },
            auto_approval: AutoApprovalRules::default(),
            notification_timeout: Duration::from_millis(DEFAULT_NOTIFICATION_TIMEOUT_MS),
        }
    }
}

fn ist() -> FixedOffset {
    FixedOffset::east_opt(DEFAULT_TZ_OFFSET_MINUTES * 60).unwrap_or_else(|| Utc.fix())
}

impl AppConfig {
    /// Reads the process environment; `main` loads `.env` first.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let non_blank = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut tokens = ApiTokens::new();
        if let Some(raw) = non_blank("ADMIN_API_TOKENS") {
            tokens.parse_into("ADMIN_API_TOKENS", &raw, Role::Admin)?;
        }
        if let Some(raw) = non_blank("MACHINE_API_TOKENS") {
            tokens.parse_into("MACHINE_API_TOKENS", &raw, Role::Machine)?;
        }

        let tz_minutes: i32 = parse(&get, "ORDER_TZ_OFFSET_MINUTES", DEFAULT_TZ_OFFSET_MINUTES)?;
        let offset = FixedOffset::east_opt(tz_minutes * 60)
            .ok_or_else(|| ConfigError::Invalid { key: "ORDER_TZ_OFFSET_MINUTES".into(), reason: "offset out of range".into() })?;

        let rules = &defaults.auto_approval;
        let pricing = &defaults.pricing;
        Ok(Self {
            port: parse(&get, "PORT", defaults.port)?,
            database_url: non_blank("DATABASE_URL"),
            database_max_connections: parse(&get, "DATABASE_MAX_CONNECTIONS", defaults.database_max_connections)?,
            nats_url: non_blank("NATS_URL"),
            nats_subject_prefix: non_blank("NATS_SUBJECT_PREFIX").unwrap_or(defaults.nats_subject_prefix.clone()),
            tokens,
            pricing: PricingConfig {
                free_shipping_threshold: non_negative(&get, "FREE_SHIPPING_THRESHOLD", pricing.free_shipping_threshold)?,
                shipping_charge: non_negative(&get, "SHIPPING_CHARGE", pricing.shipping_charge)?,
                cod_charge: non_negative(&get, "COD_CHARGE", pricing.cod_charge)?,
            },
            order_ids: OrderIdConfig {
                offset,
                daily_base: parse(&get, "ORDER_ID_DAILY_BASE", DEFAULT_DAILY_BASE)?,
                scan_window: parse(&get, "ORDER_ID_SCAN_WINDOW", DEFAULT_SCAN_WINDOW)?.max(1),
            },
            auto_approval: AutoApprovalRules {
                enabled: parse(&get, "AUTO_APPROVAL_ENABLED", rules.enabled)?,
                max_order_value: non_negative(&get, "AUTO_APPROVAL_MAX_ORDER_VALUE", rules.max_order_value)?,
                min_customer_age_days: parse(&get, "AUTO_APPROVAL_MIN_CUSTOMER_AGE_DAYS", rules.min_customer_age_days)?,
                allow_new_customers: parse(&get, "AUTO_APPROVAL_ALLOW_NEW_CUSTOMERS", rules.allow_new_customers)?,
                require_dimensions: parse(&get, "AUTO_APPROVAL_REQUIRE_DIMENSIONS", rules.require_dimensions)?,
            },
            notification_timeout: Duration::from_millis(parse(&get, "NOTIFICATION_TIMEOUT_MS", DEFAULT_NOTIFICATION_TIMEOUT_MS)?),
        })
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid { key: key.to_string(), reason: e.to_string() }),
        None => Ok(default),
    }
}

fn non_negative(get: &impl Fn(&str) -> Option<String>, key: &str, default: Decimal) -> Result<Decimal, ConfigError> {
    let value: Decimal = parse(get, key, default)?;
    if value < Decimal::ZERO {
        return Err(ConfigError::Invalid { key: key.to_string(), reason: "must not be negative".to_string() });
    }
    Ok(value)
}
