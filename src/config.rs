use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

/// Ten years; keeps `chrono::Duration::days` in range.
const MAX_STALE_DAYS: i64 = 3650;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing mandatory setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Runtime settings, read once at startup and passed into every component.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub max_connection_pooling: u32,
    pub log_file: String,
    pub jwt_secret: String,
    pub user_management_url: Option<String>,
    pub identity_cache_ttl: Duration,
    pub identity_timeout: Duration,
    pub payment: PaymentConfig,
    pub geocoding: GeocodingConfig,
    pub notification_url: String,
    pub notification_language: String,
    pub notification_timeout: Duration,
    /// Upper bound on one notification, retries included.
    pub notification_deadline: Duration,
    pub storage: StorageConfig,
    pub stale_after: chrono::Duration,
    pub sweep_interval: Duration,
    /// Allowed CORS origins; `*` allows any.
    pub cors_origins: Vec<String>,
    pub rate_limit: RateLimitConfig,
}

/// Fixed-window limit applied per client to the property routes.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub service_url: String,
    pub api_key: String,
    pub amount: Decimal,
    pub currency: String,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff: Duration,
    pub auto_initiate: bool,
}

#[derive(Debug, Clone)]
pub struct GeocodingConfig {
    pub url: String,
    pub timeout: Duration,
    pub cache_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub supabase_url: String,
    pub service_key: String,
    pub bucket: String,
    pub timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    /// Builds the configuration from any key lookup; `from_env` uses the
    /// process environment merged with `.env`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| lookup(key).ok_or(ConfigError::Missing(key));
        let optional = |key: &'static str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let payment = PaymentConfig {
            service_url: required("PAYMENT_SERVICE_URL")?,
            api_key: required("PAYMENT_SERVICE_API_KEY")?,
            amount: parse("PAYMENT_AMOUNT", optional("PAYMENT_AMOUNT", "100.00"))?,
            currency: optional("PAYMENT_CURRENCY", "ETB"),
            timeout: Duration::from_secs(parse("PAYMENT_TIMEOUT_SECS", optional("PAYMENT_TIMEOUT_SECS", "10"))?),
            max_attempts: parse("PAYMENT_MAX_ATTEMPTS", optional("PAYMENT_MAX_ATTEMPTS", "4"))?,
            backoff: Duration::from_millis(parse("PAYMENT_BACKOFF_MS", optional("PAYMENT_BACKOFF_MS", "500"))?),
            auto_initiate: parse("AUTO_INITIATE_PAYMENT", optional("AUTO_INITIATE_PAYMENT", "false"))?,
        };
        if payment.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "PAYMENT_MAX_ATTEMPTS",
                value: "0".to_string(),
            });
        }

        let geocoding = GeocodingConfig {
            url: optional("GEOCODE_URL", "https://gebeta.app/api/v1/geocode"),
            timeout: Duration::from_secs(parse("GEOCODE_TIMEOUT_SECS", optional("GEOCODE_TIMEOUT_SECS", "5"))?),
            cache_ttl: Duration::from_secs(parse("GEOCODE_CACHE_TTL_SECS", optional("GEOCODE_CACHE_TTL_SECS", "3600"))?),
        };

        let storage = StorageConfig {
            supabase_url: optional("SUPABASE_URL", "http://localhost:54321"),
            service_key: optional("SUPABASE_SERVICE_KEY", ""),
            bucket: optional("BUCKET_NAME", "images"),
            timeout: Duration::from_secs(parse("STORAGE_TIMEOUT_SECS", optional("STORAGE_TIMEOUT_SECS", "30"))?),
        };

        let stale_days: i64 = parse("STALE_AFTER_DAYS", optional("STALE_AFTER_DAYS", "7"))?;
        if !(1..=MAX_STALE_DAYS).contains(&stale_days) {
            return Err(ConfigError::Invalid {
                key: "STALE_AFTER_DAYS",
                value: stale_days.to_string(),
            });
        }

        let rate_limit = RateLimitConfig {
            max_requests: parse("RATE_LIMIT_REQUESTS", optional("RATE_LIMIT_REQUESTS", "10"))?,
            window: Duration::from_secs(parse("RATE_LIMIT_WINDOW_SECS", optional("RATE_LIMIT_WINDOW_SECS", "60"))?),
        };
        if rate_limit.max_requests == 0 {
            return Err(ConfigError::Invalid {
                key: "RATE_LIMIT_REQUESTS",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            port: parse("PORT", optional("PORT", "3000"))?,
            max_connection_pooling: parse("MAX_CONNECTION_POOLING", optional("MAX_CONNECTION_POOLING", "5"))?,
            log_file: optional("LOG_FILE", "app.log"),
            jwt_secret: required("JWT_SECRET")?,
            user_management_url: lookup("USER_MANAGEMENT_URL").filter(|url| !url.is_empty()),
            identity_cache_ttl: Duration::from_secs(parse("IDENTITY_CACHE_TTL_SECS", optional("IDENTITY_CACHE_TTL_SECS", "300"))?),
            identity_timeout: Duration::from_secs(parse("IDENTITY_TIMEOUT_SECS", optional("IDENTITY_TIMEOUT_SECS", "5"))?),
            payment,
            geocoding,
            notification_url: required("NOTIFICATION_URL")?,
            notification_language: optional("NOTIFICATION_LANGUAGE", "en"),
            notification_timeout: Duration::from_secs(parse("NOTIFICATION_TIMEOUT_SECS", optional("NOTIFICATION_TIMEOUT_SECS", "5"))?),
            notification_deadline: Duration::from_secs(parse("NOTIFICATION_DEADLINE_SECS", optional("NOTIFICATION_DEADLINE_SECS", "20"))?),
            storage,
            stale_after: chrono::Duration::days(stale_days),
            sweep_interval: Duration::from_secs(parse("SWEEP_INTERVAL_SECS", optional("SWEEP_INTERVAL_SECS", "86400"))?),
            cors_origins: optional("CORS_ORIGINS", "*")
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
            rate_limit,
        })
    }
}

fn parse<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::Invalid { key, value })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn base() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("DATABASE_URL", "postgres://localhost/listings"),
            ("JWT_SECRET", "secret"),
            ("PAYMENT_SERVICE_URL", "http://payments"),
            ("PAYMENT_SERVICE_API_KEY", "key"),
            ("NOTIFICATION_URL", "http://notify"),
        ])
    }

    fn load(vars: &HashMap<&'static str, &'static str>) -> Result<Config, ConfigError> {
        Config::from_lookup(|key| vars.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn defaults_are_applied() {
        let config = load(&base()).expect("config loads");
        assert_eq!(config.port, 3000);
        assert_eq!(config.payment.amount, Decimal::new(10000, 2));
        assert_eq!(config.payment.max_attempts, 4);
        assert!(!config.payment.auto_initiate);
        assert_eq!(config.stale_after, chrono::Duration::days(7));
        assert_eq!(config.sweep_interval, Duration::from_secs(86400));
        assert_eq!(config.geocoding.cache_ttl, Duration::from_secs(3600));
        assert!(config.user_management_url.is_none());
        assert_eq!(config.notification_timeout, Duration::from_secs(5));
        assert_eq!(config.storage.timeout, Duration::from_secs(30));
        assert_eq!(config.cors_origins, vec!["*".to_string()]);
        assert_eq!(config.rate_limit.max_requests, 10);
        assert_eq!(config.rate_limit.window, Duration::from_secs(60));
    }

    #[test]
    fn stale_after_days_must_be_in_range() {
        for value in ["0", "-3", "99999999999999"] {
            let mut vars = base();
            vars.insert("STALE_AFTER_DAYS", value);
            assert!(
                matches!(load(&vars), Err(ConfigError::Invalid { key: "STALE_AFTER_DAYS", .. })),
                "{value} accepted"
            );
        }

        let mut vars = base();
        vars.insert("STALE_AFTER_DAYS", "30");
        assert_eq!(load(&vars).unwrap().stale_after, chrono::Duration::days(30));
    }

    #[test]
    fn cors_origins_are_split_on_commas() {
        let mut vars = base();
        vars.insert("CORS_ORIGINS", "https://a.example, https://b.example,");
        assert_eq!(
            load(&vars).unwrap().cors_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
    }

    #[test]
    fn missing_mandatory_key_is_reported() {
        let mut vars = base();
        vars.remove("JWT_SECRET");
        assert!(matches!(load(&vars), Err(ConfigError::Missing("JWT_SECRET"))));
    }

    #[test]
    fn malformed_number_is_rejected() {
        let mut vars = base();
        vars.insert("PORT", "eighty");
        assert!(matches!(load(&vars), Err(ConfigError::Invalid { key: "PORT", .. })));
    }

    #[test]
    fn zero_payment_attempts_is_rejected() {
        let mut vars = base();
        vars.insert("PAYMENT_MAX_ATTEMPTS", "0");
        assert!(load(&vars).is_err());
    }
}
