//! # Unified Application Configuration
//!
//! All settings are read from environment variables (a `.env` file is loaded
//! by `main` through `dotenvy`), grouped into per-component sections and
//! validated once at startup. Only a missing credential or an invalid value is
//! fatal; everything else has a default.

use crate::errors::{AppError, AppResult};
use crate::observability_config::ObservabilityConfig;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Bot-specific configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Telegram bot token
    pub token: String,
    /// HTTP client timeout for Telegram API calls in seconds
    pub http_timeout_secs: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            http_timeout_secs: 30,
        }
    }
}

impl BotConfig {
    /// Validate bot configuration
    pub fn validate(&self) -> AppResult<()> {
        if self.token.trim().is_empty() {
            return Err(AppError::Config("Bot token cannot be empty".to_string()));
        }

        let parts: Vec<&str> = self.token.split(':').collect();
        if parts.len() != 2 {
            return Err(AppError::Config(
                "Bot token format is invalid. Expected format: 'bot_id:bot_token'".to_string(),
            ));
        }

        if parts[0].parse::<u64>().is_err() {
            return Err(AppError::Config("Bot token bot ID must be numeric".to_string()));
        }

        if parts[1].len() < 20 {
            return Err(AppError::Config(
                "Bot token appears to be too short. Please verify it's a valid token".to_string(),
            ));
        }

        if self.http_timeout_secs == 0 || self.http_timeout_secs > 300 {
            return Err(AppError::Config(
                "HTTP timeout must be between 1 and 300 seconds".to_string(),
            ));
        }

        Ok(())
    }
}

/// Database configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Minimum number of idle connections
    pub min_connections: u32,
    /// Maximum time a connection can be idle in seconds
    pub idle_timeout_secs: Option<u64>,
    /// Extra startup attempts when the database is not reachable yet
    pub connect_retries: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 5,
            connect_timeout_secs: 30,
            min_connections: 1,
            idle_timeout_secs: Some(600),
            connect_retries: 5,
        }
    }
}

impl DatabaseConfig {
    /// Backoff for connecting and migrating at startup
    pub fn connect_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.connect_retries,
            base_delay_ms: 2000,
            max_delay_ms: 30_000,
        }
    }

    /// Validate database configuration
    pub fn validate(&self) -> AppResult<()> {
        if self.url.trim().is_empty() {
            return Err(AppError::Config("Database URL cannot be empty".to_string()));
        }

        if !self.url.starts_with("postgresql://") && !self.url.starts_with("postgres://") {
            return Err(AppError::Config(
                "Database URL must start with 'postgresql://' or 'postgres://'".to_string(),
            ));
        }

        if self.max_connections == 0 || self.max_connections > 100 {
            return Err(AppError::Config(
                "Max connections must be between 1 and 100".to_string(),
            ));
        }

        if self.connect_timeout_secs == 0 || self.connect_timeout_secs > 300 {
            return Err(AppError::Config(
                "Connect timeout must be between 1 and 300 seconds".to_string(),
            ));
        }

        if self.min_connections > self.max_connections {
            return Err(AppError::Config(
                "Min connections cannot be greater than max connections".to_string(),
            ));
        }

        if self.connect_retries > 20 {
            return Err(AppError::Config(
                "Database connect retries cannot be greater than 20".to_string(),
            ));
        }

        Ok(())
    }
}

/// Page fetcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Minimum spacing between outgoing requests in milliseconds
    pub min_request_interval_ms: u64,
    /// Consecutive failures before the circuit opens
    pub circuit_failure_threshold: u32,
    /// Seconds the circuit stays open before a trial request
    pub circuit_reset_secs: u64,
    /// How long a fetched page is reused for the same URL, 0 disables caching
    pub cache_ttl_secs: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            max_retries: 2,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 8000,
            min_request_interval_ms: 2000,
            circuit_failure_threshold: 5,
            circuit_reset_secs: 120,
            cache_ttl_secs: 120,
        }
    }
}

impl FetcherConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay_ms: self.retry_base_delay_ms,
            max_delay_ms: self.retry_max_delay_ms,
        }
    }

    /// Validate fetcher configuration
    pub fn validate(&self) -> AppResult<()> {
        if self.timeout_secs == 0 || self.timeout_secs > 120 {
            return Err(AppError::Config(
                "Fetch timeout must be between 1 and 120 seconds".to_string(),
            ));
        }

        if self.max_retries > 10 {
            return Err(AppError::Config(
                "Fetch max retries cannot be greater than 10".to_string(),
            ));
        }

        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(AppError::Config(
                "Retry base delay cannot be greater than retry max delay".to_string(),
            ));
        }

        if self.circuit_failure_threshold == 0 {
            return Err(AppError::Config(
                "Circuit breaker failure threshold cannot be 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Poll scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between the start of two poll cycles
    pub poll_interval_secs: u64,
    /// Delay before the first cycle after startup
    pub initial_delay_secs: u64,
    /// Upper bound on products checked per cycle
    pub max_products_per_run: usize,
    /// Minimum price drop, in percent, that triggers an alert
    pub price_drop_threshold_percent: f64,
    /// Alert when an in-stock product sells out
    pub notify_out_of_stock: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 300,
            initial_delay_secs: 10,
            max_products_per_run: 50,
            price_drop_threshold_percent: 5.0,
            notify_out_of_stock: true,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    /// Validate scheduler configuration
    pub fn validate(&self) -> AppResult<()> {
        if self.poll_interval_secs < 10 {
            return Err(AppError::Config(
                "Poll interval must be at least 10 seconds".to_string(),
            ));
        }

        if self.max_products_per_run == 0 {
            return Err(AppError::Config(
                "Max products per run cannot be 0".to_string(),
            ));
        }

        if !(0.0..=100.0).contains(&self.price_drop_threshold_percent) {
            return Err(AppError::Config(
                "Price drop threshold must be between 0 and 100 percent".to_string(),
            ));
        }

        Ok(())
    }
}

/// Per-user command rate limit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 5,
            window_secs: 60,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Validate rate limit configuration
    pub fn validate(&self) -> AppResult<()> {
        if self.max_requests == 0 {
            return Err(AppError::Config("Rate limit max requests cannot be 0".to_string()));
        }
        if self.window_secs == 0 {
            return Err(AppError::Config("Rate limit window cannot be 0".to_string()));
        }
        Ok(())
    }
}

/// Server configuration for health checks and metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port of the health and metrics server
    pub health_port: u16,
    /// Whether to allow privileged ports (< 1024)
    pub allow_privileged_ports: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            health_port: 8080,
            allow_privileged_ports: false,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> AppResult<()> {
        if self.health_port == 0 {
            return Err(AppError::Config("Health port cannot be 0".to_string()));
        }

        if !self.allow_privileged_ports && self.health_port < 1024 {
            return Err(AppError::Config(format!(
                "Health port {} is privileged. Set ALLOW_PRIVILEGED_PORTS=true or use port >= 1024",
                self.health_port
            )));
        }

        Ok(())
    }
}

/// Unified application configuration
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub database: DatabaseConfig,
    pub fetcher: FetcherConfig,
    pub scheduler: SchedulerConfig,
    pub rate_limit: RateLimitConfig,
    pub server: ServerConfig,
    pub observability: ObservabilityConfig,
}

/// Parse an optional variable, keeping `default` when it is unset
fn parse_var<T, F>(lookup: &F, key: &str, default: T) -> AppResult<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{} must be a valid value, got '{}'", key, raw))),
        None => Ok(default),
    }
}

fn parse_flag<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| matches!(raw.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        .unwrap_or(default)
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| env::var(key).ok().filter(|v| !v.is_empty()))
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        config.bot.token = lookup("BOT_TOKEN")
            .or_else(|| lookup("TELEGRAM_BOT_TOKEN"))
            .ok_or_else(|| {
                AppError::Config("BOT_TOKEN environment variable is required".to_string())
            })?;
        config.bot.http_timeout_secs =
            parse_var(&lookup, "HTTP_CLIENT_TIMEOUT_SECS", config.bot.http_timeout_secs)?;

        config.database.url = lookup("DATABASE_URL").ok_or_else(|| {
            AppError::Config("DATABASE_URL environment variable is required".to_string())
        })?;
        config.database.max_connections =
            parse_var(&lookup, "DATABASE_MAX_CONNECTIONS", config.database.max_connections)?;
        config.database.min_connections =
            parse_var(&lookup, "DATABASE_MIN_CONNECTIONS", config.database.min_connections)?;
        config.database.connect_timeout_secs = parse_var(
            &lookup,
            "DATABASE_CONNECT_TIMEOUT_SECS",
            config.database.connect_timeout_secs,
        )?;
        config.database.connect_retries =
            parse_var(&lookup, "DATABASE_CONNECT_RETRIES", config.database.connect_retries)?;

        config.fetcher.timeout_secs =
            parse_var(&lookup, "FETCH_TIMEOUT_SECS", config.fetcher.timeout_secs)?;
        config.fetcher.max_retries =
            parse_var(&lookup, "FETCH_MAX_RETRIES", config.fetcher.max_retries)?;
        config.fetcher.min_request_interval_ms = parse_var(
            &lookup,
            "FETCH_MIN_INTERVAL_MS",
            config.fetcher.min_request_interval_ms,
        )?;
        config.fetcher.cache_ttl_secs =
            parse_var(&lookup, "FETCH_CACHE_TTL_SECS", config.fetcher.cache_ttl_secs)?;

        config.scheduler.poll_interval_secs =
            parse_var(&lookup, "POLL_INTERVAL_SECS", config.scheduler.poll_interval_secs)?;
        config.scheduler.max_products_per_run = parse_var(
            &lookup,
            "MAX_PRODUCTS_PER_RUN",
            config.scheduler.max_products_per_run,
        )?;
        config.scheduler.price_drop_threshold_percent = parse_var(
            &lookup,
            "PRICE_DROP_THRESHOLD_PERCENT",
            config.scheduler.price_drop_threshold_percent,
        )?;
        config.scheduler.notify_out_of_stock = parse_flag(
            &lookup,
            "NOTIFY_OUT_OF_STOCK",
            config.scheduler.notify_out_of_stock,
        );

        config.rate_limit.max_requests =
            parse_var(&lookup, "RATE_LIMIT_MAX_REQUESTS", config.rate_limit.max_requests)?;
        config.rate_limit.window_secs =
            parse_var(&lookup, "RATE_LIMIT_WINDOW_SECS", config.rate_limit.window_secs)?;

        config.server.health_port = parse_var(&lookup, "PORT", config.server.health_port)?;
        config.server.allow_privileged_ports =
            parse_flag(&lookup, "ALLOW_PRIVILEGED_PORTS", false);

        config.observability = ObservabilityConfig::from_lookup(&lookup);

        Ok(config)
    }

    /// Validate all configuration sections
    pub fn validate(&self) -> AppResult<()> {
        self.bot.validate()?;
        self.database.validate()?;
        self.fetcher.validate()?;
        self.scheduler.validate()?;
        self.rate_limit.validate()?;
        self.server.validate()?;
        self.observability.validate().map_err(AppError::Config)?;

        // a page cached for a whole poll interval would hide the next cycle's change
        if self.fetcher.cache_ttl_secs >= self.scheduler.poll_interval_secs {
            return Err(AppError::Config(
                "Fetch cache TTL must be shorter than the poll interval".to_string(),
            ));
        }
        Ok(())
    }

    /// Get a summary of the current configuration for logging
    pub fn summary(&self) -> String {
        format!(
            "Configuration: bot_token=[REDACTED], db_url=[REDACTED], poll_interval={}s, max_products_per_run={}, fetch_timeout={}s, health_port={}, environment={}",
            self.scheduler.poll_interval_secs,
            self.scheduler.max_products_per_run,
            self.fetcher.timeout_secs,
            self.server.health_port,
            self.observability.environment
        )
    }
}
