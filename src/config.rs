//! Configuration management for the ARL engine
//!
//! Provides strongly-typed configuration with validation, environment variable parsing,
//! and sensible defaults. A `.env` file in the working directory is loaded first.
//!
//! # Example
//! ```no_run
//! use arl::Config;
//! let config = Config::from_env().expect("failed to load config");
//! println!("Events: {}", config.data.events_path.display());
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::error::{Error, Result};
use crate::loader::parse_delimiter;
use crate::mining::{
    BasketGranularity, Item, MalformedRecordPolicy, RuleFilter, RuleMetric,
};
use crate::pipeline::MiningConfig;

/// Recommendations returned when no count is given
pub const DEFAULT_QUERY_COUNT: usize = 4;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Input and output files
    pub data: DataConfig,
    /// Thresholds and basket grouping
    pub mining: MiningConfig,
    /// One-shot recommendation query
    pub query: QueryConfig,
    /// API server configuration
    pub api: ApiConfig,
}

/// Input and output files
#[derive(Debug, Clone)]
pub struct DataConfig {
    /// CSV file with the interaction log
    pub events_path: PathBuf,
    /// CSV field delimiter
    pub delimiter: u8,
    /// Where to write the rule set as JSON, if anywhere
    pub rules_output: Option<PathBuf>,
}

/// One-shot recommendation query run after mining
#[derive(Debug, Clone)]
pub struct QueryConfig {
    pub item: Option<Item>,
    pub count: usize,
}

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Serve the mined model over HTTP after the run
    pub enabled: bool,
    /// Port to listen on
    pub port: u16,
    /// Host to bind to
    pub host: String,
    /// Request timeout
    pub request_timeout: Duration,
    /// Prometheus exporter listen address
    pub metrics_addr: String,
}

impl ApiConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8080,
            host: "0.0.0.0".to_string(),
            request_timeout: Duration::from_secs(30),
            metrics_addr: "0.0.0.0:9000".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Try to load .env file (ignore if not found)
        dotenvy::dotenv().ok();

        let config = Self {
            data: DataConfig::from_env()?,
            mining: mining_from_env()?,
            query: QueryConfig::from_env()?,
            api: ApiConfig::from_env()?,
        };

        config.validate()?;
        config.log_summary();

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.mining.validate()?;

        if self.data.events_path.as_os_str().is_empty() {
            return Err(Error::InvalidConfig {
                key: "ARL_EVENTS_PATH",
                message: "events path cannot be empty".into(),
            });
        }

        if self.api.enabled && self.api.port == 0 {
            return Err(Error::InvalidConfig {
                key: "ARL_API_PORT",
                message: "port must be non-zero when the API is enabled".into(),
            });
        }

        Ok(())
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        info!("Configuration loaded:");
        info!("  Data:");
        info!("    Events: {}", self.data.events_path.display());
        info!("    Delimiter: {:?}", self.data.delimiter as char);
        if let Some(out) = &self.data.rules_output {
            info!("    Rules output: {}", out.display());
        }
        info!("  Mining:");
        info!("    Min support: {}", self.mining.min_support);
        info!(
            "    Rule filter: {} >= {}",
            self.mining.rule_filter.metric, self.mining.rule_filter.threshold
        );
        match self.mining.max_itemset_len {
            Some(max) => info!("    Max itemset length: {}", max),
            None => info!("    Max itemset length: unbounded"),
        }
        info!("    Granularity: {}", self.mining.granularity);
        info!("    Malformed records: {}", self.mining.malformed_policy);
        if let Some(item) = &self.query.item {
            info!("  Query: {} (count {})", item, self.query.count);
        }
        info!("  API:");
        info!("    Enabled: {}", self.api.enabled);
        if self.api.enabled {
            info!("    Listening on: {}", self.api.bind_addr());
        }
    }
}

impl DataConfig {
    fn from_env() -> Result<Self> {
        Ok(Self {
            events_path: PathBuf::from(get_env("ARL_EVENTS_PATH")?),
            delimiter: parse_delimiter(&get_env_or("ARL_CSV_DELIMITER", ","))?,
            rules_output: get_env_opt("ARL_RULES_OUTPUT").map(PathBuf::from),
        })
    }
}

fn mining_from_env() -> Result<MiningConfig> {
    let metric: RuleMetric = parse_or("ARL_RULE_METRIC", "support")?;
    let threshold: f64 = get_env_parsed("ARL_RULE_THRESHOLD")?;

    Ok(MiningConfig {
        min_support: get_env_parsed("ARL_MIN_SUPPORT")?,
        max_itemset_len: get_env_parsed_opt("ARL_MAX_ITEMSET_LEN")?,
        rule_filter: RuleFilter::new(metric, threshold),
        granularity: parse_or::<BasketGranularity>("ARL_BASKET_GRANULARITY", "month")?,
        malformed_policy: parse_or::<MalformedRecordPolicy>("ARL_MALFORMED_POLICY", "skip")?,
    })
}

impl QueryConfig {
    fn from_env() -> Result<Self> {
        Ok(Self {
            item: get_env_parsed_opt("ARL_QUERY_ITEM")?,
            count: parse_or("ARL_QUERY_COUNT", &DEFAULT_QUERY_COUNT.to_string())?,
        })
    }
}

impl ApiConfig {
    fn from_env() -> Result<Self> {
        Ok(Self {
            enabled: parse_or("ARL_API_ENABLED", "false")?,
            port: parse_or("ARL_API_PORT", "8080")?,
            host: get_env_or("ARL_API_HOST", "0.0.0.0"),
            request_timeout: Duration::from_secs(parse_or("ARL_API_TIMEOUT_SECS", "30")?),
            metrics_addr: get_env_or("ARL_METRICS_ADDR", "0.0.0.0:9000"),
        })
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Get required environment variable
fn get_env(key: &'static str) -> Result<String> {
    std::env::var(key).map_err(|_| Error::MissingEnvVar { var: key })
}

/// Get environment variable with default
fn get_env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get optional environment variable, treating blank as unset
fn get_env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Get and parse environment variable
fn get_env_parsed<T: FromStr>(key: &'static str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    let value = get_env(key)?;
    parse_value(key, &value)
}

/// Parse an optional environment variable
fn get_env_parsed_opt<T: FromStr>(key: &'static str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    get_env_opt(key)
        .map(|value| parse_value(key, &value))
        .transpose()
}

/// Parse an environment variable, falling back to `default` when unset.
/// A set but unparseable value is an error rather than a silent default.
fn parse_or<T: FromStr>(key: &'static str, default: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    let value = get_env_opt(key).unwrap_or_else(|| default.to_string());
    parse_value(key, &value)
}

fn parse_value<T: FromStr>(key: &'static str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| Error::InvalidConfig {
        key,
        message: format!("Invalid value '{}': {}", value, e).into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value_errors_name_the_key() {
        let err = parse_value::<f64>("ARL_MIN_SUPPORT", "lots").unwrap_err();
        match err {
            Error::InvalidConfig { key, message } => {
                assert_eq!(key, "ARL_MIN_SUPPORT");
                assert!(message.contains("lots"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_value_domain_types() {
        let metric: RuleMetric = parse_value("ARL_RULE_METRIC", "lift").unwrap();
        assert_eq!(metric, RuleMetric::Lift);
        let policy: MalformedRecordPolicy = parse_value("ARL_MALFORMED_POLICY", " fail ").unwrap();
        assert_eq!(policy, MalformedRecordPolicy::Fail);
        let item: Item = parse_value("ARL_QUERY_ITEM", "s1_c1").unwrap();
        assert_eq!(item, Item::new("s1", "c1"));
        assert!(parse_value::<BasketGranularity>("ARL_BASKET_GRANULARITY", "fortnight").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_thresholds() {
        let config = Config {
            data: DataConfig {
                events_path: PathBuf::from("events.csv"),
                delimiter: b',',
                rules_output: None,
            },
            mining: MiningConfig::new(1.5, RuleFilter::support(0.01)),
            query: QueryConfig {
                item: None,
                count: DEFAULT_QUERY_COUNT,
            },
            api: ApiConfig::default(),
        };
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidThreshold { name: "min_support", .. })
        ));

        let config = Config {
            mining: MiningConfig::new(0.1, RuleFilter::lift(f64::INFINITY)),
            ..config
        };
        assert!(config.validate().is_err());

        let config = Config {
            mining: MiningConfig::new(0.1, RuleFilter::lift(1.0)),
            ..config
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_set_but_invalid_values_are_errors() {
        std::env::set_var("ARL_TEST_API_PORT", "eighty");
        let err = parse_or::<u16>("ARL_TEST_API_PORT", "8080").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { key: "ARL_TEST_API_PORT", .. }));
        std::env::remove_var("ARL_TEST_API_PORT");

        assert_eq!(parse_or::<u64>("ARL_TEST_API_TIMEOUT_SECS", "30").unwrap(), 30);
    }

    #[test]
    fn test_missing_required_var() {
        let err = get_env("ARL_TEST_NEVER_SET").unwrap_err();
        assert!(matches!(err, Error::MissingEnvVar { var: "ARL_TEST_NEVER_SET" }));
    }

    #[test]
    fn test_api_bind_addr() {
        let api = ApiConfig {
            host: "127.0.0.1".to_string(),
            port: 3000,
            ..ApiConfig::default()
        };
        assert_eq!(api.bind_addr(), "127.0.0.1:3000");
    }
}
