use std::env;
use std::str::FromStr;

use crate::cli::Cli;
use crate::insights::config::{CongestionWeights, InsightsConfig, WindowConfig};
use crate::insights::error::ConfigError;
use crate::insights::types::parse_duration_secs;
use crate::queue::Backpressure;

pub const TESTNET_HORIZON_URL: &str = "https://horizon-testnet.stellar.org";
pub const MAINNET_HORIZON_URL: &str = "https://horizon.stellar.org";

const DEFAULT_API_PORT: u16 = 8080;
const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 5;
const DEFAULT_QUEUE_CAPACITY: usize = 256;
const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000";

/// Fully resolved service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub horizon_url: String,
    pub api_port: u16,
    pub poll_interval_seconds: u64,
    pub allowed_origins: Vec<String>,
    pub insights: InsightsConfig,
    pub queue_capacity: usize,
    pub backpressure: Backpressure,
}

impl Config {
    /// Build from CLI flags and the process environment (CLI wins).
    pub fn from_sources(cli: &Cli) -> Result<Self, ConfigError> {
        Self::resolve(cli, |key| env::var(key).ok())
    }

    /// Build from CLI flags and an arbitrary key lookup standing in for the environment.
    pub fn resolve<F>(cli: &Cli, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let setting = |flag: &Option<String>, key: &str| flag.clone().or_else(|| lookup(key));

        let horizon_url = match setting(&cli.horizon_url, "HORIZON_URL") {
            Some(url) => url,
            None => network_url(setting(&cli.network, "STELLAR_NETWORK").as_deref())?,
        };

        let api_port = match cli.api_port {
            Some(port) => port,
            None => parse_or("API_PORT", lookup("API_PORT"), DEFAULT_API_PORT)?,
        };

        let poll_interval_seconds = match cli.poll_interval_seconds {
            Some(secs) => secs,
            None => parse_or(
                "POLL_INTERVAL_SECONDS",
                lookup("POLL_INTERVAL_SECONDS"),
                DEFAULT_POLL_INTERVAL_SECONDS,
            )?,
        };
        if poll_interval_seconds == 0 {
            return Err(invalid("POLL_INTERVAL_SECONDS", "must be at least 1"));
        }

        let allowed_origins = split_list(
            &setting(&cli.allowed_origins, "ALLOWED_ORIGINS")
                .unwrap_or_else(|| DEFAULT_ALLOWED_ORIGINS.to_string()),
        );

        let mut insights = InsightsConfig::default();

        if let Some(raw) = setting(&cli.windows, "FEE_WINDOWS") {
            insights.windows = split_list(&raw)
                .iter()
                .map(|w| w.parse::<WindowConfig>())
                .collect::<Result<_, _>>()
                .map_err(|e| invalid("FEE_WINDOWS", &e))?;
        }

        if let Some(raw) = setting(&cli.percentiles, "PERCENTILE_TARGETS") {
            insights.percentile_targets = split_list(&raw)
                .iter()
                .map(|p| parse_value::<f64>("PERCENTILE_TARGETS", p))
                .collect::<Result<_, _>>()?;
        }

        if let Some(raw) = setting(&cli.late_tolerance, "LATE_ARRIVAL_TOLERANCE") {
            insights.late_arrival_tolerance_secs =
                parse_duration_secs(&raw).map_err(|e| invalid("LATE_ARRIVAL_TOLERANCE", &e))?;
        }

        if let Some(raw) = setting(&cli.congestion_weights, "CONGESTION_WEIGHTS") {
            insights.congestion_weights = parse_weights(&raw)?;
        }

        if let Some(include) = bool_setting(cli.include_failed, "INCLUDE_FAILED_TRANSACTIONS", &lookup)? {
            insights.include_failed_transactions = include;
        }

        if let Some(in_stats) = bool_setting(cli.failed_in_fee_stats, "FAILED_IN_FEE_STATS", &lookup)? {
            insights.failed_in_fee_stats = in_stats;
        }

        insights.reorder_capacity = match cli.reorder_capacity {
            Some(capacity) => capacity,
            None => parse_or("REORDER_CAPACITY", lookup("REORDER_CAPACITY"), 0)?,
        };

        if let Some(raw) = setting(&cli.publish_policy, "PUBLISH_POLICY") {
            insights.publish_policy = raw.parse().map_err(|e: String| invalid("PUBLISH_POLICY", &e))?;
        }

        let queue_capacity = match cli.queue_capacity {
            Some(capacity) => capacity,
            None => parse_or("QUEUE_CAPACITY", lookup("QUEUE_CAPACITY"), DEFAULT_QUEUE_CAPACITY)?,
        };
        if queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }

        let backpressure = match setting(&cli.backpressure, "BACKPRESSURE") {
            Some(raw) => raw
                .parse::<Backpressure>()
                .map_err(|e| invalid("BACKPRESSURE", &e))?,
            None => Backpressure::default(),
        };

        insights.validate()?;

        Ok(Self {
            horizon_url,
            api_port,
            poll_interval_seconds,
            allowed_origins,
            insights,
            queue_capacity,
            backpressure,
        })
    }
}

fn network_url(network: Option<&str>) -> Result<String, ConfigError> {
    match network.map(|n| n.trim().to_ascii_lowercase()).as_deref() {
        None | Some("testnet") => Ok(TESTNET_HORIZON_URL.to_string()),
        Some("mainnet") | Some("public") => Ok(MAINNET_HORIZON_URL.to_string()),
        Some(other) => Err(invalid(
            "STELLAR_NETWORK",
            &format!("unknown network {:?} (expected testnet or mainnet)", other),
        )),
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| invalid(key, &format!("cannot parse {:?}", raw)))
}

fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(invalid(key, &format!("expected true or false, got {:?}", raw))),
    }
}

fn bool_setting<F>(flag: Option<bool>, key: &str, lookup: &F) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match flag {
        Some(value) => Ok(Some(value)),
        None => lookup(key).map(|raw| parse_bool(key, &raw)).transpose(),
    }
}

fn parse_weights(raw: &str) -> Result<CongestionWeights, ConfigError> {
    let parts = split_list(raw);
    match parts.as_slice() {
        [w1, w2] => Ok(CongestionWeights {
            fee_premium: parse_value("CONGESTION_WEIGHTS", w1)?,
            fill_ratio: parse_value("CONGESTION_WEIGHTS", w2)?,
        }),
        _ => Err(invalid(
            "CONGESTION_WEIGHTS",
            "expected two comma-separated weights",
        )),
    }
}
