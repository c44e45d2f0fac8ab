use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::insights::error::ProviderError;
use crate::insights::types::PercentileFee;

/// Page size Horizon accepts at most.
pub const MAX_PAGE_SIZE: u32 = 200;

#[derive(Clone)]
pub struct HorizonClient {
    base_url: String,
    http: Client,
}

impl HorizonClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Debug, Deserialize)]
pub struct HorizonLedger {
    pub sequence: u64,
    pub closed_at: DateTime<Utc>,
    pub base_fee_in_stroops: u64,
    pub max_tx_set_size: u32,
    pub operation_count: u32,
    /// Absent on older Horizon versions.
    #[serde(default)]
    pub tx_set_operation_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct HorizonTransaction {
    pub hash: String,
    pub successful: bool,
    pub fee_charged: String,
    pub operation_count: u32,
    pub paging_token: String,
}

#[derive(Debug, Deserialize)]
pub struct HorizonFeeStats {
    pub last_ledger: String,
    pub last_ledger_base_fee: String,
    pub ledger_capacity_usage: String,
    pub fee_charged: FeeCharged,
}

#[derive(Debug, Deserialize)]
pub struct FeeCharged {
    pub min: String,
    pub max: String,
    pub mode: String,
    pub p10: String,
    pub p50: String,
    pub p90: String,
    pub p95: String,
    pub p99: String,
}

/// Horizon's own view of recent fees, with the string fields parsed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkFeeStats {
    pub last_ledger: u64,
    pub base_fee: u64,
    pub capacity_usage: f64,
    pub min_fee: u64,
    pub max_fee: u64,
    pub mode_fee: u64,
    pub percentiles: Vec<PercentileFee>,
}

fn parse_field<T: FromStr>(name: &str, raw: &str) -> Result<T, ProviderError> {
    raw.trim().parse().map_err(|_| ProviderError::FormatError {
        message: format!("invalid fee_stats {} {:?}", name, raw),
    })
}

impl TryFrom<HorizonFeeStats> for NetworkFeeStats {
    type Error = ProviderError;

    fn try_from(stats: HorizonFeeStats) -> Result<Self, Self::Error> {
        let charged = &stats.fee_charged;
        let percentiles = [
            (10.0, &charged.p10),
            (50.0, &charged.p50),
            (90.0, &charged.p90),
            (95.0, &charged.p95),
            (99.0, &charged.p99),
        ]
        .into_iter()
        .map(|(target, raw)| {
            Ok(PercentileFee {
                target,
                fee: parse_field("fee_charged percentile", raw)?,
            })
        })
        .collect::<Result<Vec<_>, ProviderError>>()?;

        Ok(Self {
            last_ledger: parse_field("last_ledger", &stats.last_ledger)?,
            base_fee: parse_field("last_ledger_base_fee", &stats.last_ledger_base_fee)?,
            capacity_usage: parse_field("ledger_capacity_usage", &stats.ledger_capacity_usage)?,
            min_fee: parse_field("fee_charged.min", &charged.min)?,
            max_fee: parse_field("fee_charged.max", &charged.max)?,
            mode_fee: parse_field("fee_charged.mode", &charged.mode)?,
            percentiles,
        })
    }
}

/// Source of the network-wide fee view served next to the local windows.
#[async_trait]
pub trait NetworkFeeSource: Send + Sync {
    async fn network_fee_stats(&self) -> Result<NetworkFeeStats, ProviderError>;
}

/// Wrapper for Horizon's `_embedded.records` envelope.
#[derive(Debug, Deserialize)]
struct HorizonPage<T> {
    #[serde(rename = "_embedded")]
    embedded: HorizonEmbedded<T>,
}

#[derive(Debug, Deserialize)]
struct HorizonEmbedded<T> {
    records: Vec<T>,
}

/// Horizon paging token for a ledger sequence.
pub fn ledger_paging_token(sequence: u64) -> u64 {
    sequence << 32
}

fn retry_after_secs(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

impl HorizonClient {
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ProviderError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| ProviderError::NetworkError {
                message: err.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimitExceeded {
                retry_after_secs: retry_after_secs(&response),
            });
        }
        if status == StatusCode::SERVICE_UNAVAILABLE {
            return Err(ProviderError::ServiceUnavailable);
        }
        if !status.is_success() {
            return Err(ProviderError::NetworkError {
                message: format!("Horizon returned HTTP {}", status),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|err| ProviderError::FormatError {
                message: err.to_string(),
            })
    }

    pub async fn fetch_fee_stats(&self) -> Result<HorizonFeeStats, ProviderError> {
        let url = format!("{}/fee_stats", self.base_url);
        self.get_json(&url).await
    }

    /// The most recently closed ledger.
    pub async fn fetch_latest_ledger(&self) -> Result<HorizonLedger, ProviderError> {
        let url = format!("{}/ledgers?order=desc&limit=1", self.base_url);
        let page: HorizonPage<HorizonLedger> = self.get_json(&url).await?;
        page.embedded
            .records
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::FormatError {
                message: "Horizon returned empty ledger records".into(),
            })
    }

    /// Ledgers after `sequence`, ascending.
    pub async fn fetch_ledgers_after(
        &self,
        sequence: u64,
        limit: u32,
    ) -> Result<Vec<HorizonLedger>, ProviderError> {
        let url = format!(
            "{}/ledgers?order=asc&cursor={}&limit={}",
            self.base_url,
            ledger_paging_token(sequence),
            limit.clamp(1, MAX_PAGE_SIZE)
        );
        let page: HorizonPage<HorizonLedger> = self.get_json(&url).await?;
        Ok(page.embedded.records)
    }

    /// Every transaction in a ledger, failed ones included, in apply order.
    pub async fn fetch_ledger_transactions(
        &self,
        sequence: u64,
    ) -> Result<Vec<HorizonTransaction>, ProviderError> {
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut url = format!(
                "{}/ledgers/{}/transactions?order=asc&include_failed=true&limit={}",
                self.base_url, sequence, MAX_PAGE_SIZE
            );
            if let Some(c) = &cursor {
                url.push_str(&format!("&cursor={}", c));
            }

            let page: HorizonPage<HorizonTransaction> = self.get_json(&url).await?;
            let records = page.embedded.records;
            let full_page = records.len() as u32 == MAX_PAGE_SIZE;
            cursor = records.last().map(|r| r.paging_token.clone());
            all.extend(records);

            if !full_page {
                return Ok(all);
            }
        }
    }
}

#[async_trait]
impl NetworkFeeSource for HorizonClient {
    async fn network_fee_stats(&self) -> Result<NetworkFeeStats, ProviderError> {
        self.fetch_fee_stats().await?.try_into()
    }
}
