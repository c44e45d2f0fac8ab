//! Ledger data provider abstraction.
//!
//! The engine never talks to the network itself; anything that can hand over
//! ledger-close events in network order can feed it.

use async_trait::async_trait;

use super::error::ProviderError;
use super::types::LedgerCloseEvent;

/// Static facts about a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderMetadata {
    /// Whether ledgers older than the current tip can be requested.
    pub supports_historical: bool,
    pub max_batch_size: u32,
    pub rate_limit_per_minute: Option<u32>,
    /// Typical ledger close cadence.
    pub data_freshness_seconds: u64,
}

#[async_trait]
pub trait LedgerDataProvider: Send + Sync {
    /// Ledgers strictly after `cursor`, ascending, at most `limit`.
    ///
    /// With no cursor, returns the latest closed ledger so ingestion starts
    /// at the network tip.
    async fn fetch_ledgers_after(
        &self,
        cursor: Option<u64>,
        limit: u32,
    ) -> Result<Vec<LedgerCloseEvent>, ProviderError>;

    fn provider_name(&self) -> &str;

    async fn health_check(&self) -> Result<(), ProviderError>;

    fn get_metadata(&self) -> ProviderMetadata;
}
