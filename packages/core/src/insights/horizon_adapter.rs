//! Horizon-backed [`LedgerDataProvider`].

use async_trait::async_trait;

use super::error::ProviderError;
use super::provider::{LedgerDataProvider, ProviderMetadata};
use super::types::{LedgerCapacity, LedgerCloseEvent, LedgerTransaction};
use crate::services::horizon::{HorizonClient, HorizonLedger, HorizonTransaction, MAX_PAGE_SIZE};

pub struct HorizonLedgerProvider {
    client: HorizonClient,
}

impl HorizonLedgerProvider {
    pub fn new(client: HorizonClient) -> Self {
        Self { client }
    }

    async fn build_event(&self, ledger: HorizonLedger) -> Result<LedgerCloseEvent, ProviderError> {
        let transactions = self
            .client
            .fetch_ledger_transactions(ledger.sequence)
            .await?
            .into_iter()
            .map(convert_transaction)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(LedgerCloseEvent {
            sequence: ledger.sequence,
            close_time: ledger.closed_at,
            base_fee: ledger.base_fee_in_stroops,
            capacity: Some(LedgerCapacity {
                operation_count: ledger
                    .tx_set_operation_count
                    .unwrap_or(ledger.operation_count),
                max_operations: ledger.max_tx_set_size,
            }),
            transactions,
        })
    }
}

fn convert_transaction(tx: HorizonTransaction) -> Result<LedgerTransaction, ProviderError> {
    let fee_charged = tx
        .fee_charged
        .parse::<u64>()
        .map_err(|_| ProviderError::FormatError {
            message: format!("invalid fee_charged {:?} on {}", tx.fee_charged, tx.hash),
        })?;

    Ok(LedgerTransaction {
        hash: tx.hash,
        fee_charged,
        operation_count: tx.operation_count,
        successful: tx.successful,
    })
}

#[async_trait]
impl LedgerDataProvider for HorizonLedgerProvider {
    async fn fetch_ledgers_after(
        &self,
        cursor: Option<u64>,
        limit: u32,
    ) -> Result<Vec<LedgerCloseEvent>, ProviderError> {
        let ledgers = match cursor {
            Some(sequence) => self.client.fetch_ledgers_after(sequence, limit).await?,
            None => vec![self.client.fetch_latest_ledger().await?],
        };

        let mut events = Vec::with_capacity(ledgers.len());
        for ledger in ledgers {
            events.push(self.build_event(ledger).await?);
        }
        Ok(events)
    }

    fn provider_name(&self) -> &str {
        "Horizon"
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        self.client.fetch_fee_stats().await.map(|stats| {
            tracing::debug!(
                "Horizon healthy at ledger {} (base fee {}, capacity usage {})",
                stats.last_ledger,
                stats.last_ledger_base_fee,
                stats.ledger_capacity_usage
            );
        })
    }

    fn get_metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            supports_historical: true,
            max_batch_size: MAX_PAGE_SIZE,
            // public Horizon allows 3600 requests per hour
            rate_limit_per_minute: Some(60),
            data_freshness_seconds: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn horizon_tx(fee: &str) -> HorizonTransaction {
        HorizonTransaction {
            hash: "abc".into(),
            successful: false,
            fee_charged: fee.into(),
            operation_count: 3,
            paging_token: "1".into(),
        }
    }

    #[test]
    fn converts_horizon_transaction() {
        let tx = convert_transaction(horizon_tx("300")).unwrap();
        assert_eq!(tx.fee_charged, 300);
        assert_eq!(tx.operation_count, 3);
        assert!(!tx.successful);
    }

    #[test]
    fn malformed_fee_is_a_format_error() {
        let err = convert_transaction(horizon_tx("lots")).unwrap_err();
        assert!(matches!(err, ProviderError::FormatError { .. }));
    }

    #[test]
    fn provider_identity() {
        let provider =
            HorizonLedgerProvider::new(HorizonClient::new("http://localhost:8000".into()));
        assert_eq!(provider.provider_name(), "Horizon");
        assert!(provider.get_metadata().supports_historical);
    }
}
