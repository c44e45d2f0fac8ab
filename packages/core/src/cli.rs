use clap::Parser;

/// Command-line flags. Every flag overrides the matching environment variable.
#[derive(Debug, Default, Parser)]
#[command(
    name = "stellar-fee-tracker",
    version,
    about = "Rolling fee insights for the Stellar network"
)]
pub struct Cli {
    /// Stellar network to track: testnet or mainnet
    #[arg(long)]
    pub network: Option<String>,

    /// Horizon base URL; takes precedence over --network
    #[arg(long)]
    pub horizon_url: Option<String>,

    /// Port for the query API
    #[arg(long)]
    pub api_port: Option<u16>,

    /// Seconds between Horizon polls
    #[arg(long)]
    pub poll_interval_seconds: Option<u64>,

    /// Comma-separated origins allowed by CORS
    #[arg(long)]
    pub allowed_origins: Option<String>,

    /// Windows as WINDOW[:GRANULARITY[:RETENTION]], comma separated (e.g. 1m:5s,1h:5m)
    #[arg(long)]
    pub windows: Option<String>,

    /// Percentile targets, comma separated (e.g. 50,90,99)
    #[arg(long)]
    pub percentiles: Option<String>,

    /// How far behind the newest ledger a bucket stays open (e.g. 10s)
    #[arg(long)]
    pub late_tolerance: Option<String>,

    /// Congestion weights as FEE_PREMIUM,FILL_RATIO
    #[arg(long)]
    pub congestion_weights: Option<String>,

    /// Emit records for failed transactions
    #[arg(long)]
    pub include_failed: Option<bool>,

    /// Let failed transactions contribute to fee statistics
    #[arg(long)]
    pub failed_in_fee_stats: Option<bool>,

    /// Out-of-order ledgers held back awaiting a missing sequence
    #[arg(long)]
    pub reorder_capacity: Option<usize>,

    /// bucket-close or every-ledger
    #[arg(long)]
    pub publish_policy: Option<String>,

    /// Ledger events buffered between poller and aggregator
    #[arg(long)]
    pub queue_capacity: Option<usize>,

    /// block or drop-oldest
    #[arg(long)]
    pub backpressure: Option<String>,
}
