//! Fee Insights Module
//!
//! Turns a stream of ledger-close events into rolling, per-window fee
//! snapshots: extraction, bucketing, percentile estimation and congestion
//! scoring.

pub mod bucket;
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod histogram;
pub mod horizon_adapter;
pub mod provider;
pub mod types;
pub mod window;

#[cfg(test)]
mod tests;

pub use engine::FeeInsightsEngine;
pub use horizon_adapter::HorizonLedgerProvider;
pub use provider::LedgerDataProvider;
