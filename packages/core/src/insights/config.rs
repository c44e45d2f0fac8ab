//! Aggregation settings and their startup validation.

use std::str::FromStr;

use super::error::ConfigError;
use super::types::{parse_duration_secs, WindowId};

/// One reporting window: its span, bucket size, and how many buckets to keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowConfig {
    pub duration_secs: u64,
    pub granularity_secs: u64,
    pub retention: usize,
}

impl WindowConfig {
    /// Window whose retention exactly covers its span.
    pub fn new(duration_secs: u64, granularity_secs: u64) -> Self {
        let retention = if granularity_secs == 0 {
            0
        } else {
            (duration_secs / granularity_secs) as usize
        };
        Self {
            duration_secs,
            granularity_secs,
            retention,
        }
    }

    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    pub fn id(&self) -> WindowId {
        WindowId::from_secs(self.duration_secs)
    }

    /// Buckets covered by one window span.
    pub fn buckets_per_window(&self) -> usize {
        (self.duration_secs / self.granularity_secs.max(1)) as usize
    }

    pub fn retention_span_secs(&self) -> u64 {
        self.granularity_secs.saturating_mul(self.retention as u64)
    }
}

/// Parses `WINDOW[:GRANULARITY[:RETENTION]]`, e.g. `5m`, `5m:30s`, `1h:5m:24`.
///
/// A bare window gets twelve buckets.
impl FromStr for WindowConfig {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split(':');
        let duration_secs = parse_duration_secs(parts.next().unwrap_or_default())?;
        let granularity_secs = match parts.next() {
            Some(g) => parse_duration_secs(g)?,
            None => duration_secs / 12,
        };
        let mut window = WindowConfig::new(duration_secs, granularity_secs);
        if let Some(r) = parts.next() {
            let retention = r
                .trim()
                .parse()
                .map_err(|_| format!("invalid retention count: {}", r))?;
            window = window.with_retention(retention);
        }
        if parts.next().is_some() {
            return Err(format!("too many fields in window spec: {}", s));
        }
        Ok(window)
    }
}

/// Weights for the fee-premium and ledger-fill terms of the congestion score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CongestionWeights {
    pub fee_premium: f64,
    pub fill_ratio: f64,
}

impl Default for CongestionWeights {
    fn default() -> Self {
        Self {
            fee_premium: 0.5,
            fill_ratio: 0.5,
        }
    }
}

/// When snapshots are rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishPolicy {
    /// Only when a bucket closes.
    #[default]
    BucketClose,
    /// After every ingested ledger as well.
    EveryLedger,
}

impl FromStr for PublishPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bucket-close" | "bucket_close" => Ok(PublishPolicy::BucketClose),
            "every-ledger" | "every_ledger" => Ok(PublishPolicy::EveryLedger),
            other => Err(format!("unknown publish policy: {}", other)),
        }
    }
}

/// Configuration for the fee insights engine.
#[derive(Debug, Clone, PartialEq)]
pub struct InsightsConfig {
    pub windows: Vec<WindowConfig>,
    pub percentile_targets: Vec<f64>,
    pub late_arrival_tolerance_secs: u64,
    pub congestion_weights: CongestionWeights,
    /// Emit records for failed transactions (tagged `successful = false`).
    pub include_failed_transactions: bool,
    /// Let failed transactions contribute to fee statistics.
    pub failed_in_fee_stats: bool,
    /// Events held back waiting for a missing sequence. 0 disables reordering.
    pub reorder_capacity: usize,
    pub publish_policy: PublishPolicy,
}

impl Default for InsightsConfig {
    fn default() -> Self {
        Self {
            windows: vec![
                WindowConfig::new(60, 5),
                WindowConfig::new(300, 30),
                WindowConfig::new(3_600, 300),
                WindowConfig::new(86_400, 3_600),
            ],
            percentile_targets: vec![50.0, 90.0, 99.0],
            late_arrival_tolerance_secs: 0,
            congestion_weights: CongestionWeights::default(),
            include_failed_transactions: true,
            failed_in_fee_stats: false,
            reorder_capacity: 0,
            publish_policy: PublishPolicy::default(),
        }
    }
}

impl InsightsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.windows.is_empty() {
            return Err(ConfigError::NoWindows);
        }

        let mut seen = Vec::with_capacity(self.windows.len());
        for window in &self.windows {
            let id = window.id();
            if seen.contains(&id) {
                return Err(ConfigError::DuplicateWindow { window: id });
            }
            seen.push(id);

            if window.granularity_secs == 0 || window.granularity_secs >= window.duration_secs {
                return Err(ConfigError::InvalidGranularity {
                    window: id,
                    granularity_secs: window.granularity_secs,
                });
            }
            if window.duration_secs % window.granularity_secs != 0 {
                return Err(ConfigError::UnalignedWindow {
                    window: id,
                    granularity_secs: window.granularity_secs,
                });
            }
            if window.retention < window.buckets_per_window() {
                return Err(ConfigError::RetentionTooShort {
                    window: id,
                    retention: window.retention,
                });
            }
            if self.late_arrival_tolerance_secs >= window.retention_span_secs() {
                return Err(ConfigError::ToleranceTooLong {
                    window: id,
                    tolerance_secs: self.late_arrival_tolerance_secs,
                });
            }
        }

        for (i, target) in self.percentile_targets.iter().enumerate() {
            if !target.is_finite() || *target <= 0.0 || *target >= 100.0 {
                return Err(ConfigError::InvalidPercentile(*target));
            }
            if self.percentile_targets[..i].contains(target) {
                return Err(ConfigError::DuplicatePercentile(*target));
            }
        }

        let CongestionWeights {
            fee_premium: w1,
            fill_ratio: w2,
        } = self.congestion_weights;
        let valid = |w: f64| w.is_finite() && w >= 0.0;
        if !valid(w1) || !valid(w2) || w1 + w2 == 0.0 {
            return Err(ConfigError::InvalidWeights { w1, w2 });
        }

        Ok(())
    }

    /// Windows ordered by duration, as the store and API list them.
    pub fn sorted_windows(&self) -> Vec<WindowConfig> {
        let mut windows = self.windows.clone();
        windows.sort_by_key(|w| w.duration_secs);
        windows
    }
}
