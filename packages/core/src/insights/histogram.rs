//! Fixed-footprint, mergeable fee histogram.
//!
//! Values are binned log-linearly: every power of two is split into
//! `2^SUB_BUCKET_BITS` equal sub-buckets, and values below `2^SUB_BUCKET_BITS`
//! get an exact slot each. Relative error of a quantile estimate is bounded by
//! `1 / 2^SUB_BUCKET_BITS` (about 3%), and the counter array never grows past
//! [`MAX_SLOTS`] no matter how many values are recorded.

const SUB_BUCKET_BITS: u32 = 5;
const SUB_BUCKETS: usize = 1 << SUB_BUCKET_BITS;

/// Upper bound on the number of counters one histogram can hold.
pub const MAX_SLOTS: usize = SUB_BUCKETS * (64 - SUB_BUCKET_BITS as usize + 1);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeeHistogram {
    /// Grown lazily up to the highest slot touched, never past `MAX_SLOTS`.
    counts: Vec<u64>,
    count: u64,
    min: u64,
    max: u64,
}

fn slot_of(value: u64) -> usize {
    if value < SUB_BUCKETS as u64 {
        return value as usize;
    }
    let exponent = 63 - value.leading_zeros();
    let shift = exponent - SUB_BUCKET_BITS;
    let sub = (value >> shift) as usize - SUB_BUCKETS;
    SUB_BUCKETS + shift as usize * SUB_BUCKETS + sub
}

fn lower_bound_of(slot: usize) -> u64 {
    if slot < SUB_BUCKETS {
        return slot as u64;
    }
    let j = slot - SUB_BUCKETS;
    let shift = (j / SUB_BUCKETS) as u32;
    let sub = (j % SUB_BUCKETS) as u64;
    (SUB_BUCKETS as u64 + sub) << shift
}

impl FeeHistogram {
    pub fn record(&mut self, value: u64) {
        let slot = slot_of(value);
        debug_assert!(slot < MAX_SLOTS);
        if slot >= self.counts.len() {
            self.counts.resize(slot + 1, 0);
        }
        self.counts[slot] = self.counts[slot].saturating_add(1);

        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count = self.count.saturating_add(1);
    }

    /// Fold another histogram into this one.
    pub fn merge(&mut self, other: &FeeHistogram) {
        if other.count == 0 {
            return;
        }
        if other.counts.len() > self.counts.len() {
            self.counts.resize(other.counts.len(), 0);
        }
        for (mine, theirs) in self.counts.iter_mut().zip(&other.counts) {
            *mine = mine.saturating_add(*theirs);
        }

        if self.count == 0 {
            self.min = other.min;
            self.max = other.max;
        } else {
            self.min = self.min.min(other.min);
            self.max = self.max.max(other.max);
        }
        self.count = self.count.saturating_add(other.count);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn min(&self) -> Option<u64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<u64> {
        (self.count > 0).then_some(self.max)
    }

    /// Estimate the value at quantile `q` (`0.0..=1.0`).
    ///
    /// Returns the lower edge of the slot holding the target rank, clamped to
    /// the observed `[min, max]`. The rank walk is monotone in `q`, so larger
    /// quantiles never report smaller fees.
    pub fn quantile(&self, q: f64) -> Option<u64> {
        if self.count == 0 {
            return None;
        }

        let q = if q.is_nan() { 0.0 } else { q.clamp(0.0, 1.0) };
        let rank = ((q * self.count as f64).ceil() as u64).clamp(1, self.count);

        let mut cumulative = 0u64;
        for (slot, &n) in self.counts.iter().enumerate() {
            cumulative = cumulative.saturating_add(n);
            if cumulative >= rank {
                return Some(lower_bound_of(slot).clamp(self.min, self.max));
            }
        }

        Some(self.max)
    }

    /// Quantile by percentile target (`50.0` for p50).
    pub fn percentile(&self, target: f64) -> Option<u64> {
        self.quantile(target / 100.0)
    }

    #[cfg(test)]
    pub fn slot_count(&self) -> usize {
        self.counts.len()
    }
}
