use crate::trade::Trade;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Below this many valid prices there is not enough signal to clip safely and
/// percentile filtering passes the input through unchanged.
pub const DEFAULT_MIN_SAMPLES: usize = 200;

/// Outlier-rejection policy applied to a trade set before charting.
///
/// Both policies are pure: no I/O, no shared-state mutation, input returned
/// as a fresh subset. Policy choice and parameters are caller configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FilterPolicy {
    /// Chart raw trades untouched.
    Unfiltered,
    /// Keep trades whose price lies within the `[lower, upper]` quantile
    /// band of the valid-price distribution.
    PercentileClip {
        lower: f64,
        upper: f64,
        min_samples: usize,
    },
    /// Keep trades whose price lies within a multiplicative band around the
    /// quantity-weighted mean price.
    WeightedBand { tolerance: f64 },
}

impl FilterPolicy {
    /// The reference chart's default: clip to the [1%, 99%] band.
    pub fn percentile_default() -> Self {
        FilterPolicy::PercentileClip {
            lower: 0.01,
            upper: 0.99,
            min_samples: DEFAULT_MIN_SAMPLES,
        }
    }

    pub fn apply(&self, trades: &[Trade]) -> Vec<Trade> {
        match self {
            FilterPolicy::Unfiltered => trades.to_vec(),
            FilterPolicy::PercentileClip {
                lower,
                upper,
                min_samples,
            } => percentile_clip(trades, *lower, *upper, *min_samples),
            FilterPolicy::WeightedBand { tolerance } => weighted_band(trades, *tolerance),
        }
    }
}

/// Percentile clipping: sort valid prices, take the `[floor(n·lower),
/// ceil(n·upper) − 1]` index band, keep trades priced within it.
///
/// Fewer than `min_samples` valid prices returns the input unchanged.
pub fn percentile_clip(
    trades: &[Trade],
    lower: f64,
    upper: f64,
    min_samples: usize,
) -> Vec<Trade> {
    let mut prices: Vec<f64> = trades.iter().filter_map(Trade::price).collect();
    let dropped = trades.len() - prices.len();
    if dropped > 0 {
        debug!(dropped, "skipped trades invalid for pricing during percentile clip");
    }

    if prices.len() < min_samples.max(1) {
        return trades.to_vec();
    }

    prices.sort_by(|a, b| a.partial_cmp(b).expect("valid prices are comparable"));

    let n = prices.len();
    let lo_idx = ((n as f64) * lower).floor() as usize;
    let hi_idx = (((n as f64) * upper).ceil() as usize).saturating_sub(1);
    let lo_idx = lo_idx.min(n - 1);
    let hi_idx = hi_idx.min(n - 1);

    let lo_price = prices[lo_idx];
    let hi_price = prices[hi_idx];

    trades
        .iter()
        .filter(|t| {
            t.price()
                .is_some_and(|p| p >= lo_price && p <= hi_price)
        })
        .cloned()
        .collect()
}

/// Weighted-average banding: keep trades whose price lies within
/// `[mean/(1+tolerance), mean·(1+tolerance)]`, where `mean` is the
/// quantity-weighted mean price over the input's valid trades.
pub fn weighted_band(trades: &[Trade], tolerance: f64) -> Vec<Trade> {
    let mut weighted_sum = 0.0;
    let mut total_qort = 0.0;
    let mut dropped = 0usize;

    for trade in trades {
        match trade.price() {
            Some(price) => {
                let qort = trade.qort();
                weighted_sum += qort * price;
                total_qort += qort;
            }
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        debug!(dropped, "skipped trades invalid for pricing during weighted banding");
    }

    if total_qort <= 0.0 {
        return Vec::new();
    }

    let mean = weighted_sum / total_qort;
    let lo = mean / (1.0 + tolerance);
    let hi = mean * (1.0 + tolerance);

    trades
        .iter()
        .filter(|t| t.price().is_some_and(|p| p >= lo && p <= hi))
        .cloned()
        .collect()
}
