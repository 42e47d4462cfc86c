use crate::trade::Trade;
use chrono::{DateTime, Datelike, Months, TimeZone, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// OHLCV summary for one time bucket. Derived, never persisted; recomputed on
/// every filter or period change.
///
/// Invariant: `low ≤ open, close ≤ high` within a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bucket boundary: `floor(ts / interval) * interval` for fixed-width
    /// buckets, UTC midnight for daily buckets.
    pub bucket_start: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Total QORT traded in the bucket.
    pub volume: f64,
}

/// Bucket trades into fixed-width intervals and compute OHLCV per bucket.
///
/// Sorts ascending (stable) then runs a single pass with a current-bucket
/// accumulator, flushing on rollover and once after the loop. Trades that are
/// not valid for pricing are skipped. Output is ordered ascending by
/// `bucket_start`; empty input yields an empty sequence. Deterministic
/// regardless of input ordering.
pub fn aggregate(trades: &[Trade], interval_ms: i64) -> Vec<Candle> {
    if interval_ms <= 0 {
        return Vec::new();
    }

    let mut sorted: Vec<&Trade> = trades.iter().collect();
    sorted.sort_by_key(|t| t.trade_timestamp);

    let mut candles = Vec::new();
    let mut current: Option<Candle> = None;
    let mut dropped = 0usize;

    for trade in sorted {
        let Some(price) = trade.price() else {
            dropped += 1;
            continue;
        };
        let qort = trade.qort();
        let bucket = (trade.trade_timestamp.div_euclid(interval_ms)) * interval_ms;

        match current.as_mut() {
            Some(candle) if candle.bucket_start == bucket => {
                candle.high = candle.high.max(price);
                candle.low = candle.low.min(price);
                candle.close = price;
                candle.volume += qort;
            }
            _ => {
                if let Some(done) = current.take() {
                    candles.push(done);
                }
                current = Some(Candle {
                    bucket_start: bucket,
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    volume: qort,
                });
            }
        }
    }

    if let Some(done) = current {
        candles.push(done);
    }

    if dropped > 0 {
        debug!(dropped, "skipped trades invalid for pricing during aggregation");
    }

    candles
}

/// Bucket trades by UTC calendar day.
///
/// Open/close come from the chronologically first/last trade of the day,
/// high/low are the day's price extremes, volume is the day's summed QORT,
/// and `bucket_start` is the day's UTC midnight.
pub fn aggregate_daily(trades: &[Trade]) -> Vec<Candle> {
    let mut sorted: Vec<&Trade> = trades
        .iter()
        .filter(|t| t.price().is_some())
        .collect();
    let dropped = trades.len() - sorted.len();
    if dropped > 0 {
        debug!(dropped, "skipped trades invalid for pricing during daily aggregation");
    }
    sorted.sort_by_key(|t| t.trade_timestamp);

    let days = sorted.into_iter().chunk_by(|t| utc_day(t.trade_timestamp));
    days.into_iter()
        .map(|((year, month, day), day_trades)| {
            let day_trades: Vec<&Trade> = day_trades.collect();
            let prices: Vec<f64> = day_trades
                .iter()
                .map(|t| t.price().expect("filtered to pricable trades"))
                .collect();

            let midnight = Utc
                .with_ymd_and_hms(year, month, day, 0, 0, 0)
                .single()
                .map(|dt| dt.timestamp_millis())
                .unwrap_or_else(|| day_trades[0].trade_timestamp);

            Candle {
                bucket_start: midnight,
                open: prices[0],
                high: prices.iter().copied().fold(f64::MIN, f64::max),
                low: prices.iter().copied().fold(f64::MAX, f64::min),
                close: *prices.last().expect("day bucket is non-empty"),
                volume: day_trades.iter().map(|t| t.qort()).sum(),
            }
        })
        .collect()
}

fn utc_day(timestamp_ms: i64) -> (i32, u32, u32) {
    let dt = DateTime::<Utc>::from_timestamp_millis(timestamp_ms).unwrap_or_default();
    (dt.year(), dt.month(), dt.day())
}

/// Simple moving average over candle closes, one point per candle from index
/// `period - 1`. The reference chart overlays SMA(7).
pub fn sma(candles: &[Candle], period: usize) -> Vec<(i64, f64)> {
    if period == 0 || candles.len() < period {
        return Vec::new();
    }
    candles
        .windows(period)
        .map(|window| {
            let mean = window.iter().map(|c| c.close).sum::<f64>() / period as f64;
            (window[period - 1].bucket_start, mean)
        })
        .collect()
}

/// Chart period selection. Day-scale periods chart fixed-interval candles at
/// the caller-supplied interval; month-scale periods and `All` switch to
/// calendar-day candles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChartPeriod {
    Days(u32),
    Months(u32),
    All,
}

impl ChartPeriod {
    /// The reference menu: 1D, 5D, 1M, 3M, 1Y, All.
    pub const MENU: [ChartPeriod; 6] = [
        ChartPeriod::Days(1),
        ChartPeriod::Days(5),
        ChartPeriod::Months(1),
        ChartPeriod::Months(3),
        ChartPeriod::Months(12),
        ChartPeriod::All,
    ];

    /// Month-scale periods chart calendar-day candles.
    pub fn uses_daily_candles(&self) -> bool {
        matches!(self, ChartPeriod::Months(_) | ChartPeriod::All)
    }

    /// Oldest timestamp included in the chart, `None` when unbounded.
    /// Calendar-aware: months subtract calendar months, not fixed windows.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<i64> {
        match self {
            ChartPeriod::Days(days) => {
                Some((now - chrono::Duration::days(i64::from(*days))).timestamp_millis())
            }
            ChartPeriod::Months(months) => now
                .checked_sub_months(Months::new(*months))
                .map(|dt| dt.timestamp_millis()),
            ChartPeriod::All => None,
        }
    }

    /// Trades strictly older than the cutoff are excluded before filtering.
    pub fn clip<'a>(&self, trades: &'a [Trade], now: DateTime<Utc>) -> Vec<&'a Trade> {
        match self.cutoff(now) {
            Some(cutoff) => trades
                .iter()
                .filter(|t| t.trade_timestamp >= cutoff)
                .collect(),
            None => trades.iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(ts: i64, qort: &str, foreign: &str) -> Trade {
        Trade {
            trade_timestamp: ts,
            qort_amount: qort.to_string(),
            foreign_amount: foreign.to_string(),
            buyer_receiving_address: None,
            seller_address: None,
        }
    }

    const HOUR: i64 = 3_600_000;

    #[test]
    fn test_aggregate_reference_vector() {
        let trades = vec![
            trade(0, "10", "1"),
            trade(0, "5", "0.6"),
            trade(HOUR, "20", "1.8"),
        ];

        let candles = aggregate(&trades, HOUR);
        assert_eq!(candles.len(), 2);

        let first = &candles[0];
        assert_eq!(first.bucket_start, 0);
        assert!((first.open - 0.1).abs() < 1e-12);
        assert!((first.high - 0.12).abs() < 1e-12);
        assert!((first.low - 0.1).abs() < 1e-12);
        assert!((first.close - 0.12).abs() < 1e-12);
        assert!((first.volume - 15.0).abs() < 1e-12);

        let second = &candles[1];
        assert_eq!(second.bucket_start, HOUR);
        assert!((second.open - 0.09).abs() < 1e-12);
        assert_eq!(second.open, second.high);
        assert_eq!(second.open, second.low);
        assert_eq!(second.open, second.close);
        assert!((second.volume - 20.0).abs() < 1e-12);
    }

    #[test]
    fn test_aggregate_empty_and_single() {
        assert!(aggregate(&[], HOUR).is_empty());

        let candles = aggregate(&[trade(12_345, "4", "2")], HOUR);
        assert_eq!(candles.len(), 1);
        let candle = &candles[0];
        assert_eq!(candle.bucket_start, 0);
        assert_eq!(candle.open, 0.5);
        assert_eq!(candle.high, 0.5);
        assert_eq!(candle.low, 0.5);
        assert_eq!(candle.close, 0.5);
        assert_eq!(candle.volume, 4.0);
    }

    #[test]
    fn test_aggregate_deterministic_and_ordered() {
        let forward = vec![
            trade(0, "1", "0.5"),
            trade(HOUR, "2", "1.2"),
            trade(2 * HOUR, "3", "1.8"),
            trade(HOUR + 1, "1", "0.7"),
        ];
        let mut reversed = forward.clone();
        reversed.reverse();

        let a = aggregate(&forward, HOUR);
        let b = aggregate(&reversed, HOUR);
        assert_eq!(a, b);

        for pair in a.windows(2) {
            assert!(pair[0].bucket_start < pair[1].bucket_start);
        }
        for candle in &a {
            assert!(candle.low <= candle.open.min(candle.close));
            assert!(candle.high >= candle.open.max(candle.close));
        }

        // Idempotent on already-sorted input.
        assert_eq!(aggregate(&forward, HOUR), a);
    }

    #[test]
    fn test_aggregate_skips_invalid_trades() {
        let trades = vec![
            trade(0, "0", "1"),
            trade(0, "-5", "1"),
            trade(0, "junk", "1"),
            trade(0, "10", "1"),
        ];
        let candles = aggregate(&trades, HOUR);
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].volume, 10.0);
    }

    #[test]
    fn test_daily_splits_across_utc_midnight() {
        // 2024-06-20T23:30:00Z and 2024-06-21T00:30:00Z
        let before = 1_718_926_200_000;
        let after = 1_718_929_800_000;
        let trades = vec![trade(before, "10", "1"), trade(after, "20", "3")];

        let candles = aggregate_daily(&trades);
        assert_eq!(candles.len(), 2);

        // Bucket starts are UTC midnights.
        assert_eq!(candles[0].bucket_start % 86_400_000, 0);
        assert_eq!(candles[1].bucket_start % 86_400_000, 0);
        assert_eq!(candles[1].bucket_start - candles[0].bucket_start, 86_400_000);

        assert_eq!(candles[0].volume, 10.0);
        assert_eq!(candles[1].volume, 20.0);
        assert!((candles[1].open - 0.15).abs() < 1e-12);
    }

    #[test]
    fn test_daily_open_close_from_first_last() {
        let day = 1_718_841_600_000; // 2024-06-20T00:00:00Z
        let trades = vec![
            trade(day + 3_000, "1", "0.5"),
            trade(day + 1_000, "1", "0.1"),
            trade(day + 2_000, "1", "0.9"),
        ];

        let candles = aggregate_daily(&trades);
        assert_eq!(candles.len(), 1);
        let candle = &candles[0];
        assert_eq!(candle.bucket_start, day);
        assert_eq!(candle.open, 0.1);
        assert_eq!(candle.close, 0.5);
        assert_eq!(candle.high, 0.9);
        assert_eq!(candle.low, 0.1);
        assert_eq!(candle.volume, 3.0);
    }

    #[test]
    fn test_sma_starts_at_period() {
        let candles: Vec<Candle> = (0..10)
            .map(|i| Candle {
                bucket_start: i64::from(i) * HOUR,
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: f64::from(i),
                volume: 1.0,
            })
            .collect();

        let series = sma(&candles, 7);
        assert_eq!(series.len(), 4);
        // First point sits on the 7th candle and averages closes 0..=6.
        assert_eq!(series[0].0, 6 * HOUR);
        assert!((series[0].1 - 3.0).abs() < 1e-12);

        assert!(sma(&candles[..3], 7).is_empty());
        assert!(sma(&candles, 0).is_empty());
    }

    #[test]
    fn test_period_cutoffs() {
        let now = Utc.with_ymd_and_hms(2024, 6, 21, 12, 0, 0).unwrap();

        assert_eq!(ChartPeriod::All.cutoff(now), None);
        assert_eq!(
            ChartPeriod::Days(1).cutoff(now),
            Some((now - chrono::Duration::days(1)).timestamp_millis())
        );
        // Calendar-aware month subtraction.
        assert_eq!(
            ChartPeriod::Months(1).cutoff(now),
            Some(
                Utc.with_ymd_and_hms(2024, 5, 21, 12, 0, 0)
                    .unwrap()
                    .timestamp_millis()
            )
        );

        let trades = vec![
            trade(now.timestamp_millis() - 2 * 86_400_000, "1", "1"),
            trade(now.timestamp_millis() - 3_600_000, "1", "1"),
        ];
        let clipped = ChartPeriod::Days(1).clip(&trades, now);
        assert_eq!(clipped.len(), 1);
        assert_eq!(clipped[0].trade_timestamp, trades[1].trade_timestamp);

        assert!(ChartPeriod::Months(1).uses_daily_candles());
        assert!(ChartPeriod::All.uses_daily_candles());
        assert!(!ChartPeriod::Days(5).uses_daily_candles());
    }
}
