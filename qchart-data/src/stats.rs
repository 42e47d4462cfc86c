use crate::{
    store::TradeStore,
    trade::{PairKey, Trade},
};
use fnv::FnvHashMap;
use itertools::Itertools;
use serde::Serialize;

/// The buyer counterparty with the greatest summed QORT volume for a pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopCounterparty {
    pub address: String,
    /// Resolved display name, when the resolver has seen this address.
    pub display_name: Option<String>,
    pub qort_volume: f64,
}

/// Per-pair summary over the stored trade set. Price extremes are computed
/// over trades valid for pricing only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairSummary {
    pub pair: PairKey,
    pub trade_count: usize,
    pub qort_volume: f64,
    pub price_low: Option<f64>,
    pub price_high: Option<f64>,
    pub latest_timestamp: Option<i64>,
    pub top_buyer: Option<TopCounterparty>,
}

/// Compute the summary for one pair from the store.
pub fn pair_summary(store: &TradeStore, pair: &PairKey) -> PairSummary {
    let trades = store.trades(pair);

    let mut qort_volume = 0.0;
    let mut buyer_volumes: FnvHashMap<&str, f64> = FnvHashMap::default();

    for trade in trades {
        let qort = trade.qort();
        if qort.is_finite() && qort > 0.0 {
            qort_volume += qort;
            if let Some(buyer) = trade.buyer_receiving_address.as_deref() {
                *buyer_volumes.entry(buyer).or_insert(0.0) += qort;
            }
        }
    }

    let (price_low, price_high) = match trades.iter().filter_map(Trade::price).minmax() {
        itertools::MinMaxResult::NoElements => (None, None),
        itertools::MinMaxResult::OneElement(p) => (Some(p), Some(p)),
        itertools::MinMaxResult::MinMax(lo, hi) => (Some(lo), Some(hi)),
    };

    let top_buyer = buyer_volumes
        .into_iter()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(address, volume)| TopCounterparty {
            display_name: store.display_name(address).map(str::to_string),
            address: address.to_string(),
            qort_volume: volume,
        });

    PairSummary {
        pair: pair.clone(),
        trade_count: trades.len(),
        qort_volume,
        price_low,
        price_high,
        latest_timestamp: trades.iter().map(|t| t.trade_timestamp).max(),
        top_buyer,
    }
}

/// Merge every pair's trades into one newest-first history, each entry tagged
/// with its pair. `limit` bounds the result when present.
pub fn merged_history(store: &TradeStore, limit: Option<usize>) -> Vec<(PairKey, Trade)> {
    let mut merged: Vec<(PairKey, Trade)> = store
        .pair_trades()
        .iter()
        .flat_map(|(pair, trades)| trades.iter().map(move |t| (pair.clone(), t.clone())))
        .collect();

    merged.sort_by_key(|(_, t)| std::cmp::Reverse(t.trade_timestamp));

    if let Some(limit) = limit {
        merged.truncate(limit);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(ts: i64, qort: &str, foreign: &str, buyer: Option<&str>) -> Trade {
        Trade {
            trade_timestamp: ts,
            qort_amount: qort.to_string(),
            foreign_amount: foreign.to_string(),
            buyer_receiving_address: buyer.map(str::to_string),
            seller_address: None,
        }
    }

    #[test]
    fn test_pair_summary() {
        let mut store = TradeStore::new();
        let pair = PairKey::from("LITECOIN");
        store.replace_trades(
            &pair,
            vec![
                trade(100, "10", "1", Some("Qwhale")),   // price 0.1
                trade(200, "5", "1", Some("Qminnow")),   // price 0.2
                trade(300, "20", "1", Some("Qwhale")),   // price 0.05
                trade(400, "junk", "1", Some("Qbroken")), // excluded from volume/extremes
            ],
        );
        store.insert_names([("Qwhale".to_string(), "whale".to_string())]);

        let summary = pair_summary(&store, &pair);
        assert_eq!(summary.trade_count, 4);
        assert_eq!(summary.qort_volume, 35.0);
        assert_eq!(summary.price_low, Some(0.05));
        assert_eq!(summary.price_high, Some(0.2));
        assert_eq!(summary.latest_timestamp, Some(400));

        let top = summary.top_buyer.expect("has buyers");
        assert_eq!(top.address, "Qwhale");
        assert_eq!(top.qort_volume, 30.0);
        assert_eq!(top.display_name.as_deref(), Some("whale"));
    }

    #[test]
    fn test_pair_summary_empty() {
        let store = TradeStore::new();
        let summary = pair_summary(&store, &PairKey::from("BITCOIN"));
        assert_eq!(summary.trade_count, 0);
        assert_eq!(summary.qort_volume, 0.0);
        assert_eq!(summary.price_low, None);
        assert_eq!(summary.latest_timestamp, None);
        assert!(summary.top_buyer.is_none());
    }

    #[test]
    fn test_merged_history_newest_first_with_limit() {
        let mut store = TradeStore::new();
        let ltc = PairKey::from("LITECOIN");
        let btc = PairKey::from("BITCOIN");
        store.replace_trades(&ltc, vec![trade(300, "1", "1", None), trade(100, "1", "1", None)]);
        store.replace_trades(&btc, vec![trade(200, "1", "1", None)]);

        let merged = merged_history(&store, None);
        let timestamps: Vec<i64> = merged.iter().map(|(_, t)| t.trade_timestamp).collect();
        assert_eq!(timestamps, vec![300, 200, 100]);
        assert_eq!(merged[1].0, btc);

        let limited = merged_history(&store, Some(2));
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].1.trade_timestamp, 300);
    }
}
