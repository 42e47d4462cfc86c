use crate::{
    error::DataError,
    fetch::FetchStrategy,
    trade::{PairKey, Trade},
};
use fnv::FnvHashMap;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Per-pair fetch lifecycle. Transitions are driven only by the fetch
/// orchestrator, plus `Stale` seeding at cache load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairPhase {
    Idle,
    Fetching(FetchStrategy),
    Error(String),
    UpToDate,
    Stale,
}

/// Status held per pair alongside its trade set.
#[derive(Debug, Clone)]
pub struct PairStatus {
    pub phase: PairPhase,
    /// Records fetched so far by the in-flight (or last) strategy.
    pub progress: usize,
    cancel: Arc<AtomicBool>,
}

impl Default for PairStatus {
    fn default() -> Self {
        Self {
            phase: PairPhase::Idle,
            progress: 0,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Cooperative cancellation handle checked between pages and between name
/// batches. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// In-memory unit of truth: pair-keyed trade sets plus the resolved
/// display-name map and per-pair fetch status.
///
/// Trade sets are ordered by arrival and mutated only through the merge
/// operations the orchestrator calls; filters and the aggregator read and
/// return new derived collections.
#[derive(Debug, Default)]
pub struct TradeStore {
    pair_trades: FnvHashMap<PairKey, Vec<Trade>>,
    display_names: FnvHashMap<String, String>,
    status: FnvHashMap<PairKey, PairStatus>,
    names_remaining: usize,
}

impl TradeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trades stored for a pair, empty when unknown.
    pub fn trades(&self, pair: &PairKey) -> &[Trade] {
        self.pair_trades.get(pair).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn pairs(&self) -> impl Iterator<Item = &PairKey> {
        self.pair_trades.keys()
    }

    pub fn pair_trades(&self) -> &FnvHashMap<PairKey, Vec<Trade>> {
        &self.pair_trades
    }

    /// `max(tradeTimestamp)` over the stored set, 0 when empty.
    pub fn latest_timestamp(&self, pair: &PairKey) -> i64 {
        self.trades(pair)
            .iter()
            .map(|t| t.trade_timestamp)
            .max()
            .unwrap_or(0)
    }

    /// `min(tradeTimestamp)` over the stored set, `None` when empty.
    pub fn earliest_timestamp(&self, pair: &PairKey) -> Option<i64> {
        self.trades(pair).iter().map(|t| t.trade_timestamp).min()
    }

    /// Replace the pair's stored set. Used by the full strategy after every
    /// committed page so a crash mid-fetch leaves a superset-safe partial
    /// result, never a torn write.
    pub fn replace_trades(&mut self, pair: &PairKey, trades: Vec<Trade>) {
        self.pair_trades.insert(pair.clone(), trades);
    }

    /// Prepend strictly-newer records ahead of the existing set (incremental
    /// completion).
    pub fn prepend_trades(&mut self, pair: &PairKey, mut newer: Vec<Trade>) {
        if newer.is_empty() {
            return;
        }
        let existing = self.pair_trades.entry(pair.clone()).or_default();
        newer.extend(existing.drain(..));
        *existing = newer;
    }

    /// Append older records at the tail of the existing set (historical
    /// completion).
    pub fn append_trades(&mut self, pair: &PairKey, older: Vec<Trade>) {
        if older.is_empty() {
            return;
        }
        self.pair_trades.entry(pair.clone()).or_default().extend(older);
    }

    // --- per-pair state machine -------------------------------------------

    pub fn status(&self, pair: &PairKey) -> PairStatus {
        self.status.get(pair).cloned().unwrap_or_default()
    }

    pub fn phase(&self, pair: &PairKey) -> PairPhase {
        self.status
            .get(pair)
            .map(|s| s.phase.clone())
            .unwrap_or(PairPhase::Idle)
    }

    pub fn is_fetching(&self, pair: &PairKey) -> bool {
        matches!(self.phase(pair), PairPhase::Fetching(_))
    }

    pub fn fetch_progress(&self, pair: &PairKey) -> usize {
        self.status.get(pair).map(|s| s.progress).unwrap_or(0)
    }

    /// Pair is known to hold data that live fetches have not confirmed fresh.
    pub fn needs_update(&self, pair: &PairKey) -> bool {
        matches!(self.phase(pair), PairPhase::Stale | PairPhase::Error(_))
    }

    /// Acquire the pair's exclusive fetch slot. At most one strategy per pair
    /// is in flight; a second request fails fast instead of racing on the
    /// store update.
    pub fn begin_fetch(
        &mut self,
        pair: &PairKey,
        strategy: FetchStrategy,
    ) -> Result<CancelToken, DataError> {
        let status = self.status.entry(pair.clone()).or_default();
        if matches!(status.phase, PairPhase::Fetching(_)) {
            return Err(DataError::FetchInFlight { pair: pair.clone() });
        }
        status.phase = PairPhase::Fetching(strategy);
        status.progress = 0;
        status.cancel = Arc::new(AtomicBool::new(false));
        Ok(CancelToken(Arc::clone(&status.cancel)))
    }

    pub fn set_progress(&mut self, pair: &PairKey, fetched: usize) {
        self.status.entry(pair.clone()).or_default().progress = fetched;
    }

    /// Release the pair slot into its post-fetch resting phase.
    pub fn finish_fetch(&mut self, pair: &PairKey, phase: PairPhase) {
        let status = self.status.entry(pair.clone()).or_default();
        debug_assert!(!matches!(phase, PairPhase::Fetching(_)));
        status.phase = phase;
    }

    /// Request cooperative cancellation of the pair's in-flight work.
    pub fn cancel(&self, pair: &PairKey) {
        if let Some(status) = self.status.get(pair) {
            status.cancel.store(true, Ordering::Relaxed);
        }
    }

    pub fn cancel_all(&self) {
        for status in self.status.values() {
            status.cancel.store(true, Ordering::Relaxed);
        }
    }

    /// Seed `Stale` on every non-empty pair after an old cache load.
    pub fn seed_stale(&mut self) {
        let pairs: Vec<PairKey> = self
            .pair_trades
            .iter()
            .filter(|(_, trades)| !trades.is_empty())
            .map(|(pair, _)| pair.clone())
            .collect();
        for pair in pairs {
            let status = self.status.entry(pair).or_default();
            if !matches!(status.phase, PairPhase::Fetching(_)) {
                status.phase = PairPhase::Stale;
            }
        }
    }

    // --- display names ----------------------------------------------------

    pub fn display_name(&self, address: &str) -> Option<&str> {
        self.display_names.get(address).map(String::as_str)
    }

    pub fn display_names(&self) -> &FnvHashMap<String, String> {
        &self.display_names
    }

    /// Record resolved names. Entries are append-only; once resolved an
    /// address is never re-fetched.
    pub fn insert_names(&mut self, resolved: impl IntoIterator<Item = (String, String)>) {
        for (address, name) in resolved {
            self.display_names.entry(address).or_insert(name);
        }
    }

    /// Every buyer/seller address appearing in stored trades with no resolved
    /// name yet, deduplicated.
    pub fn unresolved_addresses(&self) -> Vec<String> {
        let mut seen = fnv::FnvHashSet::default();
        let mut unresolved = Vec::new();
        for trades in self.pair_trades.values() {
            for trade in trades {
                for address in [&trade.buyer_receiving_address, &trade.seller_address]
                    .into_iter()
                    .flatten()
                {
                    if !address.is_empty()
                        && !self.display_names.contains_key(address)
                        && seen.insert(address.clone())
                    {
                        unresolved.push(address.clone());
                    }
                }
            }
        }
        unresolved
    }

    pub fn names_remaining(&self) -> usize {
        self.names_remaining
    }

    pub fn set_names_remaining(&mut self, remaining: usize) {
        self.names_remaining = remaining;
    }

    // --- cache snapshot ---------------------------------------------------

    /// Snapshot for the persistent cache adapter.
    pub fn snapshot(&self) -> (FnvHashMap<PairKey, Vec<Trade>>, FnvHashMap<String, String>) {
        (self.pair_trades.clone(), self.display_names.clone())
    }

    /// Restore from a loaded cache payload, leaving fetch status untouched.
    pub fn restore(
        &mut self,
        pair_trades: FnvHashMap<PairKey, Vec<Trade>>,
        display_names: FnvHashMap<String, String>,
    ) {
        self.pair_trades = pair_trades;
        self.display_names = display_names;
    }

    /// Drop everything: trades, names, status, counters.
    pub fn clear(&mut self) {
        self.cancel_all();
        self.pair_trades.clear();
        self.display_names.clear();
        self.status.clear();
        self.names_remaining = 0;
    }
}
