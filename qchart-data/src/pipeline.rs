use crate::{
    cache::{CacheAdapter, CacheRecord},
    candle::{self, Candle, ChartPeriod},
    config::PipelineConfig,
    error::DataError,
    fetch::{FetchStrategy, HttpTradeSource, Orchestrator, TradeSource},
    filter::FilterPolicy,
    names::{HttpNameLookup, NameLookup, Resolver},
    stats::{self, PairSummary},
    store::{CancelToken, PairPhase, TradeStore},
    trade::{PairKey, Trade},
};
use chrono::Utc;
use fnv::FnvHashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Progress and terminal events published while the pipeline works.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    FetchProgress { pair: PairKey, fetched: usize },
    FetchCompleted { pair: PairKey, fetched: usize },
    FetchFailed { pair: PairKey, error: String },
    FetchCancelled { pair: PairKey },
    NamesProgress { remaining: usize },
    NamesCompleted,
}

/// The trade data pipeline: owns the store, the persistent cache slot, and
/// the remote collaborators; everything the UI layer calls goes through here.
///
/// Lifecycle: [`load`](Self::load) at startup restores the store and display
/// names from the cache slot and seeds staleness; [`flush`](Self::flush)
/// forces a save; [`close`](Self::close) at shutdown is a final flush. Saves
/// are silently skipped until the initial load completes, so a save can never
/// race ahead of an unfinished load and erase durable data.
pub struct TradePipeline<S, N> {
    config: PipelineConfig,
    source: S,
    lookup: N,
    store: Mutex<TradeStore>,
    cache: CacheAdapter,
    cache_loaded: AtomicBool,
    cache_stale: AtomicBool,
    names_cancel: Mutex<CancelToken>,
    events: broadcast::Sender<PipelineEvent>,
}

impl TradePipeline<HttpTradeSource, HttpNameLookup> {
    /// Pipeline wired to the Qortal core HTTP API, one client shared between
    /// the trade source and the name service.
    pub fn from_config(config: PipelineConfig) -> Self {
        let client = reqwest::Client::new();
        let source = HttpTradeSource::new(client.clone(), config.api_url.clone());
        let lookup = HttpNameLookup::new(client, config.api_url.clone());
        Self::new(config, source, lookup)
    }
}

impl<S, N> TradePipeline<S, N> {
    pub fn new(config: PipelineConfig, source: S, lookup: N) -> Self {
        let cache = CacheAdapter::new(config.cache_path.clone());
        let (events, _) = broadcast::channel(256);
        Self {
            config,
            source,
            lookup,
            store: Mutex::new(TradeStore::new()),
            cache,
            cache_loaded: AtomicBool::new(false),
            cache_stale: AtomicBool::new(false),
            names_cancel: Mutex::new(CancelToken::default()),
            events,
        }
    }

    // --- lifecycle --------------------------------------------------------

    /// Restore the store and display names from the cache slot. Must run (or
    /// confirm the slot absent) before any save; corrupt or version-mismatched
    /// payloads start empty.
    pub fn load(&self) {
        if let Some(record) = self.cache.load() {
            let now = Utc::now().timestamp_millis();
            let has_recent = record.pair_trades.values().any(|trades| {
                trades
                    .iter()
                    .map(|t| t.trade_timestamp)
                    .max()
                    .is_some_and(|latest| now - latest < self.config.stale_after_ms)
            });

            let mut store = self.store.lock();
            store.restore(record.pair_trades, record.display_names);
            if !has_recent {
                store.seed_stale();
                self.cache_stale.store(true, Ordering::Relaxed);
            }
            info!(
                pairs = store.pair_trades().len(),
                names = store.display_names().len(),
                stale = !has_recent,
                "trade cache restored"
            );
        }
        self.cache_loaded.store(true, Ordering::Relaxed);
    }

    /// Force a save of the current store to the cache slot.
    pub fn flush(&self) -> Result<(), DataError> {
        if !self.cache_loaded.load(Ordering::Relaxed) {
            return Ok(());
        }
        let (pair_trades, display_names) = self.store.lock().snapshot();
        let record = CacheRecord::new(pair_trades, display_names);
        self.cache.save(&record)?;
        Ok(())
    }

    /// Final flush at shutdown; failures are logged, not raised.
    pub fn close(&self) {
        if let Err(error) = self.flush() {
            warn!(%error, "final trade cache flush failed");
        }
    }

    /// Cancel all in-flight work, drop every trade, name, and status, and
    /// delete the cache slot.
    pub fn clear_cache(&self) -> Result<(), DataError> {
        self.cancel_names();
        self.store.lock().clear();
        self.cache_stale.store(false, Ordering::Relaxed);
        self.cache.clear()?;
        info!("trade cache cleared");
        Ok(())
    }

    // --- chart consumption ------------------------------------------------

    /// Candles for charting: clip the pair's trades to the period cutoff,
    /// apply the outlier policy, then bucket. Month-scale periods and `All`
    /// chart calendar-day candles; day-scale periods bucket at `interval_ms`.
    pub fn candles(
        &self,
        pair: &PairKey,
        interval_ms: i64,
        period: ChartPeriod,
        filter: FilterPolicy,
    ) -> Vec<Candle> {
        let store = self.store.lock();
        let clipped: Vec<Trade> = period
            .clip(store.trades(pair), Utc::now())
            .into_iter()
            .cloned()
            .collect();
        drop(store);

        let cleaned = filter.apply(&clipped);
        if period.uses_daily_candles() {
            candle::aggregate_daily(&cleaned)
        } else {
            candle::aggregate(&cleaned, interval_ms)
        }
    }

    pub fn summary(&self, pair: &PairKey) -> PairSummary {
        stats::pair_summary(&self.store.lock(), pair)
    }

    pub fn merged_history(&self, limit: Option<usize>) -> Vec<(PairKey, Trade)> {
        stats::merged_history(&self.store.lock(), limit)
    }

    // --- read-only accessors ----------------------------------------------

    pub fn trades(&self, pair: &PairKey) -> Vec<Trade> {
        self.store.lock().trades(pair).to_vec()
    }

    pub fn is_fetching(&self, pair: &PairKey) -> bool {
        self.store.lock().is_fetching(pair)
    }

    pub fn fetch_progress(&self, pair: &PairKey) -> usize {
        self.store.lock().fetch_progress(pair)
    }

    pub fn needs_update(&self, pair: &PairKey) -> bool {
        self.store.lock().needs_update(pair)
    }

    pub fn pair_status(&self, pair: &PairKey) -> PairPhase {
        self.store.lock().phase(pair)
    }

    pub fn cache_loaded(&self) -> bool {
        self.cache_loaded.load(Ordering::Relaxed)
    }

    /// No pair held a trade newer than the staleness threshold at load time;
    /// cleared by the next successful full or incremental fetch.
    pub fn cache_stale(&self) -> bool {
        self.cache_stale.load(Ordering::Relaxed)
    }

    pub fn names_remaining(&self) -> usize {
        self.store.lock().names_remaining()
    }

    pub fn display_name(&self, address: &str) -> Option<String> {
        self.store.lock().display_name(address).map(str::to_string)
    }

    /// Subscribe to progress and terminal events.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Request cooperative cancellation of the pair's in-flight fetch.
    pub fn cancel(&self, pair: &PairKey) {
        self.store.lock().cancel(pair);
    }

    /// Request cooperative cancellation of in-flight name resolution.
    pub fn cancel_names(&self) {
        let mut guard = self.names_cancel.lock();
        guard.cancel();
        *guard = CancelToken::default();
    }

    fn cache_if_loaded(&self) -> Option<&CacheAdapter> {
        self.cache_loaded
            .load(Ordering::Relaxed)
            .then_some(&self.cache)
    }
}

impl<S, N> TradePipeline<S, N>
where
    S: TradeSource,
{
    /// Retrieve the entire available trade history for the pair.
    pub async fn fetch_full(&self, pair: &PairKey) -> Result<usize, DataError> {
        self.fetch(pair, FetchStrategy::Full).await
    }

    /// Retrieve only trades newer than the latest locally stored trade.
    pub async fn fetch_incremental(&self, pair: &PairKey) -> Result<usize, DataError> {
        self.fetch(pair, FetchStrategy::Incremental).await
    }

    /// Retrieve trades older than the earliest locally stored trade.
    pub async fn fetch_historical(&self, pair: &PairKey) -> Result<usize, DataError> {
        self.fetch(pair, FetchStrategy::Historical).await
    }

    async fn fetch(&self, pair: &PairKey, strategy: FetchStrategy) -> Result<usize, DataError> {
        let orchestrator = Orchestrator {
            source: &self.source,
            store: &self.store,
            events: &self.events,
            cache: self.cache_if_loaded(),
            page_limit: self.config.page_limit,
        };
        let fetched = orchestrator.run(pair, strategy).await?;

        // Fresh data confirms the cache is live again.
        if matches!(strategy, FetchStrategy::Full | FetchStrategy::Incremental) {
            self.cache_stale.store(false, Ordering::Relaxed);
        }
        Ok(fetched)
    }
}

impl<S, N> TradePipeline<S, N>
where
    N: NameLookup,
{
    /// Resolve counterparty addresses to display names, deduplicated against
    /// the resolved map and within the call.
    pub async fn resolve_names(
        &self,
        addresses: impl IntoIterator<Item = String>,
    ) -> FnvHashMap<String, String> {
        let token = self.names_cancel.lock().clone();
        self.resolver().resolve(addresses, &token).await
    }

    /// Resolve every buyer and seller address appearing in stored trades that
    /// has no display name yet.
    pub async fn resolve_missing(&self) -> FnvHashMap<String, String> {
        let token = self.names_cancel.lock().clone();
        self.resolver().resolve_missing(&token).await
    }

    fn resolver(&self) -> Resolver<'_, N> {
        Resolver {
            lookup: &self.lookup,
            store: &self.store,
            events: &self.events,
            cache: self.cache_if_loaded(),
            batch_size: self.config.name_batch_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::NameEntry;
    use async_trait::async_trait;

    struct ScriptedSource {
        pages: Mutex<Vec<Vec<Trade>>>,
    }

    #[async_trait]
    impl TradeSource for ScriptedSource {
        async fn fetch_page(
            &self,
            _page: &crate::fetch::TradePage,
        ) -> Result<Vec<Trade>, DataError> {
            let mut pages = self.pages.lock();
            Ok(if pages.is_empty() {
                Vec::new()
            } else {
                pages.remove(0)
            })
        }
    }

    struct StaticLookup;

    #[async_trait]
    impl NameLookup for StaticLookup {
        async fn lookup(&self, address: &str) -> Result<Vec<NameEntry>, DataError> {
            Ok(vec![NameEntry {
                name: format!("name-of-{address}"),
                owner: address.to_string(),
            }])
        }
    }

    fn trade(ts: i64, qort: &str, foreign: &str) -> Trade {
        Trade {
            trade_timestamp: ts,
            qort_amount: qort.to_string(),
            foreign_amount: foreign.to_string(),
            buyer_receiving_address: Some("Qbuyer".to_string()),
            seller_address: None,
        }
    }

    fn pipeline_at(
        cache_path: std::path::PathBuf,
        pages: Vec<Vec<Trade>>,
    ) -> TradePipeline<ScriptedSource, StaticLookup> {
        let config = PipelineConfig {
            cache_path,
            ..PipelineConfig::default()
        };
        TradePipeline::new(
            config,
            ScriptedSource {
                pages: Mutex::new(pages),
            },
            StaticLookup,
        )
    }

    #[tokio::test]
    async fn test_fetch_then_chart_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let pair = PairKey::from("LITECOIN");
        let now = Utc::now().timestamp_millis();
        let hour = 3_600_000;
        let bucket = (now - 2 * hour).div_euclid(hour) * hour;

        let pipeline = pipeline_at(
            dir.path().join("trades.json"),
            vec![vec![
                trade(bucket + hour, "20", "1.8"),
                trade(bucket, "5", "0.6"),
                trade(bucket, "10", "1"),
            ]],
        );
        pipeline.load();
        assert!(pipeline.cache_loaded());

        let fetched = pipeline.fetch_full(&pair).await.unwrap();
        assert_eq!(fetched, 3);
        assert_eq!(pipeline.pair_status(&pair), PairPhase::UpToDate);
        assert!(!pipeline.needs_update(&pair));

        let candles = pipeline.candles(
            &pair,
            hour,
            ChartPeriod::Days(1),
            FilterPolicy::Unfiltered,
        );
        assert_eq!(candles.len(), 2);
        assert!((candles[0].open - 0.1).abs() < 1e-12);
        assert!((candles[0].high - 0.12).abs() < 1e-12);
        assert!((candles[0].volume - 15.0).abs() < 1e-12);
        assert!((candles[1].close - 0.09).abs() < 1e-12);
        assert!((candles[1].volume - 20.0).abs() < 1e-12);

        let summary = pipeline.summary(&pair);
        assert_eq!(summary.trade_count, 3);
        assert_eq!(summary.qort_volume, 35.0);
    }

    #[tokio::test]
    async fn test_cache_round_trip_between_pipelines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades.json");
        let pair = PairKey::from("LITECOIN");
        let now = Utc::now().timestamp_millis();

        let pipeline = pipeline_at(path.clone(), vec![vec![trade(now, "10", "1")]]);
        pipeline.load();
        pipeline.fetch_full(&pair).await.unwrap();
        let resolved = pipeline.resolve_missing().await;
        assert_eq!(
            resolved.get("Qbuyer").map(String::as_str),
            Some("name-of-Qbuyer")
        );
        pipeline.close();

        // A fresh pipeline restores trades and names from the slot.
        let restored = pipeline_at(path, vec![]);
        restored.load();
        assert_eq!(restored.trades(&pair).len(), 1);
        assert_eq!(
            restored.display_name("Qbuyer").as_deref(),
            Some("name-of-Qbuyer")
        );
        // Data is fresh, so no stale warning.
        assert!(!restored.cache_stale());
        assert_eq!(restored.pair_status(&pair), PairPhase::Idle);
    }

    #[tokio::test]
    async fn test_old_cache_seeds_stale_until_refetch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades.json");
        let pair = PairKey::from("LITECOIN");
        let old = Utc::now().timestamp_millis() - 30 * 24 * 3_600_000;

        let seeder = pipeline_at(path.clone(), vec![vec![trade(old, "10", "1")]]);
        seeder.load();
        seeder.fetch_full(&pair).await.unwrap();
        seeder.close();

        let now = Utc::now().timestamp_millis();
        let pipeline = pipeline_at(path, vec![vec![trade(now, "10", "1")]]);
        pipeline.load();
        assert!(pipeline.cache_stale());
        assert_eq!(pipeline.pair_status(&pair), PairPhase::Stale);
        assert!(pipeline.needs_update(&pair));

        // A successful incremental fetch clears the warning.
        pipeline.fetch_incremental(&pair).await.unwrap();
        assert!(!pipeline.cache_stale());
        assert_eq!(pipeline.pair_status(&pair), PairPhase::UpToDate);
        assert_eq!(pipeline.trades(&pair).len(), 2);
    }

    #[tokio::test]
    async fn test_writes_skipped_before_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades.json");
        let pair = PairKey::from("LITECOIN");

        let pipeline = pipeline_at(path.clone(), vec![vec![trade(1, "10", "1")]]);
        // No load() yet: the fetch commits to the store but must not clobber
        // the not-yet-loaded slot.
        pipeline.fetch_full(&pair).await.unwrap();
        assert!(pipeline.flush().is_ok());
        assert!(!path.exists());

        pipeline.load();
        pipeline.flush().unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_clear_cache_empties_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades.json");
        let pair = PairKey::from("LITECOIN");
        let now = Utc::now().timestamp_millis();

        let pipeline = pipeline_at(path.clone(), vec![vec![trade(now, "10", "1")]]);
        pipeline.load();
        pipeline.fetch_full(&pair).await.unwrap();
        assert!(path.exists());

        pipeline.clear_cache().unwrap();
        assert!(!path.exists());
        assert!(pipeline.trades(&pair).is_empty());
        assert_eq!(pipeline.fetch_progress(&pair), 0);
        assert_eq!(pipeline.names_remaining(), 0);
    }

    #[tokio::test]
    async fn test_events_published_during_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let pair = PairKey::from("LITECOIN");

        let pipeline = pipeline_at(
            dir.path().join("trades.json"),
            vec![vec![trade(1, "1", "1")]],
        );
        pipeline.load();
        let mut events = pipeline.subscribe();

        pipeline.fetch_full(&pair).await.unwrap();

        let first = events.try_recv().unwrap();
        assert!(matches!(
            first,
            PipelineEvent::FetchProgress { fetched: 1, .. }
        ));
        let second = events.try_recv().unwrap();
        assert!(matches!(
            second,
            PipelineEvent::FetchCompleted { fetched: 1, .. }
        ));
    }
}
