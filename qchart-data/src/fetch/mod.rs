use crate::{
    cache::{CacheAdapter, CacheRecord},
    error::DataError,
    pipeline::PipelineEvent,
    store::{CancelToken, PairPhase, TradeStore},
    trade::{PairKey, Trade},
};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// HTTP trade source implementation.
pub mod http;

pub use http::HttpTradeSource;

/// Paging strategy for one pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum FetchStrategy {
    /// Page the entire history newest-first until a short page.
    Full,
    /// Page records strictly newer than the latest stored trade.
    Incremental,
    /// Page records strictly older than the earliest stored trade,
    /// oldest-first, until an empty page.
    Historical,
}

/// One page request against the remote trade source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradePage {
    pub pair: PairKey,
    pub limit: usize,
    pub offset: usize,
    pub reverse: bool,
    /// Absent means no lower bound on the wire.
    pub minimum_timestamp: Option<i64>,
    pub maximum_timestamp: Option<i64>,
}

/// Remote read-only trade source collaborator, paged through by the
/// orchestrator. Non-2xx or a malformed body is a hard failure for that page.
#[async_trait]
pub trait TradeSource: Send + Sync {
    async fn fetch_page(&self, page: &TradePage) -> Result<Vec<Trade>, DataError>;
}

/// Drives one fetch strategy for one pair: serializes pages, commits merges
/// into the store, reports progress, honors cancellation, and mirrors
/// committed state to the cache slot.
///
/// Pages are serialized within a pair because page N+1's request depends on
/// page N's length. Per-pair exclusivity is acquired from the store before
/// the first page and released into the terminal phase afterwards.
pub struct Orchestrator<'a, S> {
    pub source: &'a S,
    pub store: &'a Mutex<TradeStore>,
    pub events: &'a broadcast::Sender<PipelineEvent>,
    /// `Some` once the initial cache load completed; saves before that must
    /// never occur, to avoid clobbering a not-yet-loaded cache.
    pub cache: Option<&'a CacheAdapter>,
    pub page_limit: usize,
}

impl<S> Orchestrator<'_, S>
where
    S: TradeSource,
{
    /// Run `strategy` to completion for `pair`. Returns the number of records
    /// fetched; cancellation is not an error and returns the count committed
    /// so far.
    pub async fn run(&self, pair: &PairKey, strategy: FetchStrategy) -> Result<usize, DataError> {
        // Historical over an empty store degrades to a full fetch with the
        // identical page sequence.
        let (prior, effective, token) = {
            let mut store = self.store.lock();
            let prior = store.phase(pair);
            let effective = match strategy {
                FetchStrategy::Historical if store.trades(pair).is_empty() => FetchStrategy::Full,
                other => other,
            };
            let token = store.begin_fetch(pair, effective)?;
            (prior, effective, token)
        };

        info!(%pair, %effective, "fetch started");

        let outcome = match effective {
            FetchStrategy::Full => self.run_full(pair, &token).await,
            FetchStrategy::Incremental => self.run_incremental(pair, &token).await,
            FetchStrategy::Historical => self.run_historical(pair, &token).await,
        };

        match outcome {
            Ok(Outcome::Completed(fetched)) => {
                let phase = match effective {
                    FetchStrategy::Full | FetchStrategy::Incremental => PairPhase::UpToDate,
                    // Extending history says nothing about recency.
                    FetchStrategy::Historical if prior == PairPhase::UpToDate => {
                        PairPhase::UpToDate
                    }
                    FetchStrategy::Historical => PairPhase::Idle,
                };
                self.store.lock().finish_fetch(pair, phase);
                info!(%pair, %effective, fetched, "fetch completed");
                let _ = self.events.send(PipelineEvent::FetchCompleted {
                    pair: pair.clone(),
                    fetched,
                });
                Ok(fetched)
            }
            Ok(Outcome::Cancelled(fetched)) => {
                self.store.lock().finish_fetch(pair, PairPhase::Idle);
                info!(%pair, %effective, fetched, "fetch cancelled");
                let _ = self.events.send(PipelineEvent::FetchCancelled { pair: pair.clone() });
                Ok(fetched)
            }
            Err(error) => {
                self.store
                    .lock()
                    .finish_fetch(pair, PairPhase::Error(error.to_string()));
                warn!(%pair, %effective, %error, "fetch failed");
                let _ = self.events.send(PipelineEvent::FetchFailed {
                    pair: pair.clone(),
                    error: error.to_string(),
                });
                Err(error)
            }
        }
    }

    /// Full backfill: newest-first from no lower bound, replacing the pair's
    /// stored set after every page so a crash mid-fetch leaves a
    /// superset-safe partial result.
    async fn run_full(
        &self,
        pair: &PairKey,
        token: &CancelToken,
    ) -> Result<Outcome, DataError> {
        let mut accumulated: Vec<Trade> = Vec::new();
        let mut offset = 0;

        loop {
            if token.is_cancelled() {
                return Ok(Outcome::Cancelled(accumulated.len()));
            }

            let page = self
                .source
                .fetch_page(&TradePage {
                    pair: pair.clone(),
                    limit: self.page_limit,
                    offset,
                    reverse: true,
                    minimum_timestamp: None,
                    maximum_timestamp: None,
                })
                .await?;
            let page_len = page.len();
            accumulated.extend(page);

            {
                let mut store = self.store.lock();
                store.replace_trades(pair, accumulated.clone());
                store.set_progress(pair, accumulated.len());
            }
            self.persist();
            self.progress(pair, accumulated.len());

            debug!(%pair, offset, page_len, total = accumulated.len(), "full page committed");

            // Short page is the sole exhaustion signal.
            if page_len < self.page_limit {
                return Ok(Outcome::Completed(accumulated.len()));
            }
            offset += self.page_limit;
        }
    }

    /// Forward-fill: accumulate records strictly newer than the latest stored
    /// trade, prepending them only on completion. Nothing is committed if the
    /// strategy fails or is cancelled mid-loop.
    async fn run_incremental(
        &self,
        pair: &PairKey,
        token: &CancelToken,
    ) -> Result<Outcome, DataError> {
        let latest = self.store.lock().latest_timestamp(pair);
        let mut newer: Vec<Trade> = Vec::new();
        let mut offset = 0;

        loop {
            if token.is_cancelled() {
                return Ok(Outcome::Cancelled(0));
            }

            let page = self
                .source
                .fetch_page(&TradePage {
                    pair: pair.clone(),
                    limit: self.page_limit,
                    offset,
                    reverse: true,
                    minimum_timestamp: Some(latest + 1),
                    maximum_timestamp: None,
                })
                .await?;
            let page_len = page.len();
            newer.extend(page);

            self.store.lock().set_progress(pair, newer.len());
            self.progress(pair, newer.len());

            debug!(%pair, offset, page_len, total = newer.len(), "incremental page fetched");

            if page_len < self.page_limit {
                break;
            }
            offset += self.page_limit;
        }

        let fetched = newer.len();
        self.store.lock().prepend_trades(pair, newer);
        self.persist();
        Ok(Outcome::Completed(fetched))
    }

    /// Historical backfill: accumulate records strictly older than the
    /// earliest stored trade in ascending order, appending at the tail only
    /// on completion. Stops on an empty page.
    async fn run_historical(
        &self,
        pair: &PairKey,
        token: &CancelToken,
    ) -> Result<Outcome, DataError> {
        let earliest = self
            .store
            .lock()
            .earliest_timestamp(pair)
            .expect("historical over an empty store degrades to full");
        let mut older: Vec<Trade> = Vec::new();
        let mut offset = 0;

        loop {
            if token.is_cancelled() {
                return Ok(Outcome::Cancelled(0));
            }

            let page = self
                .source
                .fetch_page(&TradePage {
                    pair: pair.clone(),
                    limit: self.page_limit,
                    offset,
                    reverse: false,
                    minimum_timestamp: None,
                    maximum_timestamp: Some(earliest - 1),
                })
                .await?;

            if page.is_empty() {
                break;
            }
            let page_len = page.len();
            older.extend(page);

            self.store.lock().set_progress(pair, older.len());
            self.progress(pair, older.len());

            debug!(%pair, offset, page_len, total = older.len(), "historical page fetched");

            offset += self.page_limit;
        }

        let fetched = older.len();
        self.store.lock().append_trades(pair, older);
        self.persist();
        Ok(Outcome::Completed(fetched))
    }

    fn progress(&self, pair: &PairKey, fetched: usize) {
        let _ = self.events.send(PipelineEvent::FetchProgress {
            pair: pair.clone(),
            fetched,
        });
    }

    /// Mirror committed state to the cache slot. Write failures never abort
    /// the fetch that triggered them.
    fn persist(&self) {
        let Some(cache) = self.cache else {
            return;
        };
        let (pair_trades, display_names) = self.store.lock().snapshot();
        let record = CacheRecord::new(pair_trades, display_names);
        if let Err(error) = cache.save(&record) {
            warn!(%error, "trade cache save failed after fetch commit");
        }
    }
}

enum Outcome {
    Completed(usize),
    Cancelled(usize),
}
