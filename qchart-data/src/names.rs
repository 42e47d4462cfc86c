use crate::{
    cache::{CacheAdapter, CacheRecord},
    error::DataError,
    pipeline::PipelineEvent,
    store::{CancelToken, TradeStore},
};
use async_trait::async_trait;
use fnv::FnvHashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use url::Url;

/// Terminal sentinel for addresses whose lookup failed or returned nothing.
/// Cacheable: a sentinel entry is never re-fetched.
pub const NO_NAME: &str = "No Name";

/// One registered name entry returned by the name service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NameEntry {
    pub name: String,
    pub owner: String,
}

/// External name-lookup collaborator: zero-or-more entries per address,
/// limited to a small page.
#[async_trait]
pub trait NameLookup: Send + Sync {
    async fn lookup(&self, address: &str) -> Result<Vec<NameEntry>, DataError>;
}

/// Name service backed by the Qortal core HTTP API:
/// `GET {base}/names/address/{address}?limit=1`.
#[derive(Debug, Clone)]
pub struct HttpNameLookup {
    client: Client,
    base: Url,
}

impl HttpNameLookup {
    pub fn new(client: Client, base: Url) -> Self {
        Self { client, base }
    }

    pub fn from_base(base: Url) -> Self {
        Self::new(Client::new(), base)
    }
}

#[async_trait]
impl NameLookup for HttpNameLookup {
    async fn lookup(&self, address: &str) -> Result<Vec<NameEntry>, DataError> {
        let url = self.base.join(&format!("names/address/{address}"))?;
        let response = self
            .client
            .get(url)
            .query(&[("limit", "1")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DataError::Http {
                status,
                context: format!("names/address/{address}"),
            });
        }

        let body = response.text().await?;
        serde_json::from_str::<Vec<NameEntry>>(&body).map_err(|source| {
            DataError::InvalidResponse {
                context: format!("names/address/{address}"),
                source,
            }
        })
    }
}

/// Resolves counterparty addresses to display names, deduplicating against
/// the already-resolved map and within the call.
///
/// Large unresolved sets are processed in fixed-size batches to bound
/// concurrent outbound lookups; lookups within a batch run concurrently. Each
/// completed batch commits names to the store and mirrors them to the cache
/// slot. A failed or empty lookup records the [`NO_NAME`] sentinel and is not
/// retried.
pub struct Resolver<'a, N> {
    pub lookup: &'a N,
    pub store: &'a Mutex<TradeStore>,
    pub events: &'a broadcast::Sender<PipelineEvent>,
    /// `Some` once the initial cache load completed (write-after-load).
    pub cache: Option<&'a CacheAdapter>,
    pub batch_size: usize,
}

impl<N> Resolver<'_, N>
where
    N: NameLookup,
{
    /// Resolve `addresses`, skipping known and intra-call duplicates. Returns
    /// the names resolved by this call (sentinels included). The cancel flag
    /// is honored between batches.
    pub async fn resolve(
        &self,
        addresses: impl IntoIterator<Item = String>,
        token: &CancelToken,
    ) -> FnvHashMap<String, String> {
        let unresolved: Vec<String> = {
            let store = self.store.lock();
            let mut seen = fnv::FnvHashSet::default();
            addresses
                .into_iter()
                .filter(|addr| {
                    !addr.is_empty()
                        && store.display_name(addr).is_none()
                        && seen.insert(addr.clone())
                })
                .collect()
        };

        let mut resolved = FnvHashMap::default();
        if unresolved.is_empty() {
            return resolved;
        }

        let mut remaining = unresolved.len();
        self.store.lock().set_names_remaining(remaining);
        let _ = self
            .events
            .send(PipelineEvent::NamesProgress { remaining });

        for batch in unresolved.chunks(self.batch_size.max(1)) {
            if token.is_cancelled() {
                debug!(remaining, "name resolution cancelled between batches");
                return resolved;
            }

            let lookups = batch.iter().map(|addr| self.resolve_one(addr));
            let batch_names: Vec<(String, String)> = join_all(lookups).await;

            remaining = remaining.saturating_sub(batch.len());
            {
                let mut store = self.store.lock();
                store.insert_names(batch_names.iter().cloned());
                store.set_names_remaining(remaining);
            }
            self.persist();
            let _ = self
                .events
                .send(PipelineEvent::NamesProgress { remaining });

            resolved.extend(batch_names);
        }

        let _ = self.events.send(PipelineEvent::NamesCompleted);
        resolved
    }

    /// Scan the store for every buyer and seller address not yet resolved and
    /// resolve them.
    pub async fn resolve_missing(&self, token: &CancelToken) -> FnvHashMap<String, String> {
        let unresolved = self.store.lock().unresolved_addresses();
        self.resolve(unresolved, token).await
    }

    /// Resolution policy: the entry whose owner equals the queried address,
    /// else the first returned entry; blank, empty, or failed lookups yield
    /// the sentinel.
    async fn resolve_one(&self, address: &str) -> (String, String) {
        let name = match self.lookup.lookup(address).await {
            Ok(entries) => entries
                .iter()
                .find(|entry| entry.owner == address)
                .or_else(|| entries.first())
                .map(|entry| entry.name.trim().to_string())
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| NO_NAME.to_string()),
            Err(error) => {
                warn!(%address, %error, "name lookup failed, caching sentinel");
                NO_NAME.to_string()
            }
        };
        (address.to_string(), name)
    }

    fn persist(&self) {
        let Some(cache) = self.cache else {
            return;
        };
        let (pair_trades, display_names) = self.store.lock().snapshot();
        let record = CacheRecord::new(pair_trades, display_names);
        if let Err(error) = cache.save(&record) {
            warn!(%error, "trade cache save failed after name batch");
        }
    }
}
