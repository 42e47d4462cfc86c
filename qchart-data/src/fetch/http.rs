use crate::{
    error::DataError,
    fetch::{TradePage, TradeSource},
    trade::Trade,
};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

/// Remote trade source backed by the Qortal core HTTP API:
/// `GET {base}/crosschain/trades?foreignBlockchain=..&limit=..&offset=..&reverse=..`.
///
/// `minimumTimestamp` is omitted from the query when absent (no lower bound);
/// non-2xx is a hard failure for the page; bodies are decoded strictly so a
/// malformed response surfaces as a typed error instead of NaNs downstream.
#[derive(Debug, Clone)]
pub struct HttpTradeSource {
    client: Client,
    base: Url,
}

impl HttpTradeSource {
    pub fn new(client: Client, base: Url) -> Self {
        Self { client, base }
    }

    pub fn from_base(base: Url) -> Self {
        Self::new(Client::new(), base)
    }

    fn trades_url(&self) -> Result<Url, DataError> {
        Ok(self.base.join("crosschain/trades")?)
    }
}

#[async_trait]
impl TradeSource for HttpTradeSource {
    async fn fetch_page(&self, page: &TradePage) -> Result<Vec<Trade>, DataError> {
        let url = self.trades_url()?;

        let limit = page.limit.to_string();
        let offset = page.offset.to_string();
        let reverse = page.reverse.to_string();
        let mut query: Vec<(&str, &str)> = vec![
            ("foreignBlockchain", page.pair.as_str()),
            ("limit", &limit),
            ("offset", &offset),
            ("reverse", &reverse),
        ];
        let minimum = page.minimum_timestamp.map(|ts| ts.to_string());
        if let Some(minimum) = minimum.as_deref() {
            query.push(("minimumTimestamp", minimum));
        }
        let maximum = page.maximum_timestamp.map(|ts| ts.to_string());
        if let Some(maximum) = maximum.as_deref() {
            query.push(("maximumTimestamp", maximum));
        }

        debug!(pair = %page.pair, offset = page.offset, "requesting trade page");

        let response = self.client.get(url).query(&query).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DataError::Http {
                status,
                context: format!("crosschain/trades for {}", page.pair),
            });
        }

        let body = response.text().await?;
        serde_json::from_str::<Vec<Trade>>(&body).map_err(|source| DataError::InvalidResponse {
            context: format!("crosschain/trades for {}", page.pair),
            source,
        })
    }
}
