use crate::trade::PairKey;
use thiserror::Error;

/// All errors generated in `qchart-data`.
#[derive(Debug, Error)]
pub enum DataError {
    /// Remote trade source or name service answered a page with a non-2xx status.
    #[error("http status {status} fetching {context}")]
    Http {
        status: reqwest::StatusCode,
        context: String,
    },

    /// Network-level failure before a status was obtained.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The remote answered 2xx but the body did not match the expected schema.
    #[error("invalid response from {context}: {source}")]
    InvalidResponse {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// A second fetch strategy was requested for a pair that already has one
    /// in flight. Per-pair exclusivity is enforced, not assumed.
    #[error("fetch already in flight for pair: {pair}")]
    FetchInFlight { pair: PairKey },

    /// Persistent cache slot could not be written. Read-side corruption is
    /// never surfaced as an error: the payload is discarded and the store
    /// starts empty.
    #[error("cache write failed: {0}")]
    Cache(#[from] std::io::Error),

    /// The configured API base URL failed to parse.
    #[error("invalid base url: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl DataError {
    /// Determine if an error ends the current fetch strategy. Transport and
    /// status failures abort the in-flight strategy (committed pages stay);
    /// retry is a caller decision.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_terminal(&self) -> bool {
        match self {
            DataError::Http { .. } => true,
            DataError::Transport(_) => true,
            DataError::InvalidResponse { .. } => true,
            DataError::UrlParse(_) => true,
            // A busy pair is a caller sequencing problem, nothing was started.
            DataError::FetchInFlight { .. } => false,
            // Cache write failures never abort the fetch that triggered them.
            DataError::Cache(_) => false,
        }
    }
}
