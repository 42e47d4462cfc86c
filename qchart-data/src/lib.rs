//! # QChart-Data
//! Trade data pipeline for charting QORT cross-chain trades: a paginated fetch
//! orchestrator (full / incremental / historical), a versioned persistent trade
//! cache keyed by trading pair, outlier-filtering policies, a fixed-interval
//! OHLCV candle aggregator, and an address → display-name resolver.
//!
//! The UI layer is an external collaborator: it calls into [`pipeline::TradePipeline`]
//! and renders its outputs. Nothing in this crate renders, routes, or themes.
//!
//! ## Data flow
//! [`fetch`] → [`store::TradeStore`] → ([`filter`] → [`candle`]) for chart
//! consumption, and [`store::TradeStore`] → [`names`] for UI summaries.
//! [`cache`] mirrors the store and resolved names to durable storage after
//! every mutation and restores them at startup.

/// Versioned persistent cache adapter (JSON slot with schema version guard).
pub mod cache;

/// OHLCV candle aggregation: fixed-interval buckets, UTC calendar-day buckets,
/// SMA overlay series, and chart period selection.
pub mod candle;

/// Pipeline configuration with environment overrides.
pub mod config;

/// All errors generated in `qchart-data`.
pub mod error;

/// Fetch orchestrator (full / incremental / historical strategies) and the
/// HTTP trade source it pages through.
pub mod fetch;

/// Outlier-filtering policies applied to trade sets before charting.
pub mod filter;

/// Address → display-name resolution with deduplication and batching.
pub mod names;

/// Facade owning the store, cache, and collaborators; the API the UI calls.
pub mod pipeline;

/// Per-pair trade summaries and merged cross-pair history.
pub mod stats;

/// In-memory trade store: pair-keyed trade sets, display names, per-pair
/// fetch state machine.
pub mod store;

/// Trade wire/store model and the foreign-chain catalog.
pub mod trade;

pub use error::DataError;
pub use pipeline::TradePipeline;
pub use trade::{ForeignChain, PairKey, Trade};
