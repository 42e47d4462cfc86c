use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Identifier for a tradable counter-asset against QORT (the foreign
/// blockchain side of a cross-chain pair).
///
/// The store accepts arbitrary keys; [`ForeignChain`] catalogs the chains the
/// reference deployment lists.
#[derive(
    Debug,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Deserialize,
    Serialize,
    derive_more::Display,
    derive_more::Constructor,
)]
pub struct PairKey(pub SmolStr);

impl PairKey {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for PairKey {
    fn from(value: &str) -> Self {
        Self(SmolStr::new(value))
    }
}

impl From<String> for PairKey {
    fn from(value: String) -> Self {
        Self(SmolStr::new(value))
    }
}

impl From<ForeignChain> for PairKey {
    fn from(value: ForeignChain) -> Self {
        value.pair_key()
    }
}

/// Foreign chains QORT trades against in the reference deployment.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ForeignChain {
    Litecoin,
    Bitcoin,
    Ravencoin,
    Digibyte,
    Piratechain,
    Dogecoin,
}

impl ForeignChain {
    /// All chains, in the order the reference deployment lists them.
    pub const ALL: [ForeignChain; 6] = [
        ForeignChain::Litecoin,
        ForeignChain::Bitcoin,
        ForeignChain::Ravencoin,
        ForeignChain::Digibyte,
        ForeignChain::Piratechain,
        ForeignChain::Dogecoin,
    ];

    /// Wire identifier used by the `foreignBlockchain` query parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            ForeignChain::Litecoin => "LITECOIN",
            ForeignChain::Bitcoin => "BITCOIN",
            ForeignChain::Ravencoin => "RAVENCOIN",
            ForeignChain::Digibyte => "DIGIBYTE",
            ForeignChain::Piratechain => "PIRATECHAIN",
            ForeignChain::Dogecoin => "DOGECOIN",
        }
    }

    /// Display ticker for UI summaries.
    pub fn ticker(&self) -> &'static str {
        match self {
            ForeignChain::Litecoin => "LTC",
            ForeignChain::Bitcoin => "BTC",
            ForeignChain::Ravencoin => "RVN",
            ForeignChain::Digibyte => "DGB",
            ForeignChain::Piratechain => "ARRR",
            ForeignChain::Dogecoin => "DOGE",
        }
    }

    pub fn pair_key(&self) -> PairKey {
        PairKey(SmolStr::new_static(self.as_str()))
    }
}

impl std::fmt::Display for ForeignChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Executed cross-chain trade, immutable once fetched.
///
/// Amounts stay wire decimal strings; price math parses on demand. A trade is
/// valid for pricing only if `qortAmount` parses to a finite value `> 0` and
/// the resulting price `foreignAmount / qortAmount` is finite.
///
/// ### Raw Payload Example
/// ```json
/// {
///     "tradeTimestamp": 1718885522000,
///     "qortAmount": "10.00000000",
///     "btcAmount": "0.00100000",
///     "foreignAmount": "0.00100000",
///     "buyerReceivingAddress": "QRTDeSAndboxAddr111111111111111111",
///     "sellerAddress": "QRTDeSAndboxAddr222222222222222222"
/// }
/// ```
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub trade_timestamp: i64,

    pub qort_amount: String,

    pub foreign_amount: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer_receiving_address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller_address: Option<String>,
}

impl Trade {
    /// Parsed QORT quantity, NaN when the wire string is malformed.
    pub fn qort(&self) -> f64 {
        self.qort_amount.parse::<f64>().unwrap_or(f64::NAN)
    }

    /// Parsed foreign-asset quantity, NaN when the wire string is malformed.
    pub fn foreign(&self) -> f64 {
        self.foreign_amount.parse::<f64>().unwrap_or(f64::NAN)
    }

    /// Price in foreign units per QORT, when this trade is valid for pricing.
    pub fn price(&self) -> Option<f64> {
        let q = self.qort();
        if !q.is_finite() || q <= 0.0 {
            return None;
        }
        let price = self.foreign() / q;
        price.is_finite().then_some(price)
    }
}
