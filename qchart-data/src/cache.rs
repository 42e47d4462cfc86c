use crate::trade::{PairKey, Trade};
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// Bump when the persisted payload schema changes. A mismatched version is
/// treated as absent, never migrated.
pub const CACHE_VERSION: u32 = 1;

/// Durable mirror of the trade store plus resolved display names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    pub version: u32,
    pub pair_trades: FnvHashMap<PairKey, Vec<Trade>>,
    pub display_names: FnvHashMap<String, String>,
}

impl CacheRecord {
    pub fn new(
        pair_trades: FnvHashMap<PairKey, Vec<Trade>>,
        display_names: FnvHashMap<String, String>,
    ) -> Self {
        Self {
            version: CACHE_VERSION,
            pair_trades,
            display_names,
        }
    }
}

/// Persistent cache adapter over a single JSON slot.
///
/// Corruption and version mismatches on the read side are recovered locally
/// by discarding the payload and starting empty; only write failures surface
/// as errors.
#[derive(Debug, Clone)]
pub struct CacheAdapter {
    path: PathBuf,
}

impl CacheAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cache slot. Absent, malformed, or version-mismatched payloads
    /// all yield `None`.
    pub fn load(&self) -> Option<CacheRecord> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(path = %self.path.display(), %err, "failed to read trade cache, starting empty");
                return None;
            }
        };

        let record = match serde_json::from_slice::<CacheRecord>(&bytes) {
            Ok(record) => record,
            Err(err) => {
                warn!(path = %self.path.display(), %err, "failed to parse trade cache, starting empty");
                return None;
            }
        };

        if record.version != CACHE_VERSION {
            warn!(
                found = record.version,
                expected = CACHE_VERSION,
                "trade cache version mismatch, starting empty"
            );
            return None;
        }

        debug!(
            pairs = record.pair_trades.len(),
            names = record.display_names.len(),
            "trade cache loaded"
        );
        Some(record)
    }

    /// Write the slot atomically (temp file + rename) so a crash mid-write
    /// never leaves a torn payload behind.
    pub fn save(&self, record: &CacheRecord) -> std::io::Result<()> {
        let json = serde_json::to_vec(record)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), bytes = json.len(), "trade cache saved");
        Ok(())
    }

    /// Delete the slot. Missing files are fine.
    pub fn clear(&self) -> std::io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with_trade() -> CacheRecord {
        let mut pair_trades = FnvHashMap::default();
        pair_trades.insert(
            PairKey::from("LITECOIN"),
            vec![Trade {
                trade_timestamp: 1718885522000,
                qort_amount: "10".to_string(),
                foreign_amount: "0.5".to_string(),
                buyer_receiving_address: Some("Qbuyer".to_string()),
                seller_address: None,
            }],
        );
        let mut display_names = FnvHashMap::default();
        display_names.insert("Qbuyer".to_string(), "alice".to_string());
        CacheRecord::new(pair_trades, display_names)
    }

    #[test]
    fn test_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = CacheAdapter::new(dir.path().join("trades.json"));

        assert!(adapter.load().is_none());

        let record = record_with_trade();
        adapter.save(&record).unwrap();

        let loaded = adapter.load().expect("saved cache should load");
        assert_eq!(loaded, record);
    }

    #[test]
    fn test_version_mismatch_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades.json");
        let adapter = CacheAdapter::new(&path);

        let mut record = record_with_trade();
        record.version = CACHE_VERSION + 1;
        fs::write(&path, serde_json::to_vec(&record).unwrap()).unwrap();

        assert!(adapter.load().is_none());
    }

    #[test]
    fn test_corrupt_payload_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades.json");
        let adapter = CacheAdapter::new(&path);

        fs::write(&path, b"{not json").unwrap();
        assert!(adapter.load().is_none());
    }

    #[test]
    fn test_clear_removes_slot() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = CacheAdapter::new(dir.path().join("trades.json"));

        adapter.save(&record_with_trade()).unwrap();
        adapter.clear().unwrap();
        assert!(adapter.load().is_none());

        // Clearing an already-absent slot is fine.
        adapter.clear().unwrap();
    }
}
