//! JSON object maps keyed by credential token.
//!
//! The refresh records hold the last access token minted for a credential and
//! when it was minted. Session endpoint records are kept opaque.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use arc_swap::ArcSwap;
use relay_core::replace_store_file;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{lock_or_recover, PoolError};

pub const REFRESH_MAP_FILE: &str = "refresh_map.json";
pub const WSS_MAP_FILE: &str = "wss_map.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Public struct `RefreshRecord` used across Relay components.
pub struct RefreshRecord {
    pub token: String,
    pub timestamp: u64,
}

pub type RefreshRecords = KeyedRecordStore<RefreshRecord>;
pub type SessionEndpointRecords = KeyedRecordStore<serde_json::Value>;

/// Whole-file JSON map with snapshot reads and serialized writes.
pub struct KeyedRecordStore<T> {
    path: PathBuf,
    guard: Mutex<()>,
    records: ArcSwap<BTreeMap<String, T>>,
}

impl<T> KeyedRecordStore<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    pub fn open(path: PathBuf) -> Result<Self, PoolError> {
        let records = load_map(&path)?;
        Ok(Self {
            path,
            guard: Mutex::new(()),
            records: ArcSwap::from_pointee(records),
        })
    }

    pub fn len(&self) -> usize {
        self.records.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.load().is_empty()
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.records.load().get(key).cloned()
    }

    pub fn snapshot(&self) -> Arc<BTreeMap<String, T>> {
        self.records.load_full()
    }

    /// Inserts or replaces `key` and persists the full map before returning.
    pub fn insert(&self, key: &str, value: T) -> Result<(), PoolError> {
        let _guard = lock_or_recover(&self.guard);
        let mut next = BTreeMap::clone(&self.records.load());
        next.insert(key.to_string(), value);
        let mut payload = serde_json::to_string_pretty(&next)
            .context("failed to encode keyed records")
            .map_err(PoolError::storage)?;
        payload.push('\n');
        replace_store_file(&self.path, &payload).map_err(PoolError::storage)?;
        self.records.store(Arc::new(next));
        Ok(())
    }
}

fn load_map<T: DeserializeOwned>(path: &Path) -> Result<BTreeMap<String, T>, PoolError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))
        .map_err(PoolError::storage)?;
    if raw.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))
        .map_err(PoolError::storage)
}
