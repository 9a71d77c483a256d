//! Process-wide config store: immutable snapshots for readers, persisted
//! overlay plus full reload for writers.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use arc_swap::ArcSwap;
use relay_core::replace_store_file;
use tracing::info;

use crate::settings::{ConfigUpdate, GatewaySettings};
use crate::ConfigError;

/// File name of the persisted admin overlay inside the data directory.
pub const CONFIG_OVERLAY_FILE: &str = "config.json";

/// Holds the single live [`GatewaySettings`] instance.
///
/// Readers call [`ConfigStore::snapshot`] and never block. Writers go through
/// [`ConfigStore::apply`], which validates the update, persists the merged
/// overlay, and rebuilds the live record from the startup defaults plus that
/// overlay.
pub struct ConfigStore {
    defaults: GatewaySettings,
    overlay_path: Option<PathBuf>,
    current: ArcSwap<GatewaySettings>,
    write_guard: Mutex<()>,
}

impl ConfigStore {
    /// In-memory store without persistence.
    pub fn new(defaults: GatewaySettings) -> Self {
        Self {
            current: ArcSwap::from_pointee(defaults.clone()),
            defaults,
            overlay_path: None,
            write_guard: Mutex::new(()),
        }
    }

    /// Store persisted under `data_dir`; an existing overlay is applied on top
    /// of `defaults` immediately.
    pub fn open(defaults: GatewaySettings, data_dir: &Path) -> Result<Self, ConfigError> {
        let store = Self {
            current: ArcSwap::from_pointee(defaults.clone()),
            defaults,
            overlay_path: Some(data_dir.join(CONFIG_OVERLAY_FILE)),
            write_guard: Mutex::new(()),
        };
        store.reload()?;
        Ok(store)
    }

    pub fn snapshot(&self) -> Arc<GatewaySettings> {
        self.current.load_full()
    }

    /// Applies a partial update. On error nothing is persisted and the live
    /// snapshot is unchanged.
    pub fn apply(&self, update: ConfigUpdate) -> Result<Arc<GatewaySettings>, ConfigError> {
        let _guard = lock_or_recover(&self.write_guard);

        let mut candidate = GatewaySettings::clone(&self.current.load());
        update.apply_to(&mut candidate)?;

        let Some(path) = self.overlay_path.as_deref() else {
            self.current.store(Arc::new(candidate));
            info!(settings = ?self.current.load(), "gateway config updated");
            return Ok(self.snapshot());
        };

        let mut overlay = load_overlay(path)?;
        overlay.merge(update);
        persist_overlay(path, &overlay)?;
        self.reload_locked()?;
        info!(settings = ?self.current.load(), "gateway config updated");
        Ok(self.snapshot())
    }

    /// Rebuilds the live record from defaults and the persisted overlay.
    pub fn reload(&self) -> Result<Arc<GatewaySettings>, ConfigError> {
        let _guard = lock_or_recover(&self.write_guard);
        self.reload_locked()?;
        Ok(self.snapshot())
    }

    fn reload_locked(&self) -> Result<(), ConfigError> {
        let mut settings = self.defaults.clone();
        if let Some(path) = self.overlay_path.as_deref() {
            load_overlay(path)?.apply_to(&mut settings)?;
        }
        self.current.store(Arc::new(settings));
        Ok(())
    }
}

fn load_overlay(path: &Path) -> Result<ConfigUpdate, ConfigError> {
    if !path.exists() {
        return Ok(ConfigUpdate::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))
        .map_err(ConfigError::storage)?;
    if raw.trim().is_empty() {
        return Ok(ConfigUpdate::default());
    }
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))
        .map_err(ConfigError::storage)
}

fn persist_overlay(path: &Path, overlay: &ConfigUpdate) -> Result<(), ConfigError> {
    let mut payload = serde_json::to_string_pretty(overlay)
        .context("failed to encode config overlay")
        .map_err(ConfigError::storage)?;
    payload.push('\n');
    replace_store_file(path, &payload).map_err(ConfigError::storage)
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ConfigValue;
    use tempfile::tempdir;

    #[test]
    fn functional_apply_is_visible_in_next_snapshot() {
        let store = ConfigStore::new(GatewaySettings::default());
        let before = store.snapshot();
        store
            .apply(ConfigUpdate {
                retry_times: Some(ConfigValue::from("5")),
                enable_limit: Some(ConfigValue::from("false")),
                ..ConfigUpdate::default()
            })
            .expect("apply");
        let after = store.snapshot();
        assert_eq!(after.retry_times, 5);
        assert!(!after.enable_limit);
        assert_eq!(before.retry_times, 3, "old snapshots stay immutable");
    }

    #[test]
    fn integration_overlay_survives_reopen() {
        let temp = tempdir().expect("tempdir");
        let store = ConfigStore::open(GatewaySettings::default(), temp.path()).expect("open");
        store
            .apply(ConfigUpdate {
                scheduled_refresh: Some(ConfigValue::from("yes")),
                ..ConfigUpdate::default()
            })
            .expect("first apply");
        store
            .apply(ConfigUpdate {
                history_disabled: Some(ConfigValue::from("0")),
                ..ConfigUpdate::default()
            })
            .expect("second apply");

        let reopened = ConfigStore::open(GatewaySettings::default(), temp.path()).expect("reopen");
        let snapshot = reopened.snapshot();
        assert!(snapshot.scheduled_refresh);
        assert!(!snapshot.history_disabled);
        assert!(temp.path().join(CONFIG_OVERLAY_FILE).exists());
    }

    #[test]
    fn regression_failed_update_leaves_store_and_overlay_untouched() {
        let temp = tempdir().expect("tempdir");
        let store = ConfigStore::open(GatewaySettings::default(), temp.path()).expect("open");
        let error = store
            .apply(ConfigUpdate {
                retry_times: Some(ConfigValue::from("five")),
                enable_limit: Some(ConfigValue::from("false")),
                ..ConfigUpdate::default()
            })
            .expect_err("invalid retry count");
        assert!(matches!(error, ConfigError::InvalidRetryTimes(_)));
        assert!(store.snapshot().enable_limit);
        assert!(!temp.path().join(CONFIG_OVERLAY_FILE).exists());
    }
}
