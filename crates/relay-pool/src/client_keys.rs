use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::table_store::{RowTable, TableRow, TableStore};
use crate::PoolError;

pub const USERS_FILE: &str = "users.csv";
pub const USERS_HEADER: [&str; 3] = ["User", "Key", "Note"];

const KEY_COLUMN: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `ClientKey` used across Relay components.
pub struct ClientKey {
    pub identifier: String,
    pub key: String,
    pub note: String,
}

impl From<&TableRow> for ClientKey {
    fn from(row: &TableRow) -> Self {
        Self {
            identifier: row.column(0).to_string(),
            key: row.column(KEY_COLUMN).replace(' ', ""),
            note: row.column(2).to_string(),
        }
    }
}

/// Caller-facing API keys backed by `users.csv`.
pub struct ClientKeyRegistry {
    table: RowTable,
}

impl ClientKeyRegistry {
    pub fn open(data_dir: &Path) -> Result<Self, PoolError> {
        let table = RowTable::open(TableStore::new(data_dir.join(USERS_FILE), USERS_HEADER))?;
        info!(keys = table.snapshot().len(), "client key registry loaded");
        Ok(Self { table })
    }

    pub fn reload(&self) -> Result<(), PoolError> {
        let rows = self.table.reload()?;
        info!(rows = rows.len(), "client key registry reloaded");
        Ok(())
    }

    pub fn rows(&self) -> Arc<Vec<TableRow>> {
        self.table.snapshot()
    }

    pub fn client_keys(&self) -> Vec<ClientKey> {
        self.rows().iter().map(ClientKey::from).collect()
    }

    /// Key column in storage order, spaces stripped, empty cells skipped.
    pub fn keys(&self) -> Vec<String> {
        self.rows()
            .iter()
            .map(|row| row.column(KEY_COLUMN).replace(' ', ""))
            .filter(|key| !key.is_empty())
            .collect()
    }

    /// Admission check: the presented key matches the override or any
    /// registered key. Missing or blank keys are never admitted.
    pub fn is_authorized(&self, presented: Option<&str>, override_key: Option<&str>) -> bool {
        let Some(presented) = presented.map(str::trim).filter(|key| !key.is_empty()) else {
            return false;
        };
        if override_key.is_some_and(|expected| expected == presented) {
            return true;
        }
        self.rows()
            .iter()
            .any(|row| row.column(KEY_COLUMN).replace(' ', "") == presented)
    }

    pub fn append_rows(&self, rows: Vec<TableRow>) -> Result<usize, PoolError> {
        let added = self.table.append(rows)?;
        info!(added, "client key rows appended");
        Ok(added)
    }

    pub fn update_row(&self, position: usize, row: TableRow) -> Result<(), PoolError> {
        self.table.replace(position, row)?;
        info!(position, "client key row updated");
        Ok(())
    }

    pub fn remove_row(&self, position: usize) -> Result<(), PoolError> {
        self.table.remove(position)?;
        info!(position, "client key row removed");
        Ok(())
    }

    pub fn remove_all(&self) -> Result<(), PoolError> {
        let removed = self.table.clear()?;
        info!(removed, "client key table cleared");
        Ok(())
    }
}
