use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use arc_swap::ArcSwap;
use relay_core::{discard_store_file, replace_store_file};
use serde::Serialize;

use crate::{lock_or_recover, PoolError};

/// Number of columns every table row carries.
pub const TABLE_ARITY: usize = 3;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
/// One stored table row. Every field read from disk is kept, so rows with
/// extra or missing columns are written back unchanged.
pub struct TableRow(Vec<String>);

impl TableRow {
    pub fn new(first: impl Into<String>, second: impl Into<String>, third: impl Into<String>) -> Self {
        Self(vec![first.into(), second.into(), third.into()])
    }

    /// Builds a row from parsed fields; any other field count is rejected.
    pub fn from_fields(fields: Vec<String>) -> Option<Self> {
        (fields.len() == TABLE_ARITY).then_some(Self(fields))
    }

    fn from_record(record: &csv::StringRecord) -> Self {
        Self(record.iter().map(str::to_string).collect())
    }

    /// Field at `index`, or an empty string when the stored row is short.
    pub fn column(&self, index: usize) -> &str {
        self.0.get(index).map(String::as_str).unwrap_or_default()
    }

    pub fn fields(&self) -> &[String] {
        &self.0
    }
}

/// Splits bulk upload text into rows: one row per line, comma separated,
/// fields trimmed. Lines that do not yield exactly three fields are dropped.
pub fn parse_bulk_rows(text: &str) -> Vec<TableRow> {
    text.trim()
        .split('\n')
        .filter_map(|line| {
            let fields = line
                .split(',')
                .map(|field| field.trim().to_string())
                .collect::<Vec<_>>();
            TableRow::from_fields(fields)
        })
        .collect()
}

#[derive(Debug, Clone)]
/// Public struct `TableStore` used across Relay components.
pub struct TableStore {
    path: PathBuf,
    header: [&'static str; TABLE_ARITY],
}

impl TableStore {
    pub fn new(path: PathBuf, header: [&'static str; TABLE_ARITY]) -> Self {
        Self { path, header }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads data rows in storage order. A missing file is an empty table.
    /// Rows keep their own field count; short rows still hold their position.
    pub fn read_rows(&self) -> Result<Vec<TableRow>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        let mut rows = Vec::new();
        for record in reader.records() {
            let record =
                record.with_context(|| format!("failed to parse {}", self.path.display()))?;
            rows.push(TableRow::from_record(&record));
        }
        Ok(rows)
    }

    /// Rewrites the whole table, header first, with CRLF record terminators.
    pub fn write_rows(&self, rows: &[TableRow]) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .terminator(csv::Terminator::CRLF)
            .from_writer(Vec::new());
        writer
            .write_record(self.header)
            .context("failed to encode table header")?;
        for row in rows {
            writer
                .write_record(&row.0)
                .context("failed to encode table row")?;
        }
        let bytes = writer.into_inner().map_err(|error| {
            anyhow!(
                "failed to flush table buffer for {}: {}",
                self.path.display(),
                error.error()
            )
        })?;
        let payload = String::from_utf8(bytes).context("table payload is not utf-8")?;
        replace_store_file(&self.path, &payload)
    }

    pub fn remove(&self) -> Result<bool> {
        discard_store_file(&self.path)
    }
}

/// A table plus its guard and in-memory snapshot.
pub(crate) struct RowTable {
    store: TableStore,
    guard: Mutex<()>,
    rows: ArcSwap<Vec<TableRow>>,
}

impl RowTable {
    pub(crate) fn open(store: TableStore) -> Result<Self, PoolError> {
        let rows = store.read_rows().map_err(PoolError::storage)?;
        Ok(Self {
            store,
            guard: Mutex::new(()),
            rows: ArcSwap::from_pointee(rows),
        })
    }

    pub(crate) fn snapshot(&self) -> Arc<Vec<TableRow>> {
        self.rows.load_full()
    }

    pub(crate) fn reload(&self) -> Result<Arc<Vec<TableRow>>, PoolError> {
        let _guard = lock_or_recover(&self.guard);
        self.reload_locked()
    }

    pub(crate) fn append(&self, rows: Vec<TableRow>) -> Result<usize, PoolError> {
        let _guard = lock_or_recover(&self.guard);
        let mut current = self.store.read_rows().map_err(PoolError::storage)?;
        let added = rows.len();
        current.extend(rows);
        self.store.write_rows(&current).map_err(PoolError::storage)?;
        self.reload_locked()?;
        Ok(added)
    }

    pub(crate) fn replace(&self, position: usize, row: TableRow) -> Result<(), PoolError> {
        let _guard = lock_or_recover(&self.guard);
        let mut current = self.store.read_rows().map_err(PoolError::storage)?;
        let len = current.len();
        let slot = current
            .get_mut(position)
            .ok_or(PoolError::IndexOutOfRange { position, len })?;
        *slot = row;
        self.store.write_rows(&current).map_err(PoolError::storage)?;
        self.reload_locked()?;
        Ok(())
    }

    pub(crate) fn remove(&self, position: usize) -> Result<TableRow, PoolError> {
        let _guard = lock_or_recover(&self.guard);
        let mut current = self.store.read_rows().map_err(PoolError::storage)?;
        let len = current.len();
        if position >= len {
            return Err(PoolError::IndexOutOfRange { position, len });
        }
        let removed = current.remove(position);
        self.store.write_rows(&current).map_err(PoolError::storage)?;
        self.reload_locked()?;
        Ok(removed)
    }

    pub(crate) fn clear(&self) -> Result<bool, PoolError> {
        let _guard = lock_or_recover(&self.guard);
        let removed = self.store.remove().map_err(PoolError::storage)?;
        self.reload_locked()?;
        Ok(removed)
    }

    fn reload_locked(&self) -> Result<Arc<Vec<TableRow>>, PoolError> {
        let rows = Arc::new(self.store.read_rows().map_err(PoolError::storage)?);
        self.rows.store(Arc::clone(&rows));
        Ok(rows)
    }
}
