//! Durable credential pool and client key registry.
//!
//! Both tables are CSV files addressed by row position. Every mutation
//! rewrites the whole table under a per-table guard and then rebuilds the
//! in-memory snapshot from disk, so readers only ever observe complete lists.

use std::sync::{Mutex, MutexGuard};

pub mod client_keys;
pub mod credential_pool;
pub mod errored_tokens;
pub mod keyed_records;
pub mod table_store;

pub use client_keys::{ClientKey, ClientKeyRegistry, USERS_FILE, USERS_HEADER};
pub use credential_pool::{mask_token, Credential, CredentialPool, ACCOUNTS_FILE, ACCOUNTS_HEADER};
pub use errored_tokens::{ErroredTokens, ERROR_TOKENS_FILE};
pub use keyed_records::{
    KeyedRecordStore, RefreshRecord, RefreshRecords, SessionEndpointRecords, REFRESH_MAP_FILE,
    WSS_MAP_FILE,
};
pub use table_store::{parse_bulk_rows, TableRow, TableStore, TABLE_ARITY};

/// Errors raised by pool and registry operations.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("row position {position} is out of range for a table of {len} rows")]
    IndexOutOfRange { position: usize, len: usize },
    #[error("pool storage failure: {0}")]
    Storage(String),
}

impl PoolError {
    pub(crate) fn storage(error: anyhow::Error) -> Self {
        Self::Storage(format!("{error:#}"))
    }
}

pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
