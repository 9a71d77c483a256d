use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::errored_tokens::{ErroredTokens, ERROR_TOKENS_FILE};
use crate::table_store::{RowTable, TableRow, TableStore};
use crate::PoolError;

pub const ACCOUNTS_FILE: &str = "accounts.csv";
pub const ACCOUNTS_HEADER: [&str; 3] = ["Account", "Password", "Token"];

const TOKEN_COLUMN: usize = 2;

/// One upstream account: label, opaque password and the token used upstream.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub identifier: String,
    pub secret: String,
    pub token: String,
}

impl Credential {
    /// Short token prefix safe for logs.
    pub fn masked_token(&self) -> String {
        mask_token(&self.token)
    }
}

impl From<&TableRow> for Credential {
    fn from(row: &TableRow) -> Self {
        Self {
            identifier: row.column(0).to_string(),
            secret: row.column(1).to_string(),
            token: strip_spaces(row.column(TOKEN_COLUMN)),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("identifier", &self.identifier)
            .field("secret", &"[REDACTED]")
            .field("token", &self.masked_token())
            .finish()
    }
}

pub fn mask_token(token: &str) -> String {
    let prefix = token.chars().take(6).collect::<String>();
    format!("{prefix}***")
}

fn strip_spaces(raw: &str) -> String {
    raw.replace(' ', "")
}

/// Ordered set of upstream credentials backed by `accounts.csv`, plus the
/// errored-token exclusion list.
pub struct CredentialPool {
    table: RowTable,
    errored: ErroredTokens,
}

impl CredentialPool {
    pub fn open(data_dir: &Path) -> Result<Self, PoolError> {
        let table = RowTable::open(TableStore::new(
            data_dir.join(ACCOUNTS_FILE),
            ACCOUNTS_HEADER,
        ))?;
        let errored = ErroredTokens::open(data_dir.join(ERROR_TOKENS_FILE))?;
        let pool = Self { table, errored };
        info!(
            tokens = pool.tokens().len(),
            errored = pool.errored().len(),
            "credential pool loaded"
        );
        Ok(pool)
    }

    pub fn reload(&self) -> Result<(), PoolError> {
        let rows = self.table.reload()?;
        info!(rows = rows.len(), "credential pool reloaded");
        Ok(())
    }

    pub fn rows(&self) -> Arc<Vec<TableRow>> {
        self.table.snapshot()
    }

    /// Credentials with a non-empty token, in storage order.
    pub fn credentials(&self) -> Vec<Credential> {
        self.rows()
            .iter()
            .map(Credential::from)
            .filter(|credential| !credential.token.is_empty())
            .collect()
    }

    /// Token column in storage order, spaces stripped, empty cells skipped.
    pub fn tokens(&self) -> Vec<String> {
        self.rows()
            .iter()
            .map(|row| strip_spaces(row.column(TOKEN_COLUMN)))
            .filter(|token| !token.is_empty())
            .collect()
    }

    pub fn errored(&self) -> Arc<Vec<String>> {
        self.errored.snapshot()
    }

    pub fn is_errored(&self, token: &str) -> bool {
        self.errored.contains(token)
    }

    /// Distinct tokens that are not marked errored. Reporting only.
    pub fn available(&self) -> BTreeSet<String> {
        let errored = self.errored();
        self.tokens()
            .into_iter()
            .filter(|token| !errored.contains(token))
            .collect()
    }

    pub fn append_rows(&self, rows: Vec<TableRow>) -> Result<usize, PoolError> {
        let added = self.table.append(rows)?;
        info!(added, "credential rows appended");
        Ok(added)
    }

    pub fn update_row(&self, position: usize, row: TableRow) -> Result<(), PoolError> {
        self.table.replace(position, row)?;
        info!(position, "credential row updated");
        Ok(())
    }

    pub fn remove_row(&self, position: usize) -> Result<(), PoolError> {
        self.table.remove(position)?;
        info!(position, "credential row removed");
        Ok(())
    }

    /// Deletes the accounts table. Absent storage is not an error.
    pub fn remove_all(&self) -> Result<(), PoolError> {
        let removed = self.table.clear()?;
        info!(removed, "credential table cleared");
        Ok(())
    }

    pub fn record_errored(&self, token: &str) -> Result<bool, PoolError> {
        self.errored.record(token)
    }
}
