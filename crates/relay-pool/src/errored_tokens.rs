use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use arc_swap::ArcSwap;
use tracing::warn;

use crate::{lock_or_recover, PoolError};

pub const ERROR_TOKENS_FILE: &str = "error_token.txt";

/// Append-only line file of tokens rejected upstream or that failed refresh.
pub struct ErroredTokens {
    path: PathBuf,
    guard: Mutex<()>,
    tokens: ArcSwap<Vec<String>>,
}

impl ErroredTokens {
    /// Loads the file, creating an empty one when absent. Blank lines and
    /// `#` comments are skipped; duplicates collapse to the first entry.
    pub fn open(path: PathBuf) -> Result<Self, PoolError> {
        let tokens = if path.exists() {
            read_token_lines(&path)?
        } else {
            if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))
                    .map_err(PoolError::storage)?;
            }
            std::fs::write(&path, "")
                .with_context(|| format!("failed to create {}", path.display()))
                .map_err(PoolError::storage)?;
            Vec::new()
        };
        Ok(Self {
            path,
            guard: Mutex::new(()),
            tokens: ArcSwap::from_pointee(tokens),
        })
    }

    pub fn snapshot(&self) -> Arc<Vec<String>> {
        self.tokens.load_full()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.tokens.load().iter().any(|entry| entry == token)
    }

    /// Appends `token` unless already recorded. Returns whether it was new.
    pub fn record(&self, token: &str) -> Result<bool, PoolError> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(false);
        }
        let _guard = lock_or_recover(&self.guard);
        if self.contains(token) {
            return Ok(false);
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))
            .map_err(PoolError::storage)?;
        writeln!(file, "{token}")
            .with_context(|| format!("failed to append to {}", self.path.display()))
            .map_err(PoolError::storage)?;

        let mut next = Vec::clone(&self.tokens.load());
        next.push(token.to_string());
        self.tokens.store(Arc::new(next));
        warn!(errored = self.tokens.load().len(), "credential token marked as errored");
        Ok(true)
    }
}

fn read_token_lines(path: &Path) -> Result<Vec<String>, PoolError> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))
        .map_err(PoolError::storage)?;
    let mut tokens: Vec<String> = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if !tokens.iter().any(|existing| existing == line) {
            tokens.push(line.to_string());
        }
    }
    Ok(tokens)
}
