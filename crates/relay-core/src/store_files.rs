//! Whole-file replacement for the gateway's on-disk stores.
//!
//! Every store (tables, keyed record maps, the config overlay) is rewritten in
//! full on each mutation. The new content is staged next to the target and
//! swapped in with a rename, so a concurrent reader sees either the previous
//! or the next version of the store.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Context, Result};

static STAGING_SEQUENCE: AtomicU64 = AtomicU64::new(0);

fn staging_path(store: &Path, dir: &Path) -> PathBuf {
    let stem = store
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("store");
    let sequence = STAGING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    dir.join(format!(".{stem}.relay-staged-{}-{sequence}", std::process::id()))
}

/// Replaces the store file at `store` with `content`.
pub fn replace_store_file(store: &Path, content: &str) -> Result<()> {
    if store.as_os_str().is_empty() {
        bail!("store path cannot be empty");
    }
    if store.is_dir() {
        bail!("store path '{}' is a directory", store.display());
    }
    let dir = match store.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create store directory {}", dir.display()))?;

    let staged = staging_path(store, dir);
    let written = File::create(&staged)
        .and_then(|mut file| {
            file.write_all(content.as_bytes())?;
            file.sync_all()
        })
        .with_context(|| format!("failed to stage store file {}", staged.display()));
    if let Err(error) = written {
        let _ = std::fs::remove_file(&staged);
        return Err(error);
    }
    if let Err(error) = std::fs::rename(&staged, store) {
        let _ = std::fs::remove_file(&staged);
        return Err(error).with_context(|| {
            format!("failed to swap staged content into {}", store.display())
        });
    }
    Ok(())
}

/// Deletes the store file. Returns `false` when there was nothing to delete.
pub fn discard_store_file(store: &Path) -> Result<bool> {
    match std::fs::remove_file(store) {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(error) => Err(error)
            .with_context(|| format!("failed to delete store file {}", store.display())),
    }
}
