//! On-disk persistence for cache entries.
//!
//! Layout: `<root>/namespaces/<namespace>/<hex_key>.json`. Writes go
//! through a temp file, `fsync`, then a rename so a crash never leaves a
//! half-written entry behind. Corrupt files found on read are quarantined
//! by renaming them aside rather than deleted, so they can be inspected.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use tokio::io::AsyncWriteExt;

use crate::{
    cache::entry::{now_millis, PersistedEntry},
    Error, Result,
};

/// Reads and writes cache entries under a root directory.
pub struct PersistenceManager {
    root: PathBuf,
}

impl PersistenceManager {
    /// Build a manager rooted at `root`. Does not touch the filesystem.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.root.join("namespaces").join(namespace)
    }

    fn entry_path(&self, namespace: &str, hex_key: &str) -> PathBuf {
        self.namespace_dir(namespace).join(format!("{hex_key}.json"))
    }

    /// Write an entry atomically: write to a `.tmp` sibling, `fsync`, then
    /// rename over the final path.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace directory can't be created or any
    /// filesystem operation fails.
    pub async fn write_entry(&self, namespace: &str, hex_key: &str, entry: &PersistedEntry) -> Result<()> {
        let dir = self.namespace_dir(namespace);
        tokio::fs::create_dir_all(&dir).await?;

        let final_path = self.entry_path(namespace, hex_key);
        let tmp_path = dir.join(format!("{hex_key}.json.tmp"));

        let data = serde_json::to_vec(entry)?;
        {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&tmp_path, &final_path).await?;

        Ok(())
    }

    /// Read an entry back. Returns `Ok(None)` if it doesn't exist. A
    /// corrupt file is quarantined (renamed aside) and reported as
    /// [`Error::CacheCorruptEntry`] rather than silently dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is not valid JSON, or if
    /// reading it fails for a reason other than "not found".
    pub async fn read_entry(&self, namespace: &str, hex_key: &str) -> Result<Option<PersistedEntry>> {
        let path = self.entry_path(namespace, hex_key);
        self.read_entry_at(&path).await
    }

    async fn read_entry_at(&self, path: &Path) -> Result<Option<PersistedEntry>> {
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice::<PersistedEntry>(&data) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                self.quarantine(path).await;
                Err(Error::CacheCorruptEntry(format!("{}: {e}", path.display())))
            }
        }
    }

    /// Remove an entry from disk. Missing files are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if removal fails for a reason other than "not
    /// found".
    pub async fn remove_entry(&self, namespace: &str, hex_key: &str) -> Result<()> {
        let path = self.entry_path(namespace, hex_key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every on-disk entry under `namespace`. A missing namespace
    /// directory is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if removal fails for a reason other than "not
    /// found".
    pub async fn remove_namespace(&self, namespace: &str) -> Result<()> {
        match tokio::fs::remove_dir_all(self.namespace_dir(namespace)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn quarantine(&self, path: &Path) {
        let quarantine_path = path.with_extension(format!("json.corrupt.{}", now_millis()));
        if let Err(e) = tokio::fs::rename(path, &quarantine_path).await {
            tracing::warn!(path = %path.display(), error = %e, "failed to quarantine corrupt cache entry");
        } else {
            tracing::warn!(
                original = %path.display(),
                quarantined = %quarantine_path.display(),
                "quarantined corrupt cache entry"
            );
        }
    }

    /// Walk every namespace directory and load every entry found, used for
    /// eager-load startup. Entries that fail to parse are quarantined and
    /// skipped rather than aborting the whole load.
    ///
    /// # Errors
    ///
    /// Returns an error if the root directory exists but can't be read.
    pub async fn load_all(&self) -> Result<Vec<(String, String, PersistedEntry)>> {
        let namespaces_dir = self.root.join("namespaces");
        let mut out = Vec::new();

        let mut top = match tokio::fs::read_dir(&namespaces_dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };

        while let Some(ns_entry) = top.next_entry().await? {
            if !ns_entry.file_type().await?.is_dir() {
                continue;
            }
            let namespace = ns_entry.file_name().to_string_lossy().to_string();
            let mut files = tokio::fs::read_dir(ns_entry.path()).await?;

            while let Some(file_entry) = files.next_entry().await? {
                let path = file_entry.path();
                let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let Some(hex_key) = file_name.strip_suffix(".json") else {
                    continue;
                };
                if self.is_symlink_outside_root(&path).await {
                    tracing::warn!(path = %path.display(), "refusing to follow symlink outside cache root");
                    continue;
                }
                match self.read_entry_at(&path).await {
                    Ok(Some(entry)) => out.push((namespace.clone(), hex_key.to_string(), entry)),
                    Ok(None) => {}
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable cache entry"),
                }
            }
        }

        Ok(out)
    }

    async fn is_symlink_outside_root(&self, path: &Path) -> bool {
        let Ok(metadata) = tokio::fs::symlink_metadata(path).await else {
            return false;
        };
        if !metadata.file_type().is_symlink() {
            return false;
        }
        let Ok(resolved) = tokio::fs::canonicalize(path).await else {
            return true;
        };
        let Ok(root) = tokio::fs::canonicalize(&self.root).await else {
            return true;
        };
        !resolved.starts_with(root)
    }
}
