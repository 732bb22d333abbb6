//! On-disk persistence for event records: `<root>/<stream_id>/<event_id>.json`.
//!
//! Shares the cache's atomic tmp+fsync+rename write discipline (see
//! [`crate::cache::persistence`]) but keyed by stream rather than
//! namespace, and with no quarantine step: a corrupt event file is simply
//! skipped during replay reconstruction, since event records (unlike cache
//! entries) are never re-read to serve a hit.

use std::{io::ErrorKind, path::PathBuf};

use tokio::io::AsyncWriteExt;

use crate::{event_store::record::EventRecord, Result};

/// Reads and writes event records under a root directory.
pub struct EventPersistence {
    root: PathBuf,
}

impl EventPersistence {
    /// Build a persistence handle rooted at `root`. Does not touch the
    /// filesystem.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn stream_dir(&self, stream_id: &str) -> PathBuf {
        self.root.join(stream_id)
    }

    /// Write a record atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream directory can't be created or any
    /// filesystem operation fails.
    pub async fn write_record(&self, record: &EventRecord) -> Result<()> {
        let dir = self.stream_dir(&record.stream_id);
        tokio::fs::create_dir_all(&dir).await?;

        let final_path = dir.join(format!("{}.json", record.event_id));
        let tmp_path = dir.join(format!("{}.json.tmp", record.event_id));

        let data = serde_json::to_vec(record)?;
        {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&tmp_path, &final_path).await?;

        Ok(())
    }

    /// Remove a record from disk. Missing files are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if removal fails for a reason other than "not found".
    pub async fn remove_record(&self, stream_id: &str, event_id: &str) -> Result<()> {
        let path = self.stream_dir(stream_id).join(format!("{event_id}.json"));
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Load every record stored for `stream_id`. Unreadable files are
    /// logged and skipped rather than aborting the load.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream directory exists but can't be read.
    pub async fn load_stream(&self, stream_id: &str) -> Result<Vec<EventRecord>> {
        let dir = self.stream_dir(stream_id);
        let mut out = Vec::new();

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match tokio::fs::read(&path).await {
                Ok(data) => match serde_json::from_slice::<EventRecord>(&data) {
                    Ok(record) => out.push(record),
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable event record"),
                },
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to read event record"),
            }
        }

        Ok(out)
    }

    /// Enumerate every stream directory under the root.
    ///
    /// # Errors
    ///
    /// Returns an error if the root directory exists but can't be read.
    pub async fn list_streams(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                out.push(entry.file_name().to_string_lossy().to_string());
            }
        }

        Ok(out)
    }

    /// Sum the on-disk byte size of every stored event record.
    ///
    /// # Errors
    ///
    /// Returns an error if the root directory exists but can't be walked.
    pub async fn disk_usage_bytes(&self) -> Result<u64> {
        let mut total = 0u64;
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        while let Some(stream_entry) = entries.next_entry().await? {
            if !stream_entry.file_type().await?.is_dir() {
                continue;
            }
            let mut files = tokio::fs::read_dir(stream_entry.path()).await?;
            while let Some(file_entry) = files.next_entry().await? {
                if let Ok(metadata) = file_entry.metadata().await {
                    total += metadata.len();
                }
            }
        }

        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn sample(stream_id: &str, event_id: &str, timestamp: i64) -> EventRecord {
        EventRecord {
            event_id: event_id.to_string(),
            stream_id: stream_id.to_string(),
            timestamp,
            random_suffix: "aaaaaaaa".to_string(),
            user_id: None,
            message: Value::String("hi".to_string()),
            encrypted: false,
        }
    }

    #[tokio::test]
    async fn write_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let p = EventPersistence::new(dir.path().to_path_buf());
        let record = sample("s1", "s1_100_aaaaaaaa", 100);
        p.write_record(&record).await.unwrap();

        let loaded = p.load_stream("s1").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].event_id, record.event_id);
    }

    #[tokio::test]
    async fn load_missing_stream_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let p = EventPersistence::new(dir.path().to_path_buf());
        assert!(p.load_stream("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_record_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let p = EventPersistence::new(dir.path().to_path_buf());
        p.remove_record("s1", "missing").await.unwrap();

        let record = sample("s1", "s1_100_aaaaaaaa", 100);
        p.write_record(&record).await.unwrap();
        p.remove_record("s1", &record.event_id).await.unwrap();
        assert!(p.load_stream("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn disk_usage_bytes_sums_all_stream_files() {
        let dir = tempfile::tempdir().unwrap();
        let p = EventPersistence::new(dir.path().to_path_buf());
        assert_eq!(p.disk_usage_bytes().await.unwrap(), 0);

        p.write_record(&sample("s1", "s1_100_aaaaaaaa", 100)).await.unwrap();
        p.write_record(&sample("s2", "s2_100_bbbbbbbb", 100)).await.unwrap();

        assert!(p.disk_usage_bytes().await.unwrap() > 0);
    }

    #[tokio::test]
    async fn list_streams_finds_directories() {
        let dir = tempfile::tempdir().unwrap();
        let p = EventPersistence::new(dir.path().to_path_buf());
        p.write_record(&sample("s1", "s1_100_aaaaaaaa", 100)).await.unwrap();
        p.write_record(&sample("s2", "s2_100_bbbbbbbb", 100)).await.unwrap();

        let mut streams = p.list_streams().await.unwrap();
        streams.sort();
        assert_eq!(streams, vec!["s1".to_string(), "s2".to_string()]);
    }
}
