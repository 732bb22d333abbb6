//! Persistent, per-stream event log supporting resumption after a
//! reconnect, optional at-rest encryption, optional access control, and
//! audit logging.
//!
//! Shaped the same way as [`crate::cache::Cache`]: a cheap-to-clone `Arc`
//! handle guarding an in-memory map, with a [`persistence::EventPersistence`]
//! sidecar for durability.

pub mod access_control;
pub mod audit;
pub mod encryption;
pub mod persistence;
pub mod record;
pub mod sanitize;
pub mod stats;

use std::{collections::HashMap, sync::Arc, time::Duration};

use serde_json::Value;

use crate::{
    config::EventStoreConfig,
    event_store::{
        access_control::{AllowAll, Authorizer},
        audit::AuditResult,
        persistence::EventPersistence,
        record::{build_event_id, parse_stream_id, random_base36_suffix, EventRecord},
        stats::{EventStoreStats, ReplayStats},
    },
    Error, Result,
};

/// Current epoch time in milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}

struct State {
    by_stream: HashMap<String, Vec<EventRecord>>,
    total: usize,
}

impl State {
    fn new() -> Self {
        Self { by_stream: HashMap::new(), total: 0 }
    }
}

struct Inner {
    config: EventStoreConfig,
    encryption_key: Option<[u8; 32]>,
    state: parking_lot::Mutex<State>,
    persistence: EventPersistence,
    authorizer: Box<dyn Authorizer>,
    stats: EventStoreStats,
}

/// Point-in-time event-store statistics for the admin surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EventStoreStatsSnapshot {
    /// Total events currently held in memory across all streams.
    pub total_events: usize,
    /// Event count per stream, in memory.
    pub per_stream_counts: HashMap<String, usize>,
    /// Total bytes occupied by persisted event records on disk.
    pub disk_bytes: u64,
    /// `replay_events_after` request/hit/miss counters.
    pub replay: ReplayStats,
    /// Oldest in-memory event's timestamp (epoch millis), if any.
    pub oldest_event_timestamp: Option<i64>,
    /// Newest in-memory event's timestamp (epoch millis), if any.
    pub newest_event_timestamp: Option<i64>,
}

/// A durable, per-stream event log.
#[derive(Clone)]
pub struct EventStore {
    inner: Arc<Inner>,
}

impl EventStore {
    /// Build a store from configuration with the default (allow-all)
    /// authorizer.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured encryption key is not valid hex
    /// or not exactly 32 bytes.
    pub fn new(config: EventStoreConfig) -> Result<Self> {
        Self::with_authorizer(config, Box::new(AllowAll))
    }

    /// Build a store with a custom [`Authorizer`].
    ///
    /// # Errors
    ///
    /// Returns an error if the configured encryption key is not valid hex
    /// or not exactly 32 bytes.
    pub fn with_authorizer(config: EventStoreConfig, authorizer: Box<dyn Authorizer>) -> Result<Self> {
        let encryption_key = config.decode_encryption_key()?;
        let persistence = EventPersistence::new(config.root.clone());

        let store = Self {
            inner: Arc::new(Inner {
                config,
                encryption_key,
                state: parking_lot::Mutex::new(State::new()),
                persistence,
                authorizer,
                stats: EventStoreStats::default(),
            }),
        };

        if store.inner.config.enabled && !store.inner.config.disable_background_tasks {
            store.spawn_sweep_task();
        }

        Ok(store)
    }

    /// Store one event for `stream_id`, returning its generated id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EncryptionFailure`] if encryption is enabled and
    /// fails, or an I/O/serialization error if a critical-stream write to
    /// disk fails.
    pub async fn store_event(&self, stream_id: &str, message: &Value, user_id: Option<&str>) -> Result<String> {
        if !self.inner.config.enabled {
            return Ok(build_event_id(stream_id, now_millis(), &random_base36_suffix()));
        }

        match self.try_store_event(stream_id, message, user_id).await {
            Ok(event_id) => {
                if self.inner.config.audit_log_enabled {
                    audit::emit("store_event", AuditResult::Success, stream_id, user_id, &event_id, None);
                }
                Ok(event_id)
            }
            Err(e) => {
                if self.inner.config.audit_log_enabled {
                    audit::emit("store_event", AuditResult::Failure, stream_id, user_id, "", Some(&e.to_string()));
                }
                Err(e)
            }
        }
    }

    async fn try_store_event(&self, stream_id: &str, message: &Value, user_id: Option<&str>) -> Result<String> {
        let sanitized = sanitize::redact(message);

        let (body, encrypted) = if let Some(key) = self.inner.encryption_key {
            let plaintext = serde_json::to_vec(&sanitized)?;
            let envelope = encryption::encrypt(&key, &plaintext)?;
            (serde_json::to_value(envelope)?, true)
        } else {
            (sanitized, false)
        };

        let timestamp = now_millis();
        let random_suffix = random_base36_suffix();
        let event_id = build_event_id(stream_id, timestamp, &random_suffix);

        let record = EventRecord {
            event_id: event_id.clone(),
            stream_id: stream_id.to_string(),
            timestamp,
            random_suffix,
            user_id: user_id.map(str::to_string),
            message: body,
            encrypted,
        };

        {
            let mut state = self.inner.state.lock();
            let stream = state.by_stream.entry(stream_id.to_string()).or_default();
            stream.push(record.clone());
            state.total += 1;

            Self::evict_stream_oldest(stream, &mut state.total, self.inner.config.max_events_per_stream);
            Self::evict_global_oldest(&mut state, self.inner.config.max_total_events);
        }

        if self.inner.config.critical_streams.iter().any(|s| s == stream_id) {
            self.inner.persistence.write_record(&record).await?;
        }

        Ok(event_id)
    }

    fn evict_stream_oldest(stream: &mut Vec<EventRecord>, total: &mut usize, max_per_stream: usize) {
        if stream.len() <= max_per_stream {
            return;
        }
        stream.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        let overflow = stream.len() - max_per_stream;
        stream.drain(0..overflow);
        *total -= overflow;
    }

    fn evict_global_oldest(state: &mut State, max_total: usize) {
        while state.total > max_total {
            let Some((oldest_stream, oldest_index)) = state
                .by_stream
                .iter()
                .filter_map(|(stream_id, records)| {
                    records.iter().enumerate().min_by(|(_, a), (_, b)| a.sort_key().cmp(&b.sort_key())).map(|(i, _)| (stream_id.clone(), i))
                })
                .min_by(|(sa, ia), (sb, ib)| {
                    let ra = &state.by_stream[sa][*ia];
                    let rb = &state.by_stream[sb][*ib];
                    ra.sort_key().cmp(&rb.sort_key())
                })
            else {
                break;
            };

            if let Some(stream) = state.by_stream.get_mut(&oldest_stream) {
                stream.remove(oldest_index);
                state.total -= 1;
            } else {
                break;
            }
        }
    }

    /// Replay every event after `last_event_id`, invoking `send` in
    /// ascending timestamp order for each. Returns the stream id on a hit,
    /// or `None` if `last_event_id` is unknown or access is denied.
    ///
    /// `send` receives `(event_id, decrypted_message)`; a decryption
    /// failure for one record is delivered as a structured error payload
    /// instead of aborting the replay.
    ///
    /// # Errors
    ///
    /// Propagates whatever error `send` returns, aborting the remaining
    /// replay.
    pub async fn replay_events_after<F>(&self, last_event_id: &str, mut send: F, user_id: Option<&str>) -> Result<Option<String>>
    where
        F: FnMut(&str, &Value) -> Result<()>,
    {
        self.inner.stats.record_replay_request();

        let Some(stream_id) = parse_stream_id(last_event_id) else {
            self.inner.stats.record_replay_miss();
            return Ok(None);
        };
        let stream_id = stream_id.to_string();

        let mut records = self.collect_stream_records(&stream_id).await?;
        records.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let Some(pos) = records.iter().position(|r| r.event_id == last_event_id) else {
            self.inner.stats.record_replay_miss();
            return Ok(None);
        };

        if self.inner.config.access_control_enabled && !self.inner.authorizer.authorize(&stream_id, user_id) {
            self.inner.stats.record_replay_miss();
            if self.inner.config.audit_log_enabled {
                audit::emit("replay_events_after", AuditResult::Failure, &stream_id, user_id, last_event_id, Some("access denied"));
            }
            return Ok(None);
        }

        self.inner.stats.record_replay_hit();

        let mut replayed = 0u64;
        for record in &records[pos + 1..] {
            match self.decrypt_record(record) {
                Ok(value) => send(&record.event_id, &value)?,
                Err(e) => {
                    let error_payload = serde_json::json!({"error": "decryption_failed", "message": e.to_string()});
                    send(&record.event_id, &error_payload)?;
                }
            }
            replayed += 1;
        }

        if self.inner.config.audit_log_enabled {
            audit::emit(
                "replay_events_after",
                AuditResult::Success,
                &stream_id,
                user_id,
                last_event_id,
                Some(&format!("replayed {replayed} events")),
            );
        }

        Ok(Some(stream_id))
    }

    async fn collect_stream_records(&self, stream_id: &str) -> Result<Vec<EventRecord>> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();

        if let Some(records) = self.inner.state.lock().by_stream.get(stream_id) {
            for record in records {
                seen.insert(record.event_id.clone());
                out.push(record.clone());
            }
        }

        for record in self.inner.persistence.load_stream(stream_id).await? {
            if seen.insert(record.event_id.clone()) {
                out.push(record);
            }
        }

        Ok(out)
    }

    fn decrypt_record(&self, record: &EventRecord) -> Result<Value> {
        if !record.encrypted {
            return Ok(record.message.clone());
        }
        let Some(key) = self.inner.encryption_key else {
            return Err(Error::DecryptionFailure("event is encrypted but no key is configured".to_string()));
        };
        let envelope: encryption::Envelope = serde_json::from_value(record.message.clone())?;
        let plaintext = encryption::decrypt(&key, &envelope)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    /// Delete every record attributed to `user_id`, in memory and on disk.
    /// Returns the number of records deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if a disk removal fails.
    pub async fn erase_user(&self, user_id: &str) -> Result<u64> {
        let to_remove: Vec<(String, String)> = {
            let mut state = self.inner.state.lock();
            let mut removed = Vec::new();
            for (stream_id, records) in &mut state.by_stream {
                let before = records.len();
                records.retain(|r| {
                    let matches = r.user_id.as_deref() == Some(user_id);
                    if matches {
                        removed.push((stream_id.clone(), r.event_id.clone()));
                    }
                    !matches
                });
                state.total -= before - records.len();
            }
            removed
        };

        for (stream_id, event_id) in &to_remove {
            self.inner.persistence.remove_record(stream_id, event_id).await?;
        }

        if self.inner.config.audit_log_enabled {
            audit::emit("erase_user", AuditResult::Success, "*", Some(user_id), "", Some(&format!("deleted {} events", to_remove.len())));
        }

        Ok(u64::try_from(to_remove.len()).unwrap_or(u64::MAX))
    }

    fn spawn_sweep_task(&self) {
        let interval = Duration::from_secs(3600).min(self.inner.config.event_ttl / 4);
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                store.sweep_expired().await;
            }
        });
    }

    async fn sweep_expired(&self) {
        let now = now_millis();
        #[allow(clippy::cast_possible_wrap)]
        let ttl_ms = self.inner.config.event_ttl.as_millis() as i64;
        let cutoff = now - ttl_ms;

        let expired: Vec<(String, String)> = {
            let mut state = self.inner.state.lock();
            let mut expired = Vec::new();
            for (stream_id, records) in &mut state.by_stream {
                let before = records.len();
                records.retain(|r| {
                    let keep = r.timestamp > cutoff;
                    if !keep {
                        expired.push((stream_id.clone(), r.event_id.clone()));
                    }
                    keep
                });
                state.total -= before - records.len();
            }
            expired
        };

        for (stream_id, event_id) in expired {
            if let Err(e) = self.inner.persistence.remove_record(&stream_id, &event_id).await {
                tracing::warn!(stream_id = %stream_id, event_id = %event_id, error = %e, "failed to remove expired event from disk");
            }
        }
    }

    /// Flush every in-memory event to disk, emit a `dispose` audit event,
    /// and clear in-memory state. Intended to run once at shutdown.
    pub async fn dispose(&self) {
        let all: Vec<EventRecord> = {
            let mut state = self.inner.state.lock();
            let all = state.by_stream.values().flatten().cloned().collect();
            state.by_stream.clear();
            state.total = 0;
            all
        };

        for record in &all {
            if let Err(e) = self.inner.persistence.write_record(record).await {
                tracing::warn!(event_id = %record.event_id, error = %e, "failed to flush event on dispose");
            }
        }

        if self.inner.config.audit_log_enabled {
            audit::emit("dispose", AuditResult::Success, "*", None, "", Some(&format!("flushed {} events", all.len())));
        }
    }

    /// Read current event-store statistics: total in-memory events,
    /// per-stream counts, on-disk usage, replay hit/miss ratios, and the
    /// oldest/newest in-memory event timestamps.
    ///
    /// # Errors
    ///
    /// Returns an error if the on-disk usage walk fails.
    pub async fn stats(&self) -> Result<EventStoreStatsSnapshot> {
        let (total_events, per_stream_counts, oldest_event_timestamp, newest_event_timestamp) = {
            let state = self.inner.state.lock();
            let per_stream_counts: HashMap<String, usize> = state.by_stream.iter().map(|(stream_id, records)| (stream_id.clone(), records.len())).collect();
            let mut oldest: Option<i64> = None;
            let mut newest: Option<i64> = None;
            for ts in state.by_stream.values().flatten().map(|r| r.timestamp) {
                oldest = Some(oldest.map_or(ts, |o| o.min(ts)));
                newest = Some(newest.map_or(ts, |n| n.max(ts)));
            }
            (state.total, per_stream_counts, oldest, newest)
        };

        let disk_bytes = self.inner.persistence.disk_usage_bytes().await?;

        Ok(EventStoreStatsSnapshot {
            total_events,
            per_stream_counts,
            disk_bytes,
            replay: self.inner.stats.snapshot(),
            oldest_event_timestamp,
            newest_event_timestamp,
        })
    }
}
