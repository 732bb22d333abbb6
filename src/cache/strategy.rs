//! Pluggable persistence strategies.
//!
//! Each strategy answers three questions the cache asks on every
//! `get_or_compute` call: persist on set? persist on get? and, separately,
//! how often should the background flush loop run (if at all).

use std::{collections::HashSet, time::Duration};

use crate::config::PersistenceStrategyKind;

/// A persistence policy. The cache consults this on every set/get and
/// during its periodic flush loop; it never inspects
/// [`PersistenceStrategyKind`] directly once one has been built.
pub trait PersistencePolicy: Send + Sync {
    /// Whether a freshly computed or updated entry should be written to
    /// disk synchronously as part of the call that produced it.
    fn should_persist_on_set(&self, namespace: &str) -> bool;

    /// Whether a cache hit should refresh the on-disk copy (used to push
    /// back expiry/access metadata written at read time).
    fn should_persist_on_get(&self, namespace: &str) -> bool;

    /// Interval for the background dirty-set flush loop, or `None` if this
    /// strategy never flushes on a timer.
    fn persistence_interval(&self) -> Option<Duration>;

    /// Called once during `dispose`, before the dirty set is flushed.
    /// Default is a no-op; strategies that want to log or otherwise react
    /// to shutdown override it.
    fn on_shutdown(&self) {}
}

/// Never persist on set/get; the dirty set is flushed every
/// `persistence_interval` and once more on shutdown.
pub struct Periodic {
    /// Flush interval.
    pub interval: Duration,
}

impl PersistencePolicy for Periodic {
    fn should_persist_on_set(&self, _namespace: &str) -> bool {
        false
    }

    fn should_persist_on_get(&self, _namespace: &str) -> bool {
        false
    }

    fn persistence_interval(&self) -> Option<Duration> {
        Some(self.interval)
    }
}

/// Persist every set synchronously; never flush on a timer.
pub struct WriteThrough;

impl PersistencePolicy for WriteThrough {
    fn should_persist_on_set(&self, _namespace: &str) -> bool {
        true
    }

    fn should_persist_on_get(&self, _namespace: &str) -> bool {
        false
    }

    fn persistence_interval(&self) -> Option<Duration> {
        None
    }
}

/// Never persist during runtime. Every entry accumulates in the dirty set
/// until `dispose`, at which point the whole cache is effectively flushed.
pub struct OnShutdown;

impl PersistencePolicy for OnShutdown {
    fn should_persist_on_set(&self, _namespace: &str) -> bool {
        false
    }

    fn should_persist_on_get(&self, _namespace: &str) -> bool {
        false
    }

    fn persistence_interval(&self) -> Option<Duration> {
        None
    }

    fn on_shutdown(&self) {
        tracing::debug!("on-shutdown strategy: flushing full dirty set");
    }
}

/// Write-through for a configured set of critical namespaces, periodic for
/// everything else.
pub struct Hybrid {
    /// Namespaces persisted synchronously on every set.
    pub critical_namespaces: HashSet<String>,
    /// Flush interval for non-critical namespaces.
    pub interval: Duration,
}

impl PersistencePolicy for Hybrid {
    fn should_persist_on_set(&self, namespace: &str) -> bool {
        self.critical_namespaces.contains(namespace)
    }

    fn should_persist_on_get(&self, _namespace: &str) -> bool {
        false
    }

    fn persistence_interval(&self) -> Option<Duration> {
        Some(self.interval)
    }
}

/// Build the configured strategy.
#[must_use]
pub fn build(
    kind: PersistenceStrategyKind,
    interval: Duration,
    critical_namespaces: &[String],
) -> Box<dyn PersistencePolicy> {
    match kind {
        PersistenceStrategyKind::Periodic => Box::new(Periodic { interval }),
        PersistenceStrategyKind::WriteThrough => Box::new(WriteThrough),
        PersistenceStrategyKind::OnShutdown => Box::new(OnShutdown),
        PersistenceStrategyKind::Hybrid => Box::new(Hybrid {
            critical_namespaces: critical_namespaces.iter().cloned().collect(),
            interval,
        }),
    }
}
