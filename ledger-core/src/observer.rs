//! Observability hooks for [`crate::category::Category`] and
//! [`crate::decider::Decider`]. Every hook has a no-op default so a consumer
//! only overrides what it cares about.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::token::Index;

/// Outcome of a load, reported to an [`Observer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Served entirely from cache, no backend read performed.
    CacheHit,
    /// Served via an incremental reload against the backend.
    Incremental,
    /// Served via a full strategy-driven load (forward or backward scan).
    Full,
}

/// Outcome of a single append attempt within a `transact`/`transact_result`
/// loop, reported to an [`Observer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactOutcome {
    /// The append landed without a version conflict.
    Written,
    /// The append lost an optimistic-concurrency race and will be retried.
    Conflict,
}

/// Observability seam for [`crate::category::Category`]. The default
/// implementations of every method do nothing, so implementors only need to
/// override the events they care about.
pub trait Observer: Send + Sync {
    /// Called once a load (of any [`LoadOutcome`]) completes successfully.
    fn on_load(&self, _stream: &str, _outcome: LoadOutcome) {}

    /// Called once a single append attempt completes, before any retry.
    fn on_transact(&self, _stream: &str, _outcome: TransactOutcome) {}

    /// Called when a codec fails to decode a stored event, which the engine
    /// treats as a skip rather than a hard failure.
    fn on_codec_decode_failure(&self, _stream: &str, _index: Index, _event_type: &str) {}
}

/// An [`Observer`] that does nothing. The default when none is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl Observer for NoopObserver {}

/// An [`Observer`] that logs through `tracing`, at a level appropriate to
/// each event: loads and successful appends at `debug`, conflicts at `info`
/// (expected under contention, but worth seeing), decode failures at `warn`
/// (silent data loss risk if ignored).
#[cfg(feature = "tracing")]
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

#[cfg(feature = "tracing")]
impl Observer for TracingObserver {
    fn on_load(&self, stream: &str, outcome: LoadOutcome) {
        tracing::debug!(stream, ?outcome, "stream loaded");
    }

    fn on_transact(&self, stream: &str, outcome: TransactOutcome) {
        match outcome {
            TransactOutcome::Written => tracing::debug!(stream, "append committed"),
            TransactOutcome::Conflict => tracing::info!(stream, "append lost a concurrency race, retrying"),
        }
    }

    fn on_codec_decode_failure(&self, stream: &str, index: Index, event_type: &str) {
        tracing::warn!(stream, index, event_type, "skipped event the codec could not decode");
    }
}

/// A point-in-time snapshot of [`MetricsObserver`]'s counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// Total loads served, of any kind.
    pub loads: u64,
    /// Loads served entirely from cache.
    pub cache_hits: u64,
    /// Append attempts that committed without conflict.
    pub appends_written: u64,
    /// Append attempts that lost a concurrency race.
    pub conflicts: u64,
    /// Events skipped because the codec could not decode them.
    pub codec_skips: u64,
}

/// An [`Observer`] that aggregates counters in memory, for tests and
/// lightweight in-process metrics without pulling in a metrics exporter.
#[derive(Debug, Default)]
pub struct MetricsObserver {
    loads: AtomicU64,
    cache_hits: AtomicU64,
    appends_written: AtomicU64,
    conflicts: AtomicU64,
    codec_skips: AtomicU64,
}

impl MetricsObserver {
    /// Builds a fresh observer with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            loads: self.loads.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            appends_written: self.appends_written.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            codec_skips: self.codec_skips.load(Ordering::Relaxed),
        }
    }
}

impl Observer for MetricsObserver {
    fn on_load(&self, _stream: &str, outcome: LoadOutcome) {
        self.loads.fetch_add(1, Ordering::Relaxed);
        if outcome == LoadOutcome::CacheHit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn on_transact(&self, _stream: &str, outcome: TransactOutcome) {
        match outcome {
            TransactOutcome::Written => self.appends_written.fetch_add(1, Ordering::Relaxed),
            TransactOutcome::Conflict => self.conflicts.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn on_codec_decode_failure(&self, _stream: &str, _index: Index, _event_type: &str) {
        self.codec_skips.fetch_add(1, Ordering::Relaxed);
    }
}
