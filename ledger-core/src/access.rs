//! Access strategies: how a [`crate::category::Category`] reads a stream back
//! (forward scan vs. backward scan for an origin event) and how it keeps
//! that read cheap over time (when and how to emit a compaction/snapshot
//! event on append).

use std::sync::Arc;

use crate::token::Token;

/// A predicate recognizing an origin (self-sufficient / snapshot) event: an
/// event from which folding can restart without reading anything earlier.
pub type IsOrigin<Event> = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Produces a compaction event capturing `State` in full, to be appended
/// alongside or instead of the events a decision produced.
pub type ToSnapshot<Event, State> = Arc<dyn Fn(&State) -> Event + Send + Sync>;

/// How a stream is read back and compacted over time.
///
/// Cloning is cheap: the closures are held behind `Arc`.
#[derive(Clone)]
pub enum AccessStrategy<Event, State> {
    /// Always read the full stream forward from the start. Simplest, and the
    /// right default for streams that are short-lived or rarely re-read.
    Unoptimized,

    /// Read backward and stop at the very first event found; that lone event
    /// is folded from the initial state. For streams where only the latest
    /// event is ever meaningful (e.g. a materialized "current value").
    ///
    /// Never combine this strategy with a [`crate::cache::Cache`]: see
    /// [`crate::error::ConfigError::LatestKnownEventWithCache`].
    LatestKnownEvent,

    /// Read backward until `is_origin` matches, then fold forward from
    /// there. On every append, also appends a fresh snapshot event produced
    /// by `to_snapshot`, keeping the backward scan cheap indefinitely.
    Snapshot(IsOrigin<Event>, ToSnapshot<Event, State>),

    /// The stream holds only ever the latest snapshot: every append
    /// *replaces* the events about to be written with a single snapshot of
    /// the resulting state. Cheapest possible read (always exactly one
    /// event), at the cost of losing the individual event history.
    RollingState(ToSnapshot<Event, State>),

    /// Like [`AccessStrategy::Snapshot`], but only emits a new snapshot once
    /// the number of events written since the last one would otherwise
    /// exceed the adapter's batching capacity — balances read cost against
    /// snapshot-write overhead.
    RollingSnapshots(IsOrigin<Event>, ToSnapshot<Event, State>),
}

/// How [`crate::category::Category`] should read a stream back from scratch.
pub enum LoadPlan<Event> {
    /// Read forward from the start of the stream.
    Forward,
    /// Read backward until the given predicate matches an event.
    Backward(IsOrigin<Event>),
}

/// What, if anything, an access strategy wants appended alongside a
/// decision's events.
pub enum Compaction<Event> {
    /// No compaction event needed.
    None,
    /// Append this event after the decided events.
    AppendSnapshot(Event),
    /// Replace the decided events entirely with this single snapshot event.
    ReplaceWithSnapshot(Event),
}

impl<Event, State> AccessStrategy<Event, State> {
    /// How a fresh (uncached) load of a stream governed by this strategy
    /// should be carried out.
    pub fn load_plan(&self) -> LoadPlan<Event> {
        match self {
            AccessStrategy::Unoptimized => LoadPlan::Forward,
            AccessStrategy::LatestKnownEvent => LoadPlan::Backward(Arc::new(|_| true)),
            AccessStrategy::Snapshot(is_origin, _) => LoadPlan::Backward(is_origin.clone()),
            AccessStrategy::RollingState(_) => LoadPlan::Backward(Arc::new(|_| true)),
            AccessStrategy::RollingSnapshots(is_origin, _) => LoadPlan::Backward(is_origin.clone()),
        }
    }

    /// Whether, after a backward scan, only the single most recent decoded
    /// event should be kept (rather than folding every event found).
    pub fn keep_latest_only(&self) -> bool {
        matches!(self, AccessStrategy::LatestKnownEvent)
    }

    /// Decides what compaction event, if any, accompanies an append of
    /// `new_events_len` new events given the stream's current `token` and
    /// the `new_state` that decision produced.
    pub fn on_append(&self, token: &Token, new_state: &State, new_events_len: usize) -> Compaction<Event> {
        match self {
            AccessStrategy::Unoptimized | AccessStrategy::LatestKnownEvent => Compaction::None,

            AccessStrategy::Snapshot(_, to_snapshot) => Compaction::AppendSnapshot(to_snapshot(new_state)),

            AccessStrategy::RollingState(to_snapshot) => Compaction::ReplaceWithSnapshot(to_snapshot(new_state)),

            AccessStrategy::RollingSnapshots(_, to_snapshot) => {
                let limit = token.batch_capacity_limit().unwrap_or(0).max(0) as usize;
                if new_events_len > limit {
                    Compaction::AppendSnapshot(to_snapshot(new_state))
                } else {
                    Compaction::None
                }
            }
        }
    }

    /// Whether this strategy may safely be combined with a
    /// [`crate::cache::Cache`].
    pub fn is_cacheable(&self) -> bool {
        !matches!(self, AccessStrategy::LatestKnownEvent)
    }
}
