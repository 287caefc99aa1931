//! The Category engine: wires a [`StoreAdapter`], a [`Codec`], a fold
//! function and an [`AccessStrategy`] together into `load`/`try_sync`
//! operations over a single event category. [`crate::decider::Decider`] is
//! the thin per-stream facade built on top of this.

use std::sync::Arc;
use std::time::Duration;

use crate::access::{AccessStrategy, Compaction, LoadPlan};
use crate::adapter::{AppendFailure, ExpectedVersion, LoadFailure, StoreAdapter};
use crate::cache::{Cache, CacheStrategy};
use crate::codec::{Codec, EncodeContext};
use crate::error::{ConfigError, EngineError, Operation};
use crate::observer::{LoadOutcome, NoopObserver, Observer, TransactOutcome};
use crate::timeline::TimelineEvent;
use crate::token::{Position, StreamName, Token};

/// How a [`Category::load`] should treat a cached entry.
#[derive(Debug, Clone, Copy, Default)]
pub enum LoadOption {
    /// Serve from cache if fresh, otherwise read the backend.
    #[default]
    Default,
    /// Serve from cache as long as the entry is no older than `max_age`,
    /// otherwise perform an incremental reload.
    AllowStale(Duration),
    /// Bypass the cache and read against the backend's leader/primary.
    RequireLeader,
}

/// Outcome of [`Category::try_sync`].
pub(crate) enum SyncOutcome<State> {
    Written(Token, Arc<State>),
    Conflict,
}

/// Binds a [`StoreAdapter`] to a single event category: an event type, a
/// pure fold function, an initial state, an [`AccessStrategy`], and
/// optionally a [`Cache`].
pub struct Category<A, Event, State, Context = EncodeContext>
where
    A: StoreAdapter,
{
    adapter: Arc<A>,
    codec: Arc<dyn Codec<Event, Context>>,
    fold: Arc<dyn Fn(State, Event) -> State + Send + Sync>,
    initial: State,
    access: AccessStrategy<Event, State>,
    cache: Option<Arc<Cache<State, LoadFailure<A::Error>>>>,
    observer: Arc<dyn Observer>,
    max_resync_attempts: u32,
}

impl<A, Event, State, Context> Category<A, Event, State, Context>
where
    A: StoreAdapter + 'static,
    Event: Send + Sync + 'static,
    State: Clone + Send + Sync + 'static,
    Context: Send + Sync + 'static,
{
    /// Builds a new category. Fails if `access` cannot be combined with
    /// `cache` (see [`ConfigError`]).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        adapter: Arc<A>,
        codec: Arc<dyn Codec<Event, Context>>,
        fold: impl Fn(State, Event) -> State + Send + Sync + 'static,
        initial: State,
        access: AccessStrategy<Event, State>,
        cache: Option<CacheStrategy>,
    ) -> Result<Self, ConfigError> {
        if cache.is_some() && !access.is_cacheable() {
            return Err(ConfigError::LatestKnownEventWithCache);
        }

        Ok(Self {
            adapter,
            codec,
            fold: Arc::new(fold),
            initial,
            access,
            cache: cache.map(|strategy| Arc::new(Cache::new(strategy))),
            observer: Arc::new(NoopObserver),
            max_resync_attempts: 3,
        })
    }

    /// Replaces the default no-op [`Observer`].
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    /// Sets the maximum number of decide/append attempts a `transact` loop
    /// will make before giving up with
    /// [`EngineError::MaxResyncsExhausted`]. Defaults to 3.
    #[must_use]
    pub fn with_max_resync_attempts(mut self, attempts: u32) -> Self {
        self.max_resync_attempts = attempts;
        self
    }

    pub(crate) fn max_resync_attempts(&self) -> u32 {
        self.max_resync_attempts
    }

    /// Loads a stream's current `(Token, State)`, consulting the cache
    /// (when configured) according to `option`.
    pub async fn load(&self, stream: &StreamName, option: LoadOption) -> Result<(Token, Arc<State>), EngineError> {
        let key = stream.as_wire();

        let require_leader = matches!(option, LoadOption::RequireLeader);

        if let Some(cache) = &self.cache {
            if !require_leader {
                let max_age = match option {
                    LoadOption::AllowStale(max_age) => Some(max_age),
                    _ => None,
                };

                if let Some((token, state)) = cache.fresh(&key, max_age) {
                    self.observer.on_load(&key, LoadOutcome::CacheHit);
                    return Ok((token, state));
                }

                if let Some((token, state)) = cache.peek(&key) {
                    let adapter = self.adapter.clone();
                    let codec = self.codec.clone();
                    let fold = self.fold.clone();
                    let observer = self.observer.clone();
                    let stream_owned = stream.clone();

                    let result = cache
                        .get_or_load(&key, move || {
                            Self::incremental_reload_owned(adapter, codec, fold, observer, stream_owned, token, state)
                        })
                        .await
                        .map_err(|e| map_load_failure_arc(&key, e))?;

                    self.observer.on_load(&key, LoadOutcome::Incremental);
                    return Ok(result);
                }

                let adapter = self.adapter.clone();
                let codec = self.codec.clone();
                let fold = self.fold.clone();
                let observer = self.observer.clone();
                let initial = self.initial.clone();
                let access = self.access.clone();
                let stream_owned = stream.clone();

                let result = cache
                    .get_or_load(&key, move || {
                        Self::full_load_owned(
                            adapter,
                            codec,
                            fold,
                            observer,
                            initial,
                            access,
                            stream_owned,
                            require_leader,
                        )
                    })
                    .await
                    .map_err(|e| map_load_failure_arc(&key, e))?;

                self.observer.on_load(&key, LoadOutcome::Full);
                return Ok(result);
            }
        }

        let result = self
            .full_load(stream, require_leader)
            .await
            .map_err(|e| map_load_failure(&key, e))?;

        self.observer.on_load(&key, LoadOutcome::Full);
        Ok(result)
    }

    /// Attempts to append `new_events` to `stream`, optimistically
    /// expecting it to still be at `token`'s version. Returns
    /// [`SyncOutcome::Conflict`] on a lost race, leaving retry/reload policy
    /// to the caller ([`crate::decider::Decider`]).
    pub(crate) async fn try_sync(
        &self,
        stream: &StreamName,
        token: &Token,
        state: &State,
        new_events: Vec<Event>,
        context: &Context,
    ) -> Result<SyncOutcome<State>, EngineError> {
        let key = stream.as_wire();

        let mut to_append: Vec<_> = new_events.iter().map(|e| self.codec.encode(context, e)).collect();
        let new_events_len = new_events.len();

        let compaction = self.access.on_append(token, state, new_events_len);
        let snapshot_emitted = !matches!(compaction, Compaction::None);

        match compaction {
            Compaction::None => {}
            Compaction::AppendSnapshot(snapshot_event) => {
                to_append.push(self.codec.encode(context, &snapshot_event));
            }
            Compaction::ReplaceWithSnapshot(snapshot_event) => {
                to_append = vec![self.codec.encode(context, &snapshot_event)];
            }
        }

        let expected = if token.stream_version() < 0 {
            ExpectedVersion::NoStream
        } else {
            ExpectedVersion::Exact(token.stream_version())
        };

        let appended_size: usize = to_append.iter().map(|e| e.approx_size()).sum();

        match self.adapter.append(stream, expected, to_append).await {
            Ok(appended) => {
                self.observer.on_transact(&key, TransactOutcome::Written);

                let new_stream_version = appended.version - 1;
                let compaction_event_index = if snapshot_emitted {
                    Some(new_stream_version)
                } else {
                    token.compaction_event_index()
                };

                let position = Position {
                    stream_version: new_stream_version,
                    compaction_event_index,
                    batch_capacity_limit: None,
                }
                .with_batch_capacity(self.adapter.batch_size(), 0);

                let new_state = new_events
                    .into_iter()
                    .fold(state.clone(), |acc, event| (self.fold)(acc, event));

                let new_token = Token::new(position, token.stream_bytes() + appended_size);

                if let Some(cache) = &self.cache {
                    cache.publish(&key, new_token.clone(), Arc::new(new_state.clone()));
                }

                Ok(SyncOutcome::Written(new_token, Arc::new(new_state)))
            }
            Err(AppendFailure::Conflict { .. }) => {
                self.observer.on_transact(&key, TransactOutcome::Conflict);
                Ok(SyncOutcome::Conflict)
            }
            Err(AppendFailure::Unavailable(source)) => Err(EngineError::StoreUnavailable {
                stream: key,
                operation: Operation::Append,
                source: Box::new(source),
            }),
        }
    }

    /// Performs an incremental forward read from `token.stream_version() +
    /// 1` against the leader, folding any new events into `state`. Used to
    /// recover from a lost optimistic-concurrency race and to refresh a
    /// stale cache entry.
    pub(crate) async fn incremental_reload(
        &self,
        stream: &StreamName,
        token: Token,
        state: Arc<State>,
    ) -> Result<(Token, Arc<State>), EngineError> {
        Self::incremental_reload_owned(
            self.adapter.clone(),
            self.codec.clone(),
            self.fold.clone(),
            self.observer.clone(),
            stream.clone(),
            token,
            state,
        )
        .await
        .map_err(|e| map_load_failure(&stream.as_wire(), e))
    }

    async fn incremental_reload_owned(
        adapter: Arc<A>,
        codec: Arc<dyn Codec<Event, Context>>,
        fold: Arc<dyn Fn(State, Event) -> State + Send + Sync>,
        observer: Arc<dyn Observer>,
        stream: StreamName,
        token: Token,
        state: Arc<State>,
    ) -> Result<(Token, Arc<State>), LoadFailure<A::Error>> {
        let (version, events) = adapter.load_forward(&stream, token.stream_version() + 1, true).await?;

        let wire = stream.as_wire();
        let decoded: Vec<Event> = events
            .iter()
            .filter_map(|e| decode_or_warn(codec.as_ref(), observer.as_ref(), &wire, e))
            .collect();
        let stream_bytes = token.stream_bytes() + events.iter().map(|e| e.size).sum::<usize>();

        let new_state = decoded.into_iter().fold((*state).clone(), |acc, event| fold(acc, event));

        let position = Position {
            stream_version: version - 1,
            compaction_event_index: token.compaction_event_index(),
            batch_capacity_limit: None,
        }
        .with_batch_capacity(adapter.batch_size(), 0);

        Ok((Token::new(position, stream_bytes), Arc::new(new_state)))
    }

    async fn full_load(
        &self,
        stream: &StreamName,
        require_leader: bool,
    ) -> Result<(Token, Arc<State>), LoadFailure<A::Error>> {
        Self::full_load_owned(
            self.adapter.clone(),
            self.codec.clone(),
            self.fold.clone(),
            self.observer.clone(),
            self.initial.clone(),
            self.access.clone(),
            stream.clone(),
            require_leader,
        )
        .await
    }

    async fn full_load_owned(
        adapter: Arc<A>,
        codec: Arc<dyn Codec<Event, Context>>,
        fold: Arc<dyn Fn(State, Event) -> State + Send + Sync>,
        observer: Arc<dyn Observer>,
        initial: State,
        access: AccessStrategy<Event, State>,
        stream: StreamName,
        require_leader: bool,
    ) -> Result<(Token, Arc<State>), LoadFailure<A::Error>> {
        let wire = stream.as_wire();

        let (version, events, decoded): (_, _, Vec<Event>) = match access.load_plan() {
            LoadPlan::Forward => {
                let (version, events) = adapter.load_forward(&stream, 0, require_leader).await?;
                let decoded = events
                    .iter()
                    .filter_map(|e| decode_or_warn(codec.as_ref(), observer.as_ref(), &wire, e))
                    .collect();
                (version, events, decoded)
            }
            LoadPlan::Backward(is_origin) => {
                let decode_codec = codec.clone();
                let predicate = move |wire_event: &TimelineEvent| match decode_codec.try_decode(wire_event) {
                    Some(event) => is_origin(&event),
                    None => false,
                };
                let (version, events) = adapter.load_backward_until(&stream, &predicate, require_leader).await?;
                let decoded = events
                    .iter()
                    .filter_map(|e| decode_or_warn(codec.as_ref(), observer.as_ref(), &wire, e))
                    .collect();
                (version, events, decoded)
            }
        };

        if events.is_empty() {
            return Ok((adapter.token_empty(), Arc::new(initial)));
        }

        let compaction_event_index = match access.load_plan() {
            LoadPlan::Forward => None,
            LoadPlan::Backward(_) => events.first().map(|e| e.index),
        };

        let mut decoded = decoded;
        if access.keep_latest_only() {
            if let Some(last) = decoded.pop() {
                decoded = vec![last];
            }
        }

        let stream_bytes = events.iter().map(|e| e.size).sum();
        let state = decoded.into_iter().fold(initial, |acc, event| fold(acc, event));

        let position = Position {
            stream_version: version - 1,
            compaction_event_index,
            batch_capacity_limit: None,
        }
        .with_batch_capacity(adapter.batch_size(), 0);

        Ok((Token::new(position, stream_bytes), Arc::new(state)))
    }
}

/// Decodes `wire_event`, reporting a skip to `observer` on failure rather
/// than failing the whole load. A codec mismatch is expected to be rare and
/// is never treated as fatal: the event is simply dropped from the fold.
fn decode_or_warn<Event, Context>(
    codec: &dyn Codec<Event, Context>,
    observer: &dyn Observer,
    stream: &str,
    wire_event: &TimelineEvent,
) -> Option<Event> {
    match codec.try_decode(wire_event) {
        Some(event) => Some(event),
        None => {
            observer.on_codec_decode_failure(stream, wire_event.index, &wire_event.event_type);
            None
        }
    }
}

/// A previously-rendered error message, used when the original error can no
/// longer be moved out of an `Arc` shared across single-flight waiters.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct OpaqueError(String);

fn map_load_failure<E>(stream: &str, err: LoadFailure<E>) -> EngineError
where
    E: std::error::Error + Send + Sync + 'static,
{
    match err {
        LoadFailure::BatchLimitExceeded { max_batches } => EngineError::BatchLimitExceeded {
            stream: stream.to_owned(),
            max_batches,
        },
        LoadFailure::Unavailable(source) => EngineError::StoreUnavailable {
            stream: stream.to_owned(),
            operation: Operation::Load,
            source: Box::new(source),
        },
    }
}

/// Same as [`map_load_failure`], but for an error shared (via `Arc`) across
/// several coalesced callers: the concrete adapter error can't be moved out,
/// so it is captured by rendering its message instead.
fn map_load_failure_arc<E>(stream: &str, err: Arc<LoadFailure<E>>) -> EngineError
where
    E: std::error::Error + Send + Sync + 'static,
{
    match &*err {
        LoadFailure::BatchLimitExceeded { max_batches } => EngineError::BatchLimitExceeded {
            stream: stream.to_owned(),
            max_batches: *max_batches,
        },
        LoadFailure::Unavailable(source) => EngineError::StoreUnavailable {
            stream: stream.to_owned(),
            operation: Operation::Load,
            source: Box::new(OpaqueError(source.to_string())),
        },
    }
}
