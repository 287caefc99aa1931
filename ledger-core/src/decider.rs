//! The public-facing facade: binds a [`crate::category::Category`] to a
//! single stream and exposes `query`/`transact`/`transact_result`.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::adapter::StoreAdapter;
use crate::category::{Category, LoadOption, SyncOutcome};
use crate::codec::EncodeContext;
use crate::error::EngineError;
use crate::token::StreamName;

/// A single-stream view over a [`Category`]: the surface most application
/// code interacts with directly.
pub struct Decider<A, Event, State, Context = EncodeContext>
where
    A: StoreAdapter,
{
    category: Arc<Category<A, Event, State, Context>>,
    stream: StreamName,
}

impl<A, Event, State, Context> Decider<A, Event, State, Context>
where
    A: StoreAdapter + 'static,
    Event: Send + Sync + 'static,
    State: Clone + Send + Sync + 'static,
    Context: Send + Sync + 'static,
{
    /// Binds `category` to `stream`.
    pub fn new(category: Arc<Category<A, Event, State, Context>>, stream: StreamName) -> Self {
        Self { category, stream }
    }

    /// The stream this decider is bound to.
    pub fn stream(&self) -> &StreamName {
        &self.stream
    }

    /// Loads the stream's current state and projects a read-only value out
    /// of it. Never appends.
    pub async fn query<R>(&self, project: impl FnOnce(&State) -> R) -> Result<R, EngineError> {
        let (_, state) = self.category.load(&self.stream, LoadOption::Default).await?;
        Ok(project(&state))
    }

    /// Like [`Decider::query`], but with explicit control over how stale a
    /// cached read may be.
    pub async fn query_with<R>(&self, option: LoadOption, project: impl FnOnce(&State) -> R) -> Result<R, EngineError> {
        let (_, state) = self.category.load(&self.stream, option).await?;
        Ok(project(&state))
    }

    /// Runs `decide` against the stream's current state and appends
    /// whatever events it returns, retrying on a lost optimistic-concurrency
    /// race up to the category's configured resync budget. A `decide` that
    /// returns no events is a no-op: nothing is appended, and the stream is
    /// never touched even if it doesn't exist yet.
    pub async fn transact<D>(&self, decide: D, context: Context) -> Result<(), EngineError>
    where
        D: Fn(&State) -> Vec<Event>,
    {
        self.transact_result(|state| ((), decide(state)), context).await
    }

    /// Like [`Decider::transact`], but `decide` also computes a result
    /// derived from the state it decided against, returned once the
    /// corresponding events have committed.
    pub async fn transact_result<R, D>(&self, decide: D, context: Context) -> Result<R, EngineError>
    where
        D: Fn(&State) -> (R, Vec<Event>),
    {
        let (mut token, mut state) = self.category.load(&self.stream, LoadOption::Default).await?;
        let max_attempts = self.category.max_resync_attempts();
        let mut attempts = 0u32;

        loop {
            let (result, new_events) = decide(&state);

            if new_events.is_empty() {
                return Ok(result);
            }

            attempts += 1;
            if attempts > max_attempts {
                return Err(EngineError::MaxResyncsExhausted {
                    stream: self.stream.as_wire(),
                    attempts,
                });
            }

            match self
                .category
                .try_sync(&self.stream, &token, &state, new_events, &context)
                .await?
            {
                SyncOutcome::Written(..) => return Ok(result),
                SyncOutcome::Conflict => {
                    let (reloaded_token, reloaded_state) =
                        self.category.incremental_reload(&self.stream, token, state).await?;
                    token = reloaded_token;
                    state = reloaded_state;
                }
            }
        }
    }

    /// Like [`Decider::query`], but cancellable: the in-flight store call is
    /// raced against `cancel`, which propagates as [`EngineError::Cancelled`]
    /// if it fires first. The engine owns no threads and performs no cleanup
    /// beyond this: a cancelled load simply abandons its awaited future.
    pub async fn query_cancellable<R>(
        &self,
        project: impl FnOnce(&State) -> R,
        cancel: &CancellationToken,
    ) -> Result<R, EngineError> {
        tokio::select! {
            result = self.query(project) => result,
            () = cancel.cancelled() => Err(EngineError::Cancelled { stream: self.stream.as_wire() }),
        }
    }

    /// Like [`Decider::transact`], but cancellable (see
    /// [`Decider::query_cancellable`]). Cancellation can only ever abandon
    /// the load or the in-flight append it was racing; it never leaves a
    /// partially-applied retry loop, since each iteration's `try_sync` either
    /// commits or reports a conflict before the next cancellation check.
    pub async fn transact_cancellable<D>(
        &self,
        decide: D,
        context: Context,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError>
    where
        D: Fn(&State) -> Vec<Event>,
    {
        tokio::select! {
            result = self.transact(decide, context) => result,
            () = cancel.cancelled() => Err(EngineError::Cancelled { stream: self.stream.as_wire() }),
        }
    }
}
