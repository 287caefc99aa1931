//! The stream cache: keeps a `(Token, State)` pair per stream in memory,
//! coalesces concurrent loads of the same stream into a single backend read,
//! and evicts entries on a sliding or fixed window.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;

use crate::token::Token;

/// How cached entries expire.
#[derive(Debug, Clone, Copy)]
pub enum CacheStrategy {
    /// Caching is disabled; every load goes to the backend.
    None,
    /// Every access (read or write) to an entry pushes its expiry forward by
    /// `window`.
    Sliding(Duration),
    /// An entry expires `window` after it was last written, regardless of
    /// how many times it has been read since.
    Fixed(Duration),
}

#[derive(Clone)]
struct Entry<State> {
    token: Token,
    state: Arc<State>,
    inserted_at: Instant,
    expires_at: Option<Instant>,
}

struct Inner<State> {
    entries: HashMap<String, Entry<State>>,
}

/// A per-category cache of `(Token, State)` pairs keyed by stream name.
///
/// `Err` is the error type a backend load can fail with; it is shared by
/// every call site so that single-flight coalescing (built on
/// [`futures::future::Shared`]) can hold one future type per key regardless
/// of which caller started the load.
pub struct Cache<State, Err> {
    strategy: CacheStrategy,
    inner: Mutex<Inner<State>>,
    inflight: Mutex<HashMap<String, Shared<BoxFuture<'static, Result<(Token, Arc<State>), Arc<Err>>>>>>,
}

impl<State, Err> Cache<State, Err>
where
    State: Send + Sync + 'static,
    Err: Send + Sync + 'static,
{
    /// Builds a new, empty cache with the given eviction strategy.
    pub fn new(strategy: CacheStrategy) -> Self {
        Self {
            strategy,
            inner: Mutex::new(Inner { entries: HashMap::new() }),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached `(Token, State)` for `key` if present and, when
    /// `max_age` is given, no older than that.
    pub fn fresh(&self, key: &str, max_age: Option<Duration>) -> Option<(Token, Arc<State>)> {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        if let Some(entry) = inner.entries.get(key) {
            if matches!(entry.expires_at, Some(exp) if now >= exp) {
                inner.entries.remove(key);
                return None;
            }
        }

        let entry = inner.entries.get_mut(key)?;

        if let Some(max_age) = max_age {
            if now.duration_since(entry.inserted_at) > max_age {
                return None;
            }
        }

        if let CacheStrategy::Sliding(window) = self.strategy {
            entry.expires_at = Some(now + window);
        }

        Some((entry.token.clone(), entry.state.clone()))
    }

    /// Returns the cached entry for `key` regardless of freshness, without
    /// refreshing a sliding expiry. Used to decide whether a cache miss
    /// should trigger a full load (no prior entry) or an incremental reload
    /// (a stale prior entry to extend).
    pub fn peek(&self, key: &str) -> Option<(Token, Arc<State>)> {
        let inner = self.inner.lock();
        inner.entries.get(key).map(|e| (e.token.clone(), e.state.clone()))
    }

    /// Publishes `token`/`state` for `key`, unless a fresher entry (per
    /// [`Token::is_stale`]) is already present.
    pub fn publish(&self, key: &str, token: Token, state: Arc<State>) {
        if matches!(self.strategy, CacheStrategy::None) {
            return;
        }

        let mut inner = self.inner.lock();
        let now = Instant::now();

        let should_replace = match inner.entries.get(key) {
            Some(existing) => !Token::is_stale(&existing.token, &token),
            None => true,
        };

        if !should_replace {
            return;
        }

        let expires_at = match self.strategy {
            CacheStrategy::None => None,
            CacheStrategy::Sliding(window) | CacheStrategy::Fixed(window) => Some(now + window),
        };

        inner.entries.insert(
            key.to_owned(),
            Entry {
                token,
                state,
                inserted_at: now,
                expires_at,
            },
        );
    }

    /// Removes whatever entry is cached for `key`, regardless of freshness.
    pub fn invalidate(&self, key: &str) {
        self.inner.lock().entries.remove(key);
    }

    /// Runs `loader` to populate `key`, coalescing concurrent callers for
    /// the same key into a single in-flight call, and publishes the result
    /// on success (subject to the staleness gate in [`Cache::publish`]).
    ///
    /// The first caller to miss on `key` starts the load; any caller that
    /// misses the same key while that load is in flight awaits the same
    /// [`futures::future::Shared`] future instead of starting its own.
    pub async fn get_or_load<F, Fut>(&self, key: &str, loader: F) -> Result<(Token, Arc<State>), Arc<Err>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(Token, Arc<State>), Err>> + Send + 'static,
    {
        let shared = {
            let mut inflight = self.inflight.lock();
            if let Some(existing) = inflight.get(key) {
                existing.clone()
            } else {
                let boxed: BoxFuture<'static, Result<(Token, Arc<State>), Arc<Err>>> =
                    Box::pin(async move { loader().await.map_err(Arc::new) });
                let shared = boxed.shared();
                inflight.insert(key.to_owned(), shared.clone());
                shared
            }
        };

        let result = shared.await;
        self.inflight.lock().remove(key);

        if let Ok((token, state)) = &result {
            self.publish(key, token.clone(), state.clone());
        }

        result
    }

    /// Spawns a background task that periodically sweeps expired entries,
    /// so memory is reclaimed even for streams nobody reads again. Returns a
    /// handle the caller can abort to stop the sweep.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()>
    where
        State: 'static,
        Err: 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let now = Instant::now();
                let mut inner = self.inner.lock();
                inner.entries.retain(|_, entry| !matches!(entry.expires_at, Some(exp) if now >= exp));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::token::Position;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct TestError;

    fn token_at(version: i64) -> Token {
        Token::new(
            Position {
                stream_version: version,
                compaction_event_index: None,
                batch_capacity_limit: None,
            },
            0,
        )
    }

    #[tokio::test]
    async fn single_flight_coalesces_concurrent_loads() {
        let cache: Arc<Cache<u32, TestError>> = Arc::new(Cache::new(CacheStrategy::Sliding(Duration::from_secs(60))));
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_load("stream-a", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok::<_, TestError>((token_at(0), Arc::new(42u32)))
                    })
                    .await
            }));
        }

        for handle in handles {
            let (_, state) = handle.await.unwrap().unwrap();
            assert_eq!(*state, 42);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn publish_rejects_stale_tokens() {
        let cache: Cache<u32, TestError> = Cache::new(CacheStrategy::Sliding(Duration::from_secs(60)));
        cache.publish("s", token_at(5), Arc::new(1));
        cache.publish("s", token_at(2), Arc::new(2));

        let (token, state) = cache.fresh("s", None).unwrap();
        assert_eq!(token.stream_version(), 5);
        assert_eq!(*state, 1);
    }

    #[test]
    fn fixed_window_does_not_refresh_on_read() {
        let cache: Cache<u32, TestError> = Cache::new(CacheStrategy::Fixed(Duration::from_millis(20)));
        cache.publish("s", token_at(0), Arc::new(1));
        assert!(cache.fresh("s", None).is_some());
        std::thread::sleep(Duration::from_millis(30));
        assert!(cache.fresh("s", None).is_none());
    }
}
