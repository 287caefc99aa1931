//! End-to-end scenarios against the in-memory adapter, covering the engine's
//! public surface (`Category`, `Decider`, the five access strategies) the
//! way a consumer crate would exercise it.

use std::sync::Arc;

use ledger_core::{
    AccessStrategy, Category, Decider, EncodeContext, EngineError, InMemoryStoreAdapter, JsonCodec, LoadOption,
    Message, StreamName,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum FavoriteEvent {
    Added { item: String },
}

impl Message for FavoriteEvent {
    fn name(&self) -> &'static str {
        "FavoriteAdded"
    }
}

type Favorites = Vec<String>;

fn fold_favorites(mut state: Favorites, event: FavoriteEvent) -> Favorites {
    match event {
        FavoriteEvent::Added { item } => {
            state.insert(0, item);
            state
        },
    }
}

fn decide_add(state: &Favorites, item: &str) -> Vec<FavoriteEvent> {
    if state.iter().any(|existing| existing == item) {
        Vec::new()
    } else {
        vec![FavoriteEvent::Added { item: item.to_owned() }]
    }
}

fn favorites_decider(
    cache: Option<ledger_core::CacheStrategy>,
) -> Decider<InMemoryStoreAdapter, FavoriteEvent, Favorites> {
    let adapter = Arc::new(InMemoryStoreAdapter::new(500));
    let codec = Arc::new(JsonCodec::<FavoriteEvent>::new());
    let category = Arc::new(
        Category::new(adapter, codec, fold_favorites, Favorites::new(), AccessStrategy::Unoptimized, cache).unwrap(),
    );
    let stream = StreamName::new("Favorites", "ClientJ").unwrap();
    Decider::new(category, stream)
}

#[tokio::test]
async fn s1_add_then_list() {
    let decider = favorites_decider(Some(ledger_core::CacheStrategy::Sliding(std::time::Duration::from_secs(60))));
    let context = EncodeContext::default();

    decider.transact(|state| decide_add(state, "a"), context.clone()).await.unwrap();
    assert_eq!(decider.query(|s| s.clone()).await.unwrap(), vec!["a".to_owned()]);

    decider.transact(|state| decide_add(state, "b"), context.clone()).await.unwrap();
    assert_eq!(decider.query(|s| s.clone()).await.unwrap(), vec!["b".to_owned(), "a".to_owned()]);
}

#[tokio::test]
async fn s2_idempotent_add_is_a_no_op() {
    let decider = favorites_decider(None);
    let context = EncodeContext::default();

    decider.transact(|state| decide_add(state, "a"), context.clone()).await.unwrap();
    decider.transact(|state| decide_add(state, "b"), context.clone()).await.unwrap();

    let before = decider.query(|s| s.clone()).await.unwrap();
    decider.transact(|state| decide_add(state, "a"), context.clone()).await.unwrap();
    let after = decider.query(|s| s.clone()).await.unwrap();

    assert_eq!(before, after);
}

#[tokio::test]
async fn s3_concurrent_add_converges_without_duplication() {
    let decider = favorites_decider(None);
    let context = EncodeContext::default();

    decider.transact(|state| decide_add(state, "a"), context.clone()).await.unwrap();
    decider.transact(|state| decide_add(state, "b"), context.clone()).await.unwrap();

    let first = decider.transact(|state| decide_add(state, "c"), context.clone());
    let second = decider.transact(|state| decide_add(state, "c"), context.clone());
    let (first, second) = tokio::join!(first, second);
    first.unwrap();
    second.unwrap();

    let final_state = decider.query(|s| s.clone()).await.unwrap();
    assert_eq!(final_state, vec!["c".to_owned(), "b".to_owned(), "a".to_owned()]);
}

#[tokio::test]
async fn query_cancellable_propagates_a_pre_fired_token() {
    let decider = favorites_decider(None);
    let context = EncodeContext::default();
    decider.transact(|state| decide_add(state, "a"), context.clone()).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = decider.query_cancellable(|s| s.clone(), &cancel).await;
    assert!(matches!(result, Err(EngineError::Cancelled { .. })));
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum CounterEvent {
    Added(i64),
    Snapshot(i64),
}

impl Message for CounterEvent {
    fn name(&self) -> &'static str {
        match self {
            CounterEvent::Added(_) => "CounterAdded",
            CounterEvent::Snapshot(_) => "CounterSnapshot",
        }
    }
}

fn fold_counter(state: i64, event: CounterEvent) -> i64 {
    match event {
        CounterEvent::Added(n) => state + n,
        CounterEvent::Snapshot(n) => n,
    }
}

#[tokio::test]
async fn s4_rolling_snapshots_keep_backward_scans_within_a_few_batches() {
    let batch_size = 10;
    let adapter = Arc::new(InMemoryStoreAdapter::new(batch_size).with_max_batch_reads(3));
    let codec = Arc::new(JsonCodec::<CounterEvent>::new());

    let is_origin: ledger_core::AccessStrategy<CounterEvent, i64> = AccessStrategy::RollingSnapshots(
        Arc::new(|event: &CounterEvent| matches!(event, CounterEvent::Snapshot(_))),
        Arc::new(|state: &i64| CounterEvent::Snapshot(*state)),
    );

    let category = Arc::new(Category::new(adapter, codec, fold_counter, 0i64, is_origin, None).unwrap());
    let stream = StreamName::new("Counters", "c1").unwrap();
    let decider: Decider<InMemoryStoreAdapter, CounterEvent, i64> = Decider::new(category, stream);

    let context = EncodeContext::default();
    for _ in 0..30 {
        decider.transact(|_| vec![CounterEvent::Added(1)], context.clone()).await.unwrap();
    }

    // Forces a fresh backward scan rather than a cached read.
    let state = decider.query_with(LoadOption::RequireLeader, |s| *s).await.unwrap();
    assert_eq!(state, 30);
}

#[tokio::test]
async fn s5_latest_known_event_folds_only_the_last_event() {
    let adapter = Arc::new(InMemoryStoreAdapter::new(500));
    let codec = Arc::new(JsonCodec::<CounterEvent>::new());

    let category = Arc::new(
        Category::new(adapter, codec, fold_counter, 0i64, AccessStrategy::LatestKnownEvent, None).unwrap(),
    );
    let stream = StreamName::new("Counters", "c2").unwrap();
    let decider: Decider<InMemoryStoreAdapter, CounterEvent, i64> = Decider::new(category, stream);

    let context = EncodeContext::default();
    decider.transact(|_| vec![CounterEvent::Added(1)], context.clone()).await.unwrap();
    decider.transact(|_| vec![CounterEvent::Added(2)], context.clone()).await.unwrap();
    decider.transact(|_| vec![CounterEvent::Added(3)], context.clone()).await.unwrap();

    // Each decided event folds from the *initial* state, since only the
    // latest event is ever read back.
    assert_eq!(decider.query(|s| *s).await.unwrap(), 3);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum ReservationEvent {
    Reserved { slot: u32 },
    Confirmed { slot: u32 },
    Released { slot: u32 },
}

impl Message for ReservationEvent {
    fn name(&self) -> &'static str {
        match self {
            ReservationEvent::Reserved { .. } => "SlotReserved",
            ReservationEvent::Confirmed { .. } => "SlotConfirmed",
            ReservationEvent::Released { .. } => "SlotReleased",
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Reservations {
    reserved: std::collections::BTreeSet<u32>,
    confirmed: std::collections::BTreeSet<u32>,
    released: std::collections::BTreeSet<u32>,
    next: u32,
}

fn fold_reservations(mut state: Reservations, event: ReservationEvent) -> Reservations {
    match event {
        ReservationEvent::Reserved { slot } => {
            state.reserved.insert(slot);
            state.next = state.next.max(slot + 1);
        },
        ReservationEvent::Confirmed { slot } => {
            state.reserved.remove(&slot);
            state.confirmed.insert(slot);
        },
        ReservationEvent::Released { slot } => {
            state.reserved.remove(&slot);
            state.released.insert(slot);
        },
    }
    state
}

#[tokio::test]
async fn s6_gapless_reserve_confirm_release() {
    let adapter = Arc::new(InMemoryStoreAdapter::new(500));
    let codec = Arc::new(JsonCodec::<ReservationEvent>::new());
    let category = Arc::new(
        Category::new(adapter, codec, fold_reservations, Reservations::default(), AccessStrategy::Unoptimized, None)
            .unwrap(),
    );
    let stream = StreamName::new("Reservations", "r1").unwrap();
    let decider: Decider<InMemoryStoreAdapter, ReservationEvent, Reservations> = Decider::new(category, stream);
    let context = EncodeContext::default();

    decider
        .transact(
            |state| (0..3).map(|offset| ReservationEvent::Reserved { slot: state.next + offset }).collect(),
            context.clone(),
        )
        .await
        .unwrap();

    decider
        .transact(
            |state| {
                if state.reserved.contains(&1) {
                    vec![ReservationEvent::Confirmed { slot: 1 }]
                } else {
                    Vec::new()
                }
            },
            context.clone(),
        )
        .await
        .unwrap();

    decider
        .transact(
            |state| {
                if state.reserved.contains(&0) {
                    vec![ReservationEvent::Released { slot: 0 }]
                } else {
                    Vec::new()
                }
            },
            context.clone(),
        )
        .await
        .unwrap();

    let final_state = decider.query(|s| s.clone()).await.unwrap();
    assert_eq!(final_state.reserved, std::collections::BTreeSet::from([2]));
    assert_eq!(final_state.confirmed, std::collections::BTreeSet::from([1]));
    assert_eq!(final_state.released, std::collections::BTreeSet::from([0]));
    assert_eq!(final_state.next, 3);
}
