//! Runs the numbered-slot reservation decider against the in-memory
//! adapter, walking through a reserve / confirm / release cycle.
//!
//! The original reservation algorithm this decider is modeled on was left
//! unimplemented in its source; the gapless `reserve` / `confirm` / `release`
//! contract exercised here is the inferred replacement (see DESIGN.md).

use std::collections::BTreeSet;
use std::sync::Arc;

use ledger_core::{AccessStrategy, Category, Decider, EncodeContext, InMemoryStoreAdapter, JsonCodec, Message, StreamName};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
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

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Reservations {
    reserved: BTreeSet<u32>,
    confirmed: BTreeSet<u32>,
    released: BTreeSet<u32>,
    next: u32,
}

fn fold(mut state: Reservations, event: ReservationEvent) -> Reservations {
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

/// Reserves `count` fresh, gapless slots starting at `state.next`.
fn decide_reserve(state: &Reservations, count: u32) -> Vec<ReservationEvent> {
    (0..count).map(|offset| ReservationEvent::Reserved { slot: state.next + offset }).collect()
}

fn decide_confirm(state: &Reservations, slot: u32) -> Vec<ReservationEvent> {
    if state.reserved.contains(&slot) {
        vec![ReservationEvent::Confirmed { slot }]
    } else {
        Vec::new()
    }
}

fn decide_release(state: &Reservations, slot: u32) -> Vec<ReservationEvent> {
    if state.reserved.contains(&slot) {
        vec![ReservationEvent::Released { slot }]
    } else {
        Vec::new()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let adapter = Arc::new(InMemoryStoreAdapter::new(500));
    let codec = Arc::new(JsonCodec::<ReservationEvent>::new());

    let category = Arc::new(Category::new(
        adapter,
        codec,
        fold,
        Reservations::default(),
        AccessStrategy::Unoptimized,
        None,
    )?);

    let stream = StreamName::new("Reservations", "Showtime-42")?;
    let decider: Decider<InMemoryStoreAdapter, ReservationEvent, Reservations> = Decider::new(category, stream);

    let context = EncodeContext::default();

    decider.transact(|state| decide_reserve(state, 3), context.clone()).await?;
    let after_reserve = decider.query(|s| s.clone()).await?;
    tracing::info!(?after_reserve, "after reserving 3 slots");
    assert_eq!(after_reserve.reserved, BTreeSet::from([0, 1, 2]));
    assert_eq!(after_reserve.next, 3);

    decider.transact(|state| decide_confirm(state, 1), context.clone()).await?;
    decider.transact(|state| decide_release(state, 0), context.clone()).await?;

    let final_state = decider.query(|s| s.clone()).await?;
    tracing::info!(?final_state, "after confirming slot 1 and releasing slot 0");
    assert_eq!(final_state.reserved, BTreeSet::from([2]));
    assert_eq!(final_state.confirmed, BTreeSet::from([1]));
    assert_eq!(final_state.released, BTreeSet::from([0]));
    assert_eq!(final_state.next, 3);

    Ok(())
}
