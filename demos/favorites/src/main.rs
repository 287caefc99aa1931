//! Runs the Favorites-list decider against the in-memory adapter, walking
//! through the add / idempotent-add / concurrent-add scenarios the core
//! engine is built to support.

use std::sync::Arc;

use ledger_core::{AccessStrategy, Category, Decider, EncodeContext, InMemoryStoreAdapter, JsonCodec, Message, StreamName};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
enum FavoriteEvent {
    Added { item: String },
}

impl Message for FavoriteEvent {
    fn name(&self) -> &'static str {
        match self {
            FavoriteEvent::Added { .. } => "FavoriteAdded",
        }
    }
}

type Favorites = Vec<String>;

fn fold(mut state: Favorites, event: FavoriteEvent) -> Favorites {
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

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let adapter = Arc::new(InMemoryStoreAdapter::new(500));
    let codec = Arc::new(JsonCodec::<FavoriteEvent>::new());

    let category = Arc::new(Category::new(
        adapter,
        codec,
        fold,
        Favorites::new(),
        AccessStrategy::Unoptimized,
        None,
    )?);

    let stream = StreamName::new("Favorites", "ClientJ")?;
    let decider: Decider<InMemoryStoreAdapter, FavoriteEvent, Favorites> = Decider::new(category, stream);

    let context = EncodeContext::default();

    decider.transact(|state| decide_add(state, "a"), context.clone()).await?;
    tracing::info!(favorites = ?decider.query(|s| s.clone()).await?, "after adding \"a\"");

    decider.transact(|state| decide_add(state, "b"), context.clone()).await?;
    let after_b = decider.query(|s| s.clone()).await?;
    tracing::info!(favorites = ?after_b, "after adding \"b\"");
    assert_eq!(after_b, vec!["b".to_owned(), "a".to_owned()]);

    decider.transact(|state| decide_add(state, "a"), context.clone()).await?;
    let after_idempotent_add = decider.query(|s| s.clone()).await?;
    tracing::info!(favorites = ?after_idempotent_add, "after re-adding \"a\" (idempotent no-op)");
    assert_eq!(after_idempotent_add, after_b);

    let first = decider.transact(|state| decide_add(state, "c"), context.clone());
    let second = decider.transact(|state| decide_add(state, "c"), context.clone());
    let (first, second) = tokio::join!(first, second);
    first?;
    second?;

    let final_state = decider.query(|s| s.clone()).await?;
    tracing::info!(favorites = ?final_state, "after two concurrent adds of \"c\"");
    assert_eq!(final_state, vec!["c".to_owned(), "b".to_owned(), "a".to_owned()]);

    Ok(())
}
