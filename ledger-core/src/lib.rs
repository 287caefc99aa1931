#![allow(missing_docs)]

//! Core building blocks for event-sourced applications.
//!
//! A [`category::Category`] binds a [`adapter::StoreAdapter`] to a single
//! event type, a pure fold function and an [`access::AccessStrategy`];
//! [`decider::Decider`] is the thin per-stream facade application code calls
//! `query`/`transact`/`transact_result` on.

pub mod access;
pub mod adapter;
pub mod cache;
pub mod category;
pub mod codec;
pub mod decider;
pub mod error;
pub mod inmemory;
pub mod observer;
pub mod timeline;
pub mod token;

pub use access::AccessStrategy;
pub use adapter::StoreAdapter;
pub use cache::{Cache, CacheStrategy};
pub use category::{Category, LoadOption};
pub use codec::{Codec, EncodeContext, JsonCodec, Message};
pub use decider::Decider;
pub use error::{ConfigError, EngineError};
pub use inmemory::InMemoryStoreAdapter;
pub use observer::{MetricsObserver, NoopObserver, Observer};
pub use timeline::{EncodedEvent, TimelineEvent};
pub use token::{ConflictError, Index, InvalidStreamName, Position, StreamName, Token, Version};
