#![allow(missing_docs)]

//! A document-store [`ledger_core::StoreAdapter`] backed by Redis Streams.
//!
//! Each event stream is a Redis Stream keyed by its wire name; appends are
//! a single Lua script invocation (see `src/append_to_store.lua`) so the
//! optimistic-concurrency check and the batch of `XADD`s land atomically.

pub mod adapter;
pub mod config;

pub use adapter::{RedisError, RedisStoreAdapter};
pub use config::Config;
