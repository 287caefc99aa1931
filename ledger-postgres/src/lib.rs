#![allow(missing_docs)]

//! A relational [`ledger_core::StoreAdapter`] backed by PostgreSQL.
//!
//! Streams are rows in an `events` table keyed by `(stream_name, index)`;
//! optimistic concurrency is enforced by two stored routines migrated in
//! alongside the schema (see `migrations/`), following the same
//! `SERIALIZABLE DEFERRABLE` + stored-procedure pattern the rest of this
//! crate's call sites already assume.

pub mod adapter;
pub mod config;

pub use adapter::{PgError, PostgresStoreAdapter};
pub use config::Config;

/// Embedded schema migrations, run once by [`PostgresStoreAdapter::connect`].
pub static MIGRATIONS: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Maps a Postgres error raised while upserting a stream's version to a
/// version-conflict signal, distinguishing it from a transport/availability
/// failure. Conflicts surface as SQLSTATE `40001` (serialization failure),
/// raised explicitly by the `upsert_stream` procedure.
pub(crate) fn is_conflict_error(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(sqlx::error::DatabaseError::code)
        .map_or(false, |code| code == "40001")
}
