//! # murmur-store
//!
//! Authoritative SQLite-backed store for the Murmur chat core.
//!
//! The crate exposes a synchronous [`Database`] handle wrapping a
//! `rusqlite::Connection` with typed helpers for every domain concern:
//! users, conversations, the per-conversation message feed, the
//! delivered/seen receipt sets, and push subscriber records.
//!
//! Delivery state is never stored as a scalar: the two receipt relations are
//! grow-only sets and every derived state (`sent`/`delivered`/`seen`) is
//! computed from them at read time.

pub mod conversations;
pub mod database;
pub mod feed;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod reconcile;
pub mod subscriptions;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
