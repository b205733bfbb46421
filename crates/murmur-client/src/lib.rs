//! Client-side sync engine for Murmur.
//!
//! The authoritative state lives on the server; this crate keeps a thin
//! local layer on top of it: an HTTP API wrapper, a fallback-only feed
//! cache, per-conversation UI session context, and the notification
//! dispatcher that decides when a new message becomes a user-visible alert.

pub mod api;
pub mod cache;
pub mod notifier;
pub mod session;
pub mod sync;

mod error;

pub use api::ChatApi;
pub use cache::FeedCache;
pub use error::{ClientError, Result};
pub use notifier::{NotificationDispatcher, Notifier};
pub use session::{ReplyTarget, Session, Visibility};
pub use sync::{ReconcileKind, SyncEngine};
