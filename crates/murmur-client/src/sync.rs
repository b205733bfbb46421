//! The client sync loop's decision core.
//!
//! [`SyncEngine`] ties the feed cache and the notification dispatcher
//! together and decides which receipt reconciliation (if any) a sync pass
//! should request.  It is deliberately transport-free: callers fetch over
//! [`crate::ChatApi`] and hand the results in, which keeps every rule here
//! testable without a server.

use chrono::{DateTime, Utc};

use murmur_shared::protocol::{ConversationSummary, FeedMessage, PushPayload};
use murmur_shared::{ConversationId, UserId};

use crate::cache::FeedCache;
use crate::error::Result;
use crate::notifier::NotificationDispatcher;
use crate::session::{Session, Visibility};

/// Which receipt set a sync pass should extend for the open conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileKind {
    Delivered,
    Seen,
}

pub struct SyncEngine {
    cache: FeedCache,
    dispatcher: NotificationDispatcher,
}

impl SyncEngine {
    pub fn new(cache: FeedCache) -> Self {
        Self {
            cache,
            dispatcher: NotificationDispatcher::new(),
        }
    }

    /// Fold a fetch attempt into the cache and produce the feed to render.
    ///
    /// A successful fetch is authoritative: it overwrites the cached feed
    /// wholesale and is returned as-is (a cache write failure is logged, not
    /// surfaced).  A failed fetch falls back to the cached feed when one
    /// exists; only when both are unavailable does the error propagate.
    pub fn resolve_feed(
        &self,
        conversation: ConversationId,
        fetched: Result<Vec<FeedMessage>>,
    ) -> Result<Vec<FeedMessage>> {
        match fetched {
            Ok(feed) => {
                if let Err(e) = self.cache.set(conversation, &feed) {
                    tracing::warn!(
                        conversation = %conversation,
                        error = %e,
                        "failed to cache feed"
                    );
                }
                Ok(feed)
            }
            Err(e) => match self.cache.get(conversation) {
                Some(cached) => {
                    tracing::debug!(
                        conversation = %conversation,
                        error = %e,
                        "serving cached feed after fetch failure"
                    );
                    Ok(cached)
                }
                None => Err(e),
            },
        }
    }

    /// Drop the cached feed for a conversation (after deleting it).
    pub fn forget(&self, conversation: ConversationId) -> Result<()> {
        self.cache.remove(conversation)
    }

    /// Run the notification pass over a freshly fetched conversation list.
    /// Returns the payloads that should be shown, in list order.
    pub fn observe_conversations(
        &mut self,
        summaries: &[ConversationSummary],
        me: &UserId,
        session: &Session,
        now: DateTime<Utc>,
    ) -> Vec<PushPayload> {
        let active = session.selected();
        summaries
            .iter()
            .filter_map(|summary| self.dispatcher.observe(summary, me, active, now))
            .collect()
    }

    /// Which receipt reconciliation this sync pass should request for
    /// `conversation`.
    ///
    /// Only the open conversation reconciles at all.  With the window in the
    /// foreground the user is actually looking at it, so messages become
    /// seen; in the background they merely arrived, so they become
    /// delivered.
    pub fn reconcile_action(
        &self,
        conversation: ConversationId,
        session: &Session,
        visibility: Visibility,
    ) -> Option<ReconcileKind> {
        if session.selected() != Some(conversation) {
            return None;
        }
        match visibility {
            Visibility::Foreground => Some(ReconcileKind::Seen),
            Visibility::Background => Some(ReconcileKind::Delivered),
        }
    }
}
