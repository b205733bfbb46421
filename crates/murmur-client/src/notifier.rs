//! Notification dispatch.
//!
//! Decides, per conversation, whether the newest message warrants a
//! user-visible alert.  The dispatcher remembers the last message id it has
//! observed for each conversation and fires at most once per message, no
//! matter how many sync passes see it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use murmur_shared::constants::NOTIFY_RECENCY_WINDOW_SECS;
use murmur_shared::protocol::{ConversationSummary, PushPayload};
use murmur_shared::{ConversationId, MessageId, MessageType, UserId};

/// Platform notification surface (system tray, OS notification center).
pub trait Notifier {
    /// Whether the user has granted notification permission.
    fn permission_granted(&self) -> bool;

    fn show(&self, payload: &PushPayload) -> std::io::Result<()>;
}

/// Show a payload on a notifier, swallowing failures.  A broken
/// notification surface must never affect sync.
pub fn fire(notifier: &impl Notifier, payload: &PushPayload) {
    if !notifier.permission_granted() {
        tracing::debug!(title = %payload.title, "notification suppressed (no permission)");
        return;
    }
    if let Err(e) = notifier.show(payload) {
        tracing::warn!(error = %e, "failed to show notification");
    }
}

#[derive(Debug, Default)]
pub struct NotificationDispatcher {
    last_observed: HashMap<ConversationId, MessageId>,
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe a conversation's newest message and decide whether to alert.
    ///
    /// The first sighting of a conversation primes the dispatcher without
    /// firing, so a fresh app start does not replay alerts for history.  A
    /// changed message id fires only when all of these hold:
    /// - the sender is not `me`,
    /// - the conversation is not the one currently open (`active`),
    /// - the message is recent (younger than the recency window).
    ///
    /// The observed id advances even when the alert is suppressed; a message
    /// skipped for being stale or active never fires later.
    pub fn observe(
        &mut self,
        summary: &ConversationSummary,
        me: &UserId,
        active: Option<ConversationId>,
        now: DateTime<Utc>,
    ) -> Option<PushPayload> {
        let last = summary.last_message.as_ref()?;

        let previous = self.last_observed.insert(summary.id, last.id);
        match previous {
            None => return None,
            Some(seen) if seen == last.id => return None,
            Some(_) => {}
        }

        if last.sender.is(me) {
            return None;
        }
        if active == Some(summary.id) {
            return None;
        }
        let age = now.signed_duration_since(last.created_at);
        if age.num_seconds() >= NOTIFY_RECENCY_WINDOW_SECS {
            return None;
        }

        let body = match last.message_type {
            MessageType::Text => last.content.clone(),
            MessageType::Image => "Sent an image".to_string(),
            MessageType::Video => "Sent a video".to_string(),
        };

        Some(PushPayload {
            title: summary.display_name().to_string(),
            body,
            icon: summary.display_image().to_string(),
            url: format!("/chats/{}", summary.id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use murmur_shared::protocol::LastMessage;
    use murmur_shared::Sender;

    fn summary_with(
        conversation: ConversationId,
        sender: UserId,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> ConversationSummary {
        ConversationSummary {
            id: conversation,
            is_group: false,
            participants: vec![],
            admin: None,
            name: Some("Alice".into()),
            image: Some("/a.png".into()),
            group_name: None,
            group_image: None,
            created_at,
            last_message: Some(LastMessage {
                id: MessageId::new(),
                sender: Sender::User(sender),
                content: content.into(),
                message_type: MessageType::Text,
                created_at,
                delivered_to: vec![],
                seen_by: vec![],
            }),
            unread: true,
        }
    }

    #[test]
    fn first_sighting_primes_without_firing() {
        let mut dispatcher = NotificationDispatcher::new();
        let me = UserId::new();
        let them = UserId::new();
        let conv = ConversationId::new();
        let now = Utc::now();

        let summary = summary_with(conv, them, "hello", now);
        assert!(dispatcher.observe(&summary, &me, None, now).is_none());

        // The same message never fires on later passes either.
        assert!(dispatcher.observe(&summary, &me, None, now).is_none());

        // But a genuinely new message does.
        let newer = summary_with(conv, them, "again", now);
        let payload = dispatcher.observe(&newer, &me, None, now).unwrap();
        assert_eq!(payload.title, "Alice");
        assert_eq!(payload.body, "again");
    }

    #[test]
    fn own_messages_never_fire() {
        let mut dispatcher = NotificationDispatcher::new();
        let me = UserId::new();
        let conv = ConversationId::new();
        let now = Utc::now();

        dispatcher.observe(&summary_with(conv, me, "first", now), &me, None, now);
        let mine = summary_with(conv, me, "mine", now);
        assert!(dispatcher.observe(&mine, &me, None, now).is_none());
    }

    #[test]
    fn active_conversation_is_suppressed_and_not_replayed() {
        let mut dispatcher = NotificationDispatcher::new();
        let me = UserId::new();
        let them = UserId::new();
        let conv = ConversationId::new();
        let now = Utc::now();

        dispatcher.observe(&summary_with(conv, them, "first", now), &me, None, now);

        let newer = summary_with(conv, them, "while open", now);
        assert!(dispatcher.observe(&newer, &me, Some(conv), now).is_none());

        // Closing the conversation does not resurrect the suppressed alert.
        assert!(dispatcher.observe(&newer, &me, None, now).is_none());
    }

    #[test]
    fn stale_messages_do_not_fire() {
        let mut dispatcher = NotificationDispatcher::new();
        let me = UserId::new();
        let them = UserId::new();
        let conv = ConversationId::new();
        let now = Utc::now();

        dispatcher.observe(&summary_with(conv, them, "first", now), &me, None, now);

        let old = now - Duration::seconds(NOTIFY_RECENCY_WINDOW_SECS + 1);
        let stale = summary_with(conv, them, "from a while ago", old);
        assert!(dispatcher.observe(&stale, &me, None, now).is_none());
    }

    #[test]
    fn fire_respects_the_permission_gate() {
        use std::cell::Cell;

        struct Recorder {
            granted: bool,
            shown: Cell<usize>,
        }
        impl Notifier for Recorder {
            fn permission_granted(&self) -> bool {
                self.granted
            }
            fn show(&self, _payload: &PushPayload) -> std::io::Result<()> {
                self.shown.set(self.shown.get() + 1);
                Ok(())
            }
        }

        let payload = PushPayload {
            title: "Alice".into(),
            body: "hi".into(),
            icon: "/a.png".into(),
            url: "/chats/x".into(),
        };

        let denied = Recorder { granted: false, shown: Cell::new(0) };
        fire(&denied, &payload);
        assert_eq!(denied.shown.get(), 0);

        let granted = Recorder { granted: true, shown: Cell::new(0) };
        fire(&granted, &payload);
        assert_eq!(granted.shown.get(), 1);
    }

    #[test]
    fn media_messages_use_a_generic_body() {
        let mut dispatcher = NotificationDispatcher::new();
        let me = UserId::new();
        let them = UserId::new();
        let conv = ConversationId::new();
        let now = Utc::now();

        dispatcher.observe(&summary_with(conv, them, "first", now), &me, None, now);

        let mut summary = summary_with(conv, them, "https://cdn/img.png", now);
        summary.last_message.as_mut().unwrap().message_type = MessageType::Image;
        let payload = dispatcher.observe(&summary, &me, None, now).unwrap();
        assert_eq!(payload.body, "Sent an image");
    }
}
