//! Per-window UI session context.
//!
//! Tracks which conversation is open and the message being replied to.  The
//! reply target is scoped to the session: switching conversations clears it
//! so a reply can never attach to the wrong thread.

use murmur_shared::{ConversationId, MessageId, MessageType};

/// Whether the app window currently has the user's attention.  Drives the
/// seen/delivered split in [`crate::SyncEngine::reconcile_action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Foreground,
    Background,
}

/// The message a draft is replying to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyTarget {
    pub id: MessageId,
    pub content: String,
    pub message_type: MessageType,
}

#[derive(Debug, Clone, Default)]
pub struct Session {
    selected: Option<ConversationId>,
    reply_target: Option<ReplyTarget>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected(&self) -> Option<ConversationId> {
        self.selected
    }

    pub fn reply_target(&self) -> Option<&ReplyTarget> {
        self.reply_target.as_ref()
    }

    /// Open a conversation.  Any pending reply target is dropped when the
    /// selection changes.
    pub fn select(&mut self, conversation: ConversationId) {
        if self.selected != Some(conversation) {
            self.reply_target = None;
        }
        self.selected = Some(conversation);
    }

    /// Close the current conversation.
    pub fn deselect(&mut self) {
        self.selected = None;
        self.reply_target = None;
    }

    pub fn set_reply_target(&mut self, target: ReplyTarget) {
        self.reply_target = Some(target);
    }

    pub fn clear_reply_target(&mut self) {
        self.reply_target = None;
    }
}
