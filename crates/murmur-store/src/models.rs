//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the API layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use murmur_shared::{ConversationId, MessageId, MessageType, Sender, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A known user identity, created on first authentication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Unique user identifier.
    pub id: UserId,
    /// Opaque subject string issued by the identity provider.  Identity
    /// resolution is a unique lookup on this column.
    pub token_identifier: String,
    /// Display name.
    pub name: String,
    /// Email address as reported by the identity provider.
    pub email: String,
    /// Avatar URL.
    pub image: String,
    /// Presence flag.
    pub is_online: bool,
    /// When the user was first seen.
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A conversation (1:1 chat or group).
///
/// Invariants enforced at creation time: a non-group conversation has exactly
/// two participants; a group's admin is one of its participants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    /// Unique conversation identifier.
    pub id: ConversationId,
    /// Whether this is a group conversation.
    pub is_group: bool,
    /// Group admin; `None` for 1:1 chats.
    pub admin: Option<UserId>,
    /// Display name for 1:1 chats.
    pub name: Option<String>,
    /// Display image for 1:1 chats.
    pub image: Option<String>,
    /// Group display name.
    pub group_name: Option<String>,
    /// Group display image.
    pub group_image: Option<String>,
    /// When the conversation was created.
    pub created_at: DateTime<Utc>,
    /// Member set.  Order carries no meaning; membership is unique.
    pub participants: Vec<UserId>,
}

impl Conversation {
    /// Whether `user` is a member of this conversation.
    pub fn has_participant(&self, user: &UserId) -> bool {
        self.participants.contains(user)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message as stored.
///
/// Receipt sets live in their own relations (`message_delivered`,
/// `message_seen`) and are loaded separately; mutation of a message after
/// insert is limited to unions into those sets, plus hard deletion by its
/// own sender.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Unique message identifier.
    pub id: MessageId,
    /// The conversation this message belongs to.
    pub conversation: ConversationId,
    /// Author: a participant or the built-in assistant.
    pub sender: Sender,
    /// Text content, or a resolved media URL for image/video messages.
    pub content: String,
    /// Content kind.
    pub message_type: MessageType,
    /// Message this one replies to.  The referenced message may have been
    /// unsent; readers must treat the reference as dangling in that case.
    pub reply_to: Option<MessageId>,
    /// Store-assigned creation time, monotonic across the whole store.
    pub created_at: DateTime<Utc>,
    /// Store-wide insertion counter.  The sole source of ordering truth.
    pub seq: i64,
}

// ---------------------------------------------------------------------------
// Push subscription
// ---------------------------------------------------------------------------

/// A persisted push subscriber record.  The descriptor is opaque to the
/// store; the endpoint doubles as the record's identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushSubscription {
    /// Transport endpoint URL; primary key.
    pub endpoint: String,
    /// Full descriptor as submitted by the client, forwarded verbatim to the
    /// push transport.
    pub descriptor: serde_json::Value,
    /// When the subscription was registered.
    pub created_at: DateTime<Utc>,
}
