//! Wire DTOs exchanged between the Murmur server and its clients.
//!
//! Everything here serializes with camelCase field names so the payloads can
//! be consumed directly by a web frontend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{
    ASSISTANT_DISPLAY_NAME, ASSISTANT_MEDIA_AVATAR, ASSISTANT_TEXT_AVATAR, PLACEHOLDER_AVATAR,
};
use crate::types::{ConversationId, DeliveryState, MessageId, MessageType, Sender, UserId};

/// A sender as rendered in a feed: the raw sender union plus the resolved
/// display fields.  For deleted users the name falls back to "Deleted".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SenderProfile {
    pub sender: Sender,
    pub name: String,
    pub image: String,
}

impl SenderProfile {
    /// Profile for the built-in assistant.  The avatar depends on whether the
    /// message carries text or generated media.
    pub fn assistant(message_type: MessageType) -> Self {
        let image = match message_type {
            MessageType::Text => ASSISTANT_TEXT_AVATAR,
            MessageType::Image | MessageType::Video => ASSISTANT_MEDIA_AVATAR,
        };
        Self {
            sender: Sender::Assistant,
            name: ASSISTANT_DISPLAY_NAME.to_string(),
            image: image.to_string(),
        }
    }

    /// Profile for a user whose record no longer exists.
    pub fn deleted(id: UserId) -> Self {
        Self {
            sender: Sender::User(id),
            name: "Deleted".to_string(),
            image: PLACEHOLDER_AVATAR.to_string(),
        }
    }
}

/// Preview of the message a feed entry replies to.  `None` on the feed entry
/// means the referenced message was unsent; the reference degrades silently.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPreview {
    pub id: MessageId,
    pub sender: Sender,
    pub content: String,
    pub message_type: MessageType,
}

/// A single message as served in a conversation feed, newest first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FeedMessage {
    pub id: MessageId,
    pub conversation: ConversationId,
    pub sender: SenderProfile,
    pub content: String,
    pub message_type: MessageType,
    pub created_at: DateTime<Utc>,
    pub delivered_to: Vec<UserId>,
    pub seen_by: Vec<UserId>,
    pub reply_to: Option<ReplyPreview>,
}

impl FeedMessage {
    /// Aggregate delivery state over all recipients.
    pub fn delivery_state(&self) -> DeliveryState {
        DeliveryState::of(&self.delivered_to, &self.seen_by)
    }

    /// Whether this message counts as unread for `user`.
    pub fn is_unread_for(&self, user: &UserId) -> bool {
        !self.sender.sender.is(user) && !self.seen_by.contains(user)
    }
}

/// The newest message of a conversation, as embedded in a summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub id: MessageId,
    pub sender: Sender,
    pub content: String,
    pub message_type: MessageType,
    pub created_at: DateTime<Utc>,
    pub delivered_to: Vec<UserId>,
    pub seen_by: Vec<UserId>,
}

impl LastMessage {
    pub fn delivery_state(&self) -> DeliveryState {
        DeliveryState::of(&self.delivered_to, &self.seen_by)
    }
}

/// One entry of the conversation list view: the conversation itself plus the
/// derived last-message / unread projection.  Never stored; recomputed on
/// every fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub is_group: bool,
    pub participants: Vec<UserId>,
    pub admin: Option<UserId>,
    pub name: Option<String>,
    pub image: Option<String>,
    pub group_name: Option<String>,
    pub group_image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_message: Option<LastMessage>,
    pub unread: bool,
}

impl ConversationSummary {
    /// Display name: group name for groups, peer name for 1:1 chats.
    pub fn display_name(&self) -> &str {
        self.group_name
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or("")
    }

    /// Display image, with the same group/1:1 precedence as the name.
    pub fn display_image(&self) -> &str {
        self.group_image
            .as_deref()
            .or(self.image.as_deref())
            .unwrap_or(PLACEHOLDER_AVATAR)
    }

    /// Sort key for the conversation list: last activity, falling back to the
    /// conversation's own creation time.
    pub fn activity_at(&self) -> DateTime<Utc> {
        self.last_message
            .as_ref()
            .map(|m| m.created_at)
            .unwrap_or(self.created_at)
    }
}

/// Payload handed to notification backends (in-app toast, system
/// notification, web push).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub url: String,
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub content: String,
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    pub is_group: bool,
    /// For a 1:1 chat, exactly one peer; for a group, all initial members
    /// besides the creator.
    pub participants: Vec<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateGroupRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_image: Option<String>,
}

/// Upsert pushed from the identity provider when a user signs up or edits
/// their profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncUserRequest {
    pub token_identifier: String,
    pub name: String,
    pub email: String,
    pub image: String,
}

/// An opaque push subscriber descriptor.  Only `endpoint` is interpreted
/// (as the identity of the subscription); the rest is forwarded verbatim to
/// the push transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionDescriptor {
    pub endpoint: String,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}
