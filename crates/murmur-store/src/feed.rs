//! Conversation list projection.
//!
//! Pure read-side computation: the last message and unread flag are derived
//! on every call and never stored.

use rusqlite::params;

use murmur_shared::protocol::{ConversationSummary, LastMessage};
use murmur_shared::{ConversationId, UserId};

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// List the conversations `user` participates in, as list-view summaries
    /// sorted by most recent activity (last message time, falling back to
    /// the conversation's creation time).
    pub fn list_conversations(&self, user: UserId) -> Result<Vec<ConversationSummary>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.id FROM conversations c
             JOIN conversation_participants p ON p.conversation_id = c.id
             WHERE p.user_id = ?1",
        )?;
        let rows = stmt.query_map(params![user.to_string()], |row| {
            let s: String = row.get(0)?;
            Ok(s)
        })?;
        let ids: Vec<String> = rows.collect::<rusqlite::Result<_>>()?;
        drop(stmt);

        let mut summaries = Vec::with_capacity(ids.len());
        for id_str in ids {
            let id = ConversationId::parse(&id_str)?;
            summaries.push(self.summarize(id, user)?);
        }

        summaries.sort_by(|a, b| b.activity_at().cmp(&a.activity_at()));
        Ok(summaries)
    }

    /// Build the summary for a single conversation from `user`'s viewpoint.
    pub fn summarize(&self, id: ConversationId, user: UserId) -> Result<ConversationSummary> {
        let conversation = self.load_conversation(id)?;
        let last_message = self.last_message(id)?;

        // Unread: there is a last message, it is not the viewer's own, and
        // the viewer has not seen it.
        let unread = last_message
            .as_ref()
            .map(|m| !m.sender.is(&user) && !m.seen_by.contains(&user))
            .unwrap_or(false);

        Ok(ConversationSummary {
            id: conversation.id,
            is_group: conversation.is_group,
            participants: conversation.participants,
            admin: conversation.admin,
            name: conversation.name,
            image: conversation.image,
            group_name: conversation.group_name,
            group_image: conversation.group_image,
            created_at: conversation.created_at,
            last_message,
            unread,
        })
    }

    /// The newest message of a conversation, with its receipt sets.
    pub fn last_message(&self, id: ConversationId) -> Result<Option<LastMessage>> {
        let feed = self.fetch_feed(id, 1)?;
        Ok(feed.into_iter().next().map(|m| LastMessage {
            id: m.id,
            sender: m.sender.sender,
            content: m.content,
            message_type: m.message_type,
            created_at: m.created_at,
            delivered_to: m.delivered_to,
            seen_by: m.seen_by,
        }))
    }
}
