//! The message store: send, feed serving, unsend, and search.
//!
//! Messages are inserted with empty receipt sets and mutated only by the
//! reconciler (grow-only unions) or deleted by their own sender.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::params;

use murmur_shared::constants::{FEED_FETCH_CAP, SEARCH_RESULT_LIMIT};
use murmur_shared::protocol::{FeedMessage, ReplyPreview, SenderProfile};
use murmur_shared::{ConversationId, MessageId, MessageType, Sender, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Message, User};
use crate::users::not_found;

impl Database {
    // ------------------------------------------------------------------
    // Send
    // ------------------------------------------------------------------

    /// Insert a new message.
    ///
    /// Fails with [`StoreError::NotFound`] if the conversation does not
    /// exist and [`StoreError::NotAMember`] if a user sender is not in the
    /// conversation's current participant set.  The assistant sender is
    /// exempt from the membership check.  `reply_to` is stored as given and
    /// never validated; a dangling reference degrades at read time.
    pub fn send_message(
        &self,
        conversation: ConversationId,
        sender: &Sender,
        content: &str,
        message_type: MessageType,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId> {
        // Membership is re-validated against the current participant set on
        // every send; a stale client snapshot must not bypass a removal.
        self.load_conversation(conversation)?;
        if let Some(user) = sender.user() {
            if !self.is_participant(conversation, user)? {
                return Err(StoreError::NotAMember);
            }
        }

        let (created_at, seq) = self.next_message_clock()?;
        let id = MessageId::new();

        self.conn().execute(
            "INSERT INTO messages
                 (id, conversation_id, sender, content, message_type, reply_to, created_at, seq)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id.to_string(),
                conversation.to_string(),
                sender.to_string(),
                content,
                message_type.as_str(),
                reply_to.map(|m| m.to_string()),
                created_at.to_rfc3339(),
                seq,
            ],
        )?;

        tracing::debug!(
            message = %id,
            conversation = %conversation,
            kind = %message_type,
            "message stored"
        );
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single stored message by id.
    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                "SELECT id, conversation_id, sender, content, message_type, reply_to,
                        created_at, seq
                 FROM messages WHERE id = ?1",
                params![id.to_string()],
                row_to_message,
            )
            .map_err(not_found)
    }

    /// Serve a conversation's feed: the most recent `limit` messages, newest
    /// first, with resolved sender profiles, receipt sets, and reply
    /// previews.
    ///
    /// The limit is clamped to the store-wide hard cap; callers needing
    /// older history must page explicitly.  Index 0 is always the newest
    /// message; all rendering relies on that.
    pub fn fetch_feed(&self, conversation: ConversationId, limit: u32) -> Result<Vec<FeedMessage>> {
        let limit = limit.min(FEED_FETCH_CAP);

        let mut stmt = self.conn().prepare(
            "SELECT id, conversation_id, sender, content, message_type, reply_to,
                    created_at, seq
             FROM messages
             WHERE conversation_id = ?1
             ORDER BY seq DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![conversation.to_string(), limit], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        drop(stmt);

        // Sender profiles are resolved once per distinct user across the
        // whole feed, not per message.
        let mut profile_cache: HashMap<UserId, Option<User>> = HashMap::new();

        let mut feed = Vec::with_capacity(messages.len());
        for message in messages {
            let sender = self.resolve_sender(&message, &mut profile_cache)?;
            let reply_to = match message.reply_to {
                Some(target) => self.reply_preview(target)?,
                None => None,
            };

            feed.push(FeedMessage {
                id: message.id,
                conversation: message.conversation,
                sender,
                content: message.content,
                message_type: message.message_type,
                created_at: message.created_at,
                delivered_to: self.delivered_to(message.id)?,
                seen_by: self.seen_by(message.id)?,
                reply_to,
            });
        }

        Ok(feed)
    }

    /// Case-insensitive content search over `viewer`'s conversations, newest
    /// first, truncated.
    ///
    /// Membership is part of the query itself, so the result limit is always
    /// filled from messages the viewer may actually read.
    pub fn search_messages(
        &self,
        viewer: UserId,
        query: &str,
        conversation: Option<ConversationId>,
    ) -> Result<Vec<Message>> {
        let pattern = format!("%{}%", query.to_lowercase());

        let sql = "SELECT m.id, m.conversation_id, m.sender, m.content, m.message_type,
                          m.reply_to, m.created_at, m.seq
                   FROM messages m
                   JOIN conversation_participants p
                       ON p.conversation_id = m.conversation_id AND p.user_id = ?2
                   WHERE lower(m.content) LIKE ?1
                     AND (?3 IS NULL OR m.conversation_id = ?3)
                   ORDER BY m.seq DESC
                   LIMIT ?4";

        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt.query_map(
            params![
                pattern,
                viewer.to_string(),
                conversation.map(|c| c.to_string()),
                SEARCH_RESULT_LIMIT as i64,
            ],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    // ------------------------------------------------------------------
    // Unsend
    // ------------------------------------------------------------------

    /// Hard-delete a message.  Only its own sender may do this; no tombstone
    /// is left and replies pointing at it go dangling.
    pub fn unsend_message(&self, id: MessageId, requester: UserId) -> Result<()> {
        let message = self.get_message(id)?;

        if !message.sender.is(&requester) {
            return Err(StoreError::Forbidden(
                "only the sender can unsend a message".into(),
            ));
        }

        self.conn()
            .execute("DELETE FROM messages WHERE id = ?1", params![id.to_string()])?;

        tracing::debug!(message = %id, "message unsent");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Receipt sets
    // ------------------------------------------------------------------

    /// Users the message has been delivered to.
    pub fn delivered_to(&self, id: MessageId) -> Result<Vec<UserId>> {
        self.receipt_set("message_delivered", id)
    }

    /// Users who have seen the message.
    pub fn seen_by(&self, id: MessageId) -> Result<Vec<UserId>> {
        self.receipt_set("message_seen", id)
    }

    fn receipt_set(&self, table: &str, id: MessageId) -> Result<Vec<UserId>> {
        // `table` is one of the two fixed receipt relation names.
        let mut stmt = self.conn().prepare(&format!(
            "SELECT user_id FROM {table} WHERE message_id = ?1 ORDER BY user_id"
        ))?;
        let rows = stmt.query_map(params![id.to_string()], |row| {
            let s: String = row.get(0)?;
            UserId::parse(&s).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    // ------------------------------------------------------------------
    // Resolution helpers
    // ------------------------------------------------------------------

    fn resolve_sender(
        &self,
        message: &Message,
        cache: &mut HashMap<UserId, Option<User>>,
    ) -> Result<SenderProfile> {
        match message.sender {
            Sender::Assistant => Ok(SenderProfile::assistant(message.message_type)),
            Sender::User(id) => {
                if !cache.contains_key(&id) {
                    let user = match self.get_user(id) {
                        Ok(u) => Some(u),
                        Err(StoreError::NotFound) => None,
                        Err(e) => return Err(e),
                    };
                    cache.insert(id, user);
                }
                Ok(match cache.get(&id).and_then(Clone::clone) {
                    Some(user) => SenderProfile {
                        sender: Sender::User(id),
                        name: user.name,
                        image: user.image,
                    },
                    None => SenderProfile::deleted(id),
                })
            }
        }
    }

    /// Resolve the preview of a replied-to message.  An unsent target yields
    /// `None`, never an error.
    fn reply_preview(&self, target: MessageId) -> Result<Option<ReplyPreview>> {
        match self.get_message(target) {
            Ok(m) => Ok(Some(ReplyPreview {
                id: m.id,
                sender: m.sender,
                content: m.content,
                message_type: m.message_type,
            })),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Message`].
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let conversation_str: String = row.get(1)?;
    let sender_str: String = row.get(2)?;
    let content: String = row.get(3)?;
    let type_str: String = row.get(4)?;
    let reply_str: Option<String> = row.get(5)?;
    let created_str: String = row.get(6)?;
    let seq: i64 = row.get(7)?;

    let id = MessageId::parse(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let conversation = ConversationId::parse(&conversation_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let sender: Sender = sender_str.parse().map_err(|e: uuid::Error| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let message_type = MessageType::from_str(&type_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown message type: {type_str}").into(),
        )
    })?;
    let reply_to = reply_str
        .map(|s| MessageId::parse(&s))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;
    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Message {
        id,
        conversation,
        sender,
        content,
        message_type,
        reply_to,
        created_at,
        seq,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    fn direct_fixture(db: &Database) -> (UserId, UserId, ConversationId) {
        let alice = db
            .create_user("idp|alice", "Alice", "a@example.com", "/a.png")
            .unwrap();
        let bob = db
            .create_user("idp|bob", "Bob", "b@example.com", "/b.png")
            .unwrap();
        let conv = db.create_direct(alice.id, bob.id).unwrap();
        (alice.id, bob.id, conv.id)
    }

    #[test]
    fn send_requires_membership() {
        let (_dir, db) = test_db();
        let (_, _, conv) = direct_fixture(&db);
        let outsider = db
            .create_user("idp|eve", "Eve", "e@example.com", "/e.png")
            .unwrap();

        assert!(matches!(
            db.send_message(conv, &Sender::User(outsider.id), "hi", MessageType::Text, None),
            Err(StoreError::NotAMember)
        ));
    }

    #[test]
    fn send_to_unknown_conversation_fails() {
        let (_dir, db) = test_db();
        let (alice, _, _) = direct_fixture(&db);

        assert!(matches!(
            db.send_message(
                ConversationId::new(),
                &Sender::User(alice),
                "hi",
                MessageType::Text,
                None
            ),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn assistant_may_post_without_membership() {
        let (_dir, db) = test_db();
        let (_, _, conv) = direct_fixture(&db);

        db.send_message(conv, &Sender::Assistant, "hello!", MessageType::Text, None)
            .unwrap();

        let feed = db.fetch_feed(conv, 10).unwrap();
        assert_eq!(feed[0].sender.name, "ChatGPT");
    }

    #[test]
    fn new_message_has_empty_receipt_sets() {
        let (_dir, db) = test_db();
        let (alice, _, conv) = direct_fixture(&db);

        db.send_message(conv, &Sender::User(alice), "hi", MessageType::Text, None)
            .unwrap();

        let feed = db.fetch_feed(conv, 10).unwrap();
        assert_eq!(feed.len(), 1);
        assert!(feed[0].delivered_to.is_empty());
        assert!(feed[0].seen_by.is_empty());
    }

    #[test]
    fn feed_is_newest_first() {
        let (_dir, db) = test_db();
        let (alice, _, conv) = direct_fixture(&db);

        db.send_message(conv, &Sender::User(alice), "a", MessageType::Text, None)
            .unwrap();
        db.send_message(conv, &Sender::User(alice), "b", MessageType::Text, None)
            .unwrap();

        let feed = db.fetch_feed(conv, 10).unwrap();
        let contents: Vec<&str> = feed.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["b", "a"]);

        // Creation times never increase down the feed.
        for pair in feed.windows(2) {
            assert!(pair[0].created_at >= pair[1].created_at);
        }
    }

    #[test]
    fn feed_respects_limit() {
        let (_dir, db) = test_db();
        let (alice, _, conv) = direct_fixture(&db);

        for i in 0..5 {
            db.send_message(
                conv,
                &Sender::User(alice),
                &format!("m{i}"),
                MessageType::Text,
                None,
            )
            .unwrap();
        }

        let feed = db.fetch_feed(conv, 2).unwrap();
        assert_eq!(feed.len(), 2);
        assert_eq!(feed[0].content, "m4");
    }

    #[test]
    fn unsend_is_sender_only_and_hard() {
        let (_dir, db) = test_db();
        let (alice, bob, conv) = direct_fixture(&db);

        let id = db
            .send_message(conv, &Sender::User(alice), "oops", MessageType::Text, None)
            .unwrap();

        assert!(matches!(
            db.unsend_message(id, bob),
            Err(StoreError::Forbidden(_))
        ));

        db.unsend_message(id, alice).unwrap();
        assert!(db.fetch_feed(conv, 10).unwrap().is_empty());
        assert!(matches!(db.get_message(id), Err(StoreError::NotFound)));
    }

    #[test]
    fn dangling_reply_degrades_to_none() {
        let (_dir, db) = test_db();
        let (alice, bob, conv) = direct_fixture(&db);

        let a = db
            .send_message(conv, &Sender::User(alice), "original", MessageType::Text, None)
            .unwrap();
        db.send_message(conv, &Sender::User(bob), "reply", MessageType::Text, Some(a))
            .unwrap();

        let feed = db.fetch_feed(conv, 10).unwrap();
        let preview = feed[0].reply_to.as_ref().expect("preview present");
        assert_eq!(preview.content, "original");

        db.unsend_message(a, alice).unwrap();

        let feed = db.fetch_feed(conv, 10).unwrap();
        assert_eq!(feed.len(), 1);
        assert!(feed[0].reply_to.is_none());
    }

    #[test]
    fn deleted_sender_renders_fallback_profile() {
        let (_dir, db) = test_db();
        let (alice, _, conv) = direct_fixture(&db);

        db.send_message(conv, &Sender::User(alice), "bye", MessageType::Text, None)
            .unwrap();
        db.delete_user("idp|alice").unwrap();

        let feed = db.fetch_feed(conv, 10).unwrap();
        assert_eq!(feed[0].sender.name, "Deleted");
    }

    #[test]
    fn search_matches_case_insensitively() {
        let (_dir, db) = test_db();
        let (alice, _, conv) = direct_fixture(&db);

        db.send_message(conv, &Sender::User(alice), "Hello World", MessageType::Text, None)
            .unwrap();
        db.send_message(conv, &Sender::User(alice), "unrelated", MessageType::Text, None)
            .unwrap();

        let hits = db.search_messages(alice, "hello", None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "Hello World");

        let scoped = db
            .search_messages(alice, "hello", Some(ConversationId::new()))
            .unwrap();
        assert!(scoped.is_empty());
    }

    #[test]
    fn search_is_scoped_to_the_viewers_conversations() {
        let (_dir, db) = test_db();
        let (alice, bob, conv) = direct_fixture(&db);
        let carol = db
            .create_user("idp|carol", "Carol", "c@example.com", "/c.png")
            .unwrap();
        let dave = db
            .create_user("idp|dave", "Dave", "d@example.com", "/d.png")
            .unwrap();
        let other = db.create_direct(carol.id, dave.id).unwrap();

        db.send_message(conv, &Sender::User(alice), "topic one", MessageType::Text, None)
            .unwrap();
        // Enough foreign matches to fill the result limit on their own.
        for i in 0..SEARCH_RESULT_LIMIT {
            db.send_message(
                other.id,
                &Sender::User(carol.id),
                &format!("topic {i}"),
                MessageType::Text,
                None,
            )
            .unwrap();
        }

        // Bob only ever sees his own conversation's match, and the foreign
        // matches never crowd it out of the truncated result list.
        let hits = db.search_messages(bob, "topic", None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "topic one");
        assert_eq!(hits[0].conversation, conv);

        let hits = db.search_messages(carol.id, "topic", None).unwrap();
        assert_eq!(hits.len(), SEARCH_RESULT_LIMIT);
        assert!(hits.iter().all(|m| m.conversation == other.id));
    }
}
