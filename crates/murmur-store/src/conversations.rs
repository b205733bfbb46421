//! [`Conversation`] lifecycle: creation (1:1 and group), membership,
//! admin-gated metadata edits, and hard deletion with message cascade.

use chrono::{DateTime, Utc};
use rusqlite::params;

use murmur_shared::{ConversationId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Conversation;
use crate::users::not_found;

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Start (or reopen) a 1:1 conversation between two users.
    ///
    /// A direct conversation has exactly two participants and no admin.  If
    /// one already exists between the pair it is returned instead of
    /// inserting a duplicate.
    pub fn create_direct(&self, me: UserId, other: UserId) -> Result<Conversation> {
        if me == other {
            return Err(StoreError::Forbidden(
                "cannot start a conversation with yourself".into(),
            ));
        }

        if let Some(existing) = self.find_direct(me, other)? {
            return Ok(existing);
        }

        // Display name/image for a 1:1 chat are resolved per viewer at read
        // time; store the peer's profile as the creation-time default.
        let peer = self.get_user(other)?;

        let conversation = Conversation {
            id: ConversationId::new(),
            is_group: false,
            admin: None,
            name: Some(peer.name),
            image: Some(peer.image),
            group_name: None,
            group_image: None,
            created_at: Utc::now(),
            participants: vec![me, other],
        };

        self.insert_conversation(&conversation)?;
        Ok(conversation)
    }

    /// Create a group conversation.  The creator becomes admin and is always
    /// part of the member set.
    pub fn create_group(
        &self,
        creator: UserId,
        group_name: &str,
        group_image: Option<&str>,
        members: &[UserId],
    ) -> Result<Conversation> {
        let mut participants = vec![creator];
        for m in members {
            if !participants.contains(m) {
                participants.push(*m);
            }
        }

        let conversation = Conversation {
            id: ConversationId::new(),
            is_group: true,
            admin: Some(creator),
            name: None,
            image: None,
            group_name: Some(group_name.to_string()),
            group_image: group_image.map(str::to_string),
            created_at: Utc::now(),
            participants,
        };

        self.insert_conversation(&conversation)?;
        Ok(conversation)
    }

    fn insert_conversation(&self, conversation: &Conversation) -> Result<()> {
        self.conn().execute(
            "INSERT INTO conversations
                 (id, is_group, admin, name, image, group_name, group_image, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                conversation.id.to_string(),
                conversation.is_group,
                conversation.admin.map(|a| a.to_string()),
                conversation.name,
                conversation.image,
                conversation.group_name,
                conversation.group_image,
                conversation.created_at.to_rfc3339(),
            ],
        )?;

        for user in &conversation.participants {
            self.conn().execute(
                "INSERT OR IGNORE INTO conversation_participants (conversation_id, user_id)
                 VALUES (?1, ?2)",
                params![conversation.id.to_string(), user.to_string()],
            )?;
        }

        tracing::info!(
            conversation = %conversation.id,
            is_group = conversation.is_group,
            members = conversation.participants.len(),
            "conversation created"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a conversation, verifying the viewer is a participant.
    pub fn get_conversation(
        &self,
        id: ConversationId,
        viewer: UserId,
    ) -> Result<Conversation> {
        let conversation = self.load_conversation(id)?;
        if !conversation.has_participant(&viewer) {
            return Err(StoreError::Forbidden(
                "you are not a participant of this conversation".into(),
            ));
        }
        Ok(conversation)
    }

    /// Fetch a conversation without a membership check.  Internal callers
    /// only; API paths go through [`Database::get_conversation`].
    pub(crate) fn load_conversation(&self, id: ConversationId) -> Result<Conversation> {
        let mut conversation = self
            .conn()
            .query_row(
                "SELECT id, is_group, admin, name, image, group_name, group_image, created_at
                 FROM conversations WHERE id = ?1",
                params![id.to_string()],
                row_to_conversation,
            )
            .map_err(not_found)?;

        conversation.participants = self.participants(id)?;
        Ok(conversation)
    }

    /// Member ids of a conversation.
    pub fn participants(&self, id: ConversationId) -> Result<Vec<UserId>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id FROM conversation_participants WHERE conversation_id = ?1",
        )?;
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

    /// Whether `user` belongs to the conversation, re-read from the current
    /// participant set (send paths must not trust stale snapshots).
    pub fn is_participant(&self, id: ConversationId, user: UserId) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM conversation_participants
             WHERE conversation_id = ?1 AND user_id = ?2",
            params![id.to_string(), user.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn find_direct(&self, a: UserId, b: UserId) -> Result<Option<Conversation>> {
        let id: Option<String> = self
            .conn()
            .query_row(
                "SELECT c.id FROM conversations c
                 JOIN conversation_participants pa
                     ON pa.conversation_id = c.id AND pa.user_id = ?1
                 JOIN conversation_participants pb
                     ON pb.conversation_id = c.id AND pb.user_id = ?2
                 WHERE c.is_group = 0
                 LIMIT 1",
                params![a.to_string(), b.to_string()],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        match id {
            Some(s) => Ok(Some(self.load_conversation(ConversationId::parse(&s)?)?)),
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Mutate (admin-gated)
    // ------------------------------------------------------------------

    /// Update group metadata.  Only the current admin may do this.
    pub fn update_group(
        &self,
        id: ConversationId,
        actor: UserId,
        group_name: Option<&str>,
        group_image: Option<&str>,
    ) -> Result<Conversation> {
        let conversation = self.load_conversation(id)?;

        if !conversation.is_group {
            return Err(StoreError::NotAGroup);
        }
        if conversation.admin != Some(actor) {
            return Err(StoreError::Forbidden(
                "only the group admin can update this conversation".into(),
            ));
        }

        if let Some(name) = group_name {
            self.conn().execute(
                "UPDATE conversations SET group_name = ?1 WHERE id = ?2",
                params![name, id.to_string()],
            )?;
        }
        if let Some(image) = group_image {
            self.conn().execute(
                "UPDATE conversations SET group_image = ?1 WHERE id = ?2",
                params![image, id.to_string()],
            )?;
        }

        self.load_conversation(id)
    }

    /// Add a member to a group.  Admin only.
    pub fn add_participant(
        &self,
        id: ConversationId,
        actor: UserId,
        user: UserId,
    ) -> Result<()> {
        self.require_admin(id, actor)?;

        self.conn().execute(
            "INSERT OR IGNORE INTO conversation_participants (conversation_id, user_id)
             VALUES (?1, ?2)",
            params![id.to_string(), user.to_string()],
        )?;
        Ok(())
    }

    /// Remove a member from a group.  Admin only; the admin cannot remove
    /// themselves (delete or hand over the group instead).
    pub fn remove_participant(
        &self,
        id: ConversationId,
        actor: UserId,
        user: UserId,
    ) -> Result<()> {
        self.require_admin(id, actor)?;

        if user == actor {
            return Err(StoreError::Forbidden(
                "the admin cannot remove themselves".into(),
            ));
        }

        self.conn().execute(
            "DELETE FROM conversation_participants
             WHERE conversation_id = ?1 AND user_id = ?2",
            params![id.to_string(), user.to_string()],
        )?;
        Ok(())
    }

    fn require_admin(&self, id: ConversationId, actor: UserId) -> Result<()> {
        let conversation = self.load_conversation(id)?;
        if !conversation.is_group {
            return Err(StoreError::NotAGroup);
        }
        if conversation.admin != Some(actor) {
            return Err(StoreError::Forbidden(
                "only the group admin can manage members".into(),
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Hard-delete a conversation and everything in it.  Any participant may
    /// do this; messages and receipt sets go with it via FK cascade.
    pub fn delete_conversation(&self, id: ConversationId, actor: UserId) -> Result<()> {
        let conversation = self.load_conversation(id)?;
        if !conversation.has_participant(&actor) {
            return Err(StoreError::Forbidden(
                "only a participant can delete this conversation".into(),
            ));
        }

        self.conn().execute(
            "DELETE FROM conversations WHERE id = ?1",
            params![id.to_string()],
        )?;

        tracing::info!(conversation = %id, "conversation deleted");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Conversation`] (participants loaded
/// separately).
fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let id_str: String = row.get(0)?;
    let is_group: bool = row.get(1)?;
    let admin_str: Option<String> = row.get(2)?;
    let name: Option<String> = row.get(3)?;
    let image: Option<String> = row.get(4)?;
    let group_name: Option<String> = row.get(5)?;
    let group_image: Option<String> = row.get(6)?;
    let created_str: String = row.get(7)?;

    let id = ConversationId::parse(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let admin = admin_str
        .map(|s| UserId::parse(&s))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Conversation {
        id,
        is_group,
        admin,
        name,
        image,
        group_name,
        group_image,
        created_at,
        participants: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_shared::{MessageType, Sender};

    fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    fn two_users(db: &Database) -> (UserId, UserId) {
        let a = db
            .create_user("idp|alice", "Alice", "a@example.com", "/a.png")
            .unwrap();
        let b = db
            .create_user("idp|bob", "Bob", "b@example.com", "/b.png")
            .unwrap();
        (a.id, b.id)
    }

    #[test]
    fn direct_conversation_has_exactly_two_participants() {
        let (_dir, db) = test_db();
        let (alice, bob) = two_users(&db);

        let conv = db.create_direct(alice, bob).unwrap();
        assert!(!conv.is_group);
        assert_eq!(conv.participants.len(), 2);
        assert!(conv.has_participant(&alice));
        assert!(conv.has_participant(&bob));
        assert_eq!(conv.admin, None);
    }

    #[test]
    fn direct_conversation_is_deduplicated() {
        let (_dir, db) = test_db();
        let (alice, bob) = two_users(&db);

        let first = db.create_direct(alice, bob).unwrap();
        let second = db.create_direct(bob, alice).unwrap();
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn direct_conversation_with_self_is_rejected() {
        let (_dir, db) = test_db();
        let (alice, _) = two_users(&db);
        assert!(matches!(
            db.create_direct(alice, alice),
            Err(StoreError::Forbidden(_))
        ));
    }

    #[test]
    fn group_admin_is_a_participant() {
        let (_dir, db) = test_db();
        let (alice, bob) = two_users(&db);

        let group = db.create_group(alice, "team", None, &[bob]).unwrap();
        assert!(group.is_group);
        assert_eq!(group.admin, Some(alice));
        assert!(group.participants.contains(&alice));
        assert!(group.participants.contains(&bob));
    }

    #[test]
    fn non_admin_cannot_edit_group_metadata() {
        let (_dir, db) = test_db();
        let (alice, bob) = two_users(&db);
        let group = db.create_group(alice, "team", None, &[bob]).unwrap();

        let err = db.update_group(group.id, bob, Some("renamed"), None);
        assert!(matches!(err, Err(StoreError::Forbidden(_))));

        let updated = db
            .update_group(group.id, alice, Some("renamed"), Some("/g.png"))
            .unwrap();
        assert_eq!(updated.group_name.as_deref(), Some("renamed"));
        assert_eq!(updated.group_image.as_deref(), Some("/g.png"));
    }

    #[test]
    fn group_edit_on_direct_conversation_is_rejected() {
        let (_dir, db) = test_db();
        let (alice, bob) = two_users(&db);
        let conv = db.create_direct(alice, bob).unwrap();

        assert!(matches!(
            db.update_group(conv.id, alice, Some("x"), None),
            Err(StoreError::NotAGroup)
        ));
    }

    #[test]
    fn membership_changes_are_admin_gated() {
        let (_dir, db) = test_db();
        let (alice, bob) = two_users(&db);
        let carol = db
            .create_user("idp|carol", "Carol", "c@example.com", "/c.png")
            .unwrap();
        let group = db.create_group(alice, "team", None, &[bob]).unwrap();

        assert!(matches!(
            db.add_participant(group.id, bob, carol.id),
            Err(StoreError::Forbidden(_))
        ));

        db.add_participant(group.id, alice, carol.id).unwrap();
        assert!(db.is_participant(group.id, carol.id).unwrap());

        db.remove_participant(group.id, alice, carol.id).unwrap();
        assert!(!db.is_participant(group.id, carol.id).unwrap());

        assert!(matches!(
            db.remove_participant(group.id, alice, alice),
            Err(StoreError::Forbidden(_))
        ));
    }

    #[test]
    fn delete_cascades_messages_and_receipts() {
        let (_dir, db) = test_db();
        let (alice, bob) = two_users(&db);
        let conv = db.create_direct(alice, bob).unwrap();

        db.send_message(
            conv.id,
            &Sender::User(alice),
            "hello",
            MessageType::Text,
            None,
        )
        .unwrap();
        db.mark_seen(conv.id, bob).unwrap();

        db.delete_conversation(conv.id, bob).unwrap();

        assert!(matches!(
            db.get_conversation(conv.id, alice),
            Err(StoreError::NotFound)
        ));
        let remaining: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
        let receipts: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM message_seen", [], |r| r.get(0))
            .unwrap();
        assert_eq!(receipts, 0);
    }

    #[test]
    fn non_participant_cannot_delete_or_view() {
        let (_dir, db) = test_db();
        let (alice, bob) = two_users(&db);
        let mallory = db
            .create_user("idp|mallory", "Mallory", "m@example.com", "/m.png")
            .unwrap();
        let conv = db.create_direct(alice, bob).unwrap();

        assert!(matches!(
            db.get_conversation(conv.id, mallory.id),
            Err(StoreError::Forbidden(_))
        ));
        assert!(matches!(
            db.delete_conversation(conv.id, mallory.id),
            Err(StoreError::Forbidden(_))
        ));
    }
}
