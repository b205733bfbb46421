//! CRUD operations for [`User`] records, including the identity-provider
//! lifecycle sync (create / update / delete with participant cascade).

use chrono::{DateTime, Utc};
use rusqlite::params;

use murmur_shared::{ConversationId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::User;

impl Database {
    // ------------------------------------------------------------------
    // Create / update (driven by the identity provider webhook)
    // ------------------------------------------------------------------

    /// Insert a new user on first authentication.  New users start online.
    pub fn create_user(
        &self,
        token_identifier: &str,
        name: &str,
        email: &str,
        image: &str,
    ) -> Result<User> {
        let user = User {
            id: UserId::new(),
            token_identifier: token_identifier.to_string(),
            name: name.to_string(),
            email: email.to_string(),
            image: image.to_string(),
            is_online: true,
            created_at: Utc::now(),
        };

        self.conn().execute(
            "INSERT INTO users (id, token_identifier, name, email, image, is_online, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                user.id.to_string(),
                user.token_identifier,
                user.name,
                user.email,
                user.image,
                user.is_online,
                user.created_at.to_rfc3339(),
            ],
        )?;

        Ok(user)
    }

    /// Update profile fields on an existing user.  The name is optional in
    /// the provider payload; a missing name leaves the stored one untouched.
    pub fn update_user(
        &self,
        token_identifier: &str,
        name: Option<&str>,
        image: &str,
    ) -> Result<User> {
        let user = self.get_user_by_token(token_identifier)?;

        self.conn().execute(
            "UPDATE users SET name = ?1, image = ?2 WHERE token_identifier = ?3",
            params![
                name.unwrap_or(&user.name),
                image,
                token_identifier,
            ],
        )?;

        self.get_user_by_token(token_identifier)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single user by id.
    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, token_identifier, name, email, image, is_online, created_at
                 FROM users WHERE id = ?1",
                params![id.to_string()],
                row_to_user,
            )
            .map_err(not_found)
    }

    /// Resolve the identity-provider subject to a user record.
    pub fn get_user_by_token(&self, token_identifier: &str) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, token_identifier, name, email, image, is_online, created_at
                 FROM users WHERE token_identifier = ?1",
                params![token_identifier],
                row_to_user,
            )
            .map_err(not_found)
    }

    /// List all users except the given one (the contact picker view).
    pub fn list_users_except(&self, me: UserId) -> Result<Vec<User>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, token_identifier, name, email, image, is_online, created_at
             FROM users WHERE id != ?1 ORDER BY name ASC",
        )?;

        let rows = stmt.query_map(params![me.to_string()], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    /// List the member profiles of a conversation.  Participant ids whose
    /// user record has been deleted are skipped.
    pub fn group_members(&self, conversation: ConversationId) -> Result<Vec<User>> {
        let mut stmt = self.conn().prepare(
            "SELECT u.id, u.token_identifier, u.name, u.email, u.image, u.is_online, u.created_at
             FROM users u
             JOIN conversation_participants p ON p.user_id = u.id
             WHERE p.conversation_id = ?1
             ORDER BY u.name ASC",
        )?;

        let rows = stmt.query_map(params![conversation.to_string()], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    // ------------------------------------------------------------------
    // Delete (with participant cascade)
    // ------------------------------------------------------------------

    /// Delete a user on account removal.
    ///
    /// Group conversations drop the user from their participant set; if the
    /// user was the admin, the first remaining member inherits the role.
    /// 1:1 conversations keep the dangling participant reference and the UI
    /// falls back when the peer is missing.
    pub fn delete_user(&self, token_identifier: &str) -> Result<()> {
        let user = match self.get_user_by_token(token_identifier) {
            Ok(u) => u,
            Err(StoreError::NotFound) => return Ok(()),
            Err(e) => return Err(e),
        };
        let uid = user.id.to_string();

        let mut stmt = self.conn().prepare(
            "SELECT c.id, c.is_group, c.admin
             FROM conversations c
             JOIN conversation_participants p ON p.conversation_id = c.id
             WHERE p.user_id = ?1",
        )?;
        let rows = stmt.query_map(params![uid], |row| {
            let id: String = row.get(0)?;
            let is_group: bool = row.get(1)?;
            let admin: Option<String> = row.get(2)?;
            Ok((id, is_group, admin))
        })?;
        let memberships: Vec<(String, bool, Option<String>)> =
            rows.collect::<rusqlite::Result<_>>()?;
        drop(stmt);

        for (conv_id, is_group, admin) in memberships {
            if !is_group {
                continue;
            }

            self.conn().execute(
                "DELETE FROM conversation_participants
                 WHERE conversation_id = ?1 AND user_id = ?2",
                params![conv_id, uid],
            )?;

            if admin.as_deref() == Some(uid.as_str()) {
                let next_admin: Option<String> = self
                    .conn()
                    .query_row(
                        "SELECT user_id FROM conversation_participants
                         WHERE conversation_id = ?1 LIMIT 1",
                        params![conv_id],
                        |row| row.get(0),
                    )
                    .map(Some)
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        other => Err(other),
                    })?;

                self.conn().execute(
                    "UPDATE conversations SET admin = ?1 WHERE id = ?2",
                    params![next_admin, conv_id],
                )?;

                tracing::info!(
                    conversation = %conv_id,
                    new_admin = ?next_admin,
                    "reassigned group admin after user deletion"
                );
            }
        }

        self.conn()
            .execute("DELETE FROM users WHERE id = ?1", params![uid])?;

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn not_found(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    }
}

/// Map a `rusqlite::Row` to a [`User`].
fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let token_identifier: String = row.get(1)?;
    let name: String = row.get(2)?;
    let email: String = row.get(3)?;
    let image: String = row.get(4)?;
    let is_online: bool = row.get(5)?;
    let created_str: String = row.get(6)?;

    let id = UserId::parse(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(User {
        id,
        token_identifier,
        name,
        email,
        image,
        is_online,
        created_at,
    })
}
