//! v001 -- Initial schema creation.
//!
//! Creates the core tables: `users`, `conversations`,
//! `conversation_participants`, `messages`, the two receipt relations
//! `message_delivered` / `message_seen`, and `push_subscriptions`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id               TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    token_identifier TEXT NOT NULL UNIQUE,        -- identity provider subject
    name             TEXT NOT NULL,
    email            TEXT NOT NULL,
    image            TEXT NOT NULL,
    is_online        INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    created_at       TEXT NOT NULL                -- ISO-8601 / RFC-3339
);

CREATE INDEX IF NOT EXISTS idx_users_token ON users(token_identifier);

-- ----------------------------------------------------------------
-- Conversations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id          TEXT PRIMARY KEY NOT NULL,        -- UUID v4
    is_group    INTEGER NOT NULL DEFAULT 0,       -- boolean 0/1
    admin       TEXT,                             -- nullable FK -> users(id)
    name        TEXT,                             -- 1:1 display name
    image       TEXT,                             -- 1:1 display image
    group_name  TEXT,
    group_image TEXT,
    created_at  TEXT NOT NULL
);

-- Membership set.  The composite primary key keeps membership unique.
CREATE TABLE IF NOT EXISTS conversation_participants (
    conversation_id TEXT NOT NULL,                -- FK -> conversations(id)
    user_id         TEXT NOT NULL,                -- user UUID (may outlive the user row)

    PRIMARY KEY (conversation_id, user_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_participants_user ON conversation_participants(user_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    conversation_id TEXT NOT NULL,                -- FK -> conversations(id)
    sender          TEXT NOT NULL,                -- user UUID or 'assistant'
    content         TEXT NOT NULL,                -- text or resolved media URL
    message_type    TEXT NOT NULL,                -- text | image | video
    reply_to        TEXT,                         -- message UUID, dangling allowed
    created_at      TEXT NOT NULL,                -- ISO-8601, monotonic per store
    seq             INTEGER NOT NULL UNIQUE,      -- store-wide insertion counter

    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_seq
    ON messages(conversation_id, seq DESC);

-- ----------------------------------------------------------------
-- Receipt sets (grow-only; INSERT OR IGNORE is the union operation)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS message_delivered (
    message_id TEXT NOT NULL,                     -- FK -> messages(id)
    user_id    TEXT NOT NULL,

    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS message_seen (
    message_id TEXT NOT NULL,                     -- FK -> messages(id)
    user_id    TEXT NOT NULL,

    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Push subscriptions
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS push_subscriptions (
    endpoint   TEXT PRIMARY KEY NOT NULL,
    descriptor TEXT NOT NULL,                     -- opaque JSON
    created_at TEXT NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
