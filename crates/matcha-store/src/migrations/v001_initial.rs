//! v001 -- Initial schema creation.
//!
//! Creates the five core tables: `users`, `sessions`, `connection_edges`,
//! `conversations`, and `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    display_name TEXT NOT NULL,
    avatar_url   TEXT,
    created_at   TEXT NOT NULL                -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Sessions (opaque cookie tokens issued by the identity layer)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS sessions (
    token      TEXT PRIMARY KEY NOT NULL,     -- random 32-byte hex
    user_id    TEXT NOT NULL,                 -- FK -> users(id)
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,

    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id);

-- ----------------------------------------------------------------
-- Connection edges (the social graph gating who may message whom)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS connection_edges (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    from_user_id TEXT NOT NULL,               -- FK -> users(id)
    to_user_id   TEXT NOT NULL,               -- FK -> users(id)
    status       TEXT NOT NULL
        CHECK (status IN ('interested', 'ignored', 'accepted', 'rejected')),
    created_at   TEXT NOT NULL,

    UNIQUE (from_user_id, to_user_id),
    FOREIGN KEY (from_user_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (to_user_id)   REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_edges_pair
    ON connection_edges(from_user_id, to_user_id, status);

-- ----------------------------------------------------------------
-- Conversations (one per unordered participant pair)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id            TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    room_id       TEXT NOT NULL UNIQUE,       -- hex BLAKE3 of the sorted pair
    participant_a TEXT NOT NULL,              -- canonical order: a < b
    participant_b TEXT NOT NULL,
    created_at    TEXT NOT NULL,

    FOREIGN KEY (participant_a) REFERENCES users(id),
    FOREIGN KEY (participant_b) REFERENCES users(id)
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
-- Append order is rowid order: one INSERT per send, no whole-document
-- rewrite, so concurrent sends into the same conversation cannot lose
-- each other.
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    conversation_id TEXT NOT NULL,              -- FK -> conversations(id)
    sender_id       TEXT NOT NULL,
    receiver_id     TEXT NOT NULL,
    text            TEXT NOT NULL,
    status          TEXT NOT NULL
        CHECK (status IN ('sent', 'delivered', 'seen')),
    seen_at         TEXT,                       -- set iff status = 'seen'
    created_at      TEXT NOT NULL,

    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation
    ON messages(conversation_id);

CREATE INDEX IF NOT EXISTS idx_messages_receiver_status
    ON messages(conversation_id, receiver_id, status);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
