//! SQL schema for the Skein SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS posts (
    post_id         TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    author_id       TEXT NOT NULL,
    created_at      TEXT NOT NULL,   -- RFC 3339 UTC
    text            TEXT NOT NULL,
    replying_to     TEXT,
    quoting         TEXT,
    retweeting      TEXT,
    dangling        INTEGER NOT NULL DEFAULT 0,   -- bit set: reply | quote | retweet
    relevance       TEXT NOT NULL DEFAULT 'irrelevant'
);

-- Member posts are stored on the row; a post row can exist before the
-- linker has added it here.
CREATE TABLE IF NOT EXISTS conversations (
    conversation_id TEXT PRIMARY KEY,
    post_ids        TEXT NOT NULL DEFAULT '[]',   -- JSON array
    root_id         TEXT,
    upstream_id     TEXT,
    discussion_id   TEXT
);

CREATE TABLE IF NOT EXISTS discussions (
    discussion_id    TEXT PRIMARY KEY,
    conversation_ids TEXT NOT NULL DEFAULT '[]',  -- JSON array
    updated_at       TEXT NOT NULL,
    read_state       TEXT NOT NULL DEFAULT 'unread',
    tweet_count      INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS users (
    user_id   TEXT PRIMARY KEY,
    handle    TEXT,
    name      TEXT,
    following INTEGER NOT NULL DEFAULT 0
);

-- Fetch coverage. scope = 'global' (owner_id = '') or 'user'.
CREATE TABLE IF NOT EXISTS windows (
    scope    TEXT NOT NULL,
    owner_id TEXT NOT NULL DEFAULT '',
    start    INTEGER NOT NULL,   -- unix seconds
    duration INTEGER NOT NULL,   -- seconds
    PRIMARY KEY (scope, owner_id)
);

CREATE INDEX IF NOT EXISTS posts_author_idx   ON posts(author_id);
CREATE INDEX IF NOT EXISTS posts_dangling_idx ON posts(dangling) WHERE dangling != 0;
CREATE INDEX IF NOT EXISTS conversations_unlinked_idx
    ON conversations(conversation_id) WHERE discussion_id IS NULL;
CREATE INDEX IF NOT EXISTS users_following_idx ON users(following) WHERE following != 0;

PRAGMA user_version = 1;
";
