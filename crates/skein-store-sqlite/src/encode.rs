//! Encoding and decoding helpers between domain types and the plain
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings. Member sets are compact JSON arrays.
//! Enums are stored by their snake_case names.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use skein_core::model::{
  Conversation, Dangling, Discussion, Post, PostId, ReadState, Relevance, User,
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Member sets ─────────────────────────────────────────────────────────────

pub fn encode_ids(ids: &BTreeSet<PostId>) -> Result<String> { Ok(serde_json::to_string(ids)?) }

pub fn decode_ids(s: &str) -> Result<BTreeSet<PostId>> { Ok(serde_json::from_str(s)?) }

// ─── Enums ───────────────────────────────────────────────────────────────────

pub fn encode_relevance(r: Relevance) -> &'static str { r.into() }

pub fn decode_relevance(s: &str) -> Result<Relevance> {
  s.parse().map_err(|_| Error::InvalidColumn { column: "relevance", value: s.to_owned() })
}

pub fn encode_read_state(r: ReadState) -> &'static str { r.into() }

pub fn decode_read_state(s: &str) -> Result<ReadState> {
  s.parse().map_err(|_| Error::InvalidColumn { column: "read_state", value: s.to_owned() })
}

pub fn decode_count(n: i64) -> Result<usize> {
  usize::try_from(n)
    .map_err(|_| Error::InvalidColumn { column: "tweet_count", value: n.to_string() })
}

// ─── Row types ───────────────────────────────────────────────────────────────

pub const POST_COLUMNS: &str = "post_id, conversation_id, author_id, created_at, text, \
                                replying_to, quoting, retweeting, dangling, relevance";

/// Raw values read directly from a `posts` row.
pub struct RawPostRow {
  pub post_id:         String,
  pub conversation_id: String,
  pub author_id:       String,
  pub created_at:      String,
  pub text:            String,
  pub replying_to:     Option<String>,
  pub quoting:         Option<String>,
  pub retweeting:      Option<String>,
  pub dangling:        u8,
  pub relevance:       String,
}

impl RawPostRow {
  /// Read a row selected with [`POST_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      post_id:         row.get(0)?,
      conversation_id: row.get(1)?,
      author_id:       row.get(2)?,
      created_at:      row.get(3)?,
      text:            row.get(4)?,
      replying_to:     row.get(5)?,
      quoting:         row.get(6)?,
      retweeting:      row.get(7)?,
      dangling:        row.get(8)?,
      relevance:       row.get(9)?,
    })
  }

  pub fn into_post(self) -> Result<Post> {
    Ok(Post {
      id:              self.post_id.into(),
      conversation_id: self.conversation_id.into(),
      author_id:       self.author_id.into(),
      created_at:      decode_dt(&self.created_at)?,
      text:            self.text,
      replying_to:     self.replying_to.map(PostId::from),
      quoting:         self.quoting.map(PostId::from),
      retweeting:      self.retweeting.map(PostId::from),
      dangling:        Dangling::from(self.dangling),
      relevance:       decode_relevance(&self.relevance)?,
    })
  }
}

pub const CONVERSATION_COLUMNS: &str =
  "conversation_id, post_ids, root_id, upstream_id, discussion_id";

/// Raw values read directly from a `conversations` row.
pub struct RawConversation {
  pub conversation_id: String,
  pub post_ids:        String,
  pub root_id:         Option<String>,
  pub upstream_id:     Option<String>,
  pub discussion_id:   Option<String>,
}

impl RawConversation {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      conversation_id: row.get(0)?,
      post_ids:        row.get(1)?,
      root_id:         row.get(2)?,
      upstream_id:     row.get(3)?,
      discussion_id:   row.get(4)?,
    })
  }

  pub fn into_conversation(self) -> Result<Conversation> {
    Ok(Conversation {
      id:         self.conversation_id.into(),
      posts:      decode_ids(&self.post_ids)?,
      root:       self.root_id.map(PostId::from),
      upstream:   self.upstream_id.map(PostId::from),
      discussion: self.discussion_id.map(PostId::from),
    })
  }
}

pub const DISCUSSION_COLUMNS: &str =
  "discussion_id, conversation_ids, updated_at, read_state, tweet_count";

/// Raw values read directly from a `discussions` row.
pub struct RawDiscussion {
  pub discussion_id:    String,
  pub conversation_ids: String,
  pub updated_at:       String,
  pub read_state:       String,
  pub tweet_count:      i64,
}

impl RawDiscussion {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      discussion_id:    row.get(0)?,
      conversation_ids: row.get(1)?,
      updated_at:       row.get(2)?,
      read_state:       row.get(3)?,
      tweet_count:      row.get(4)?,
    })
  }

  pub fn into_discussion(self) -> Result<Discussion> {
    Ok(Discussion {
      id:            self.discussion_id.into(),
      conversations: decode_ids(&self.conversation_ids)?,
      updated_at:    decode_dt(&self.updated_at)?,
      read:          decode_read_state(&self.read_state)?,
      tweet_count:   decode_count(self.tweet_count)?,
    })
  }
}

pub const USER_COLUMNS: &str = "user_id, handle, name, following";

pub fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
  Ok(User {
    id:        row.get::<_, String>(0)?.into(),
    handle:    row.get(1)?,
    name:      row.get(2)?,
    following: row.get(3)?,
  })
}
