//! [`SqliteStore`]: the SQLite implementation of [`Store`].

use std::path::Path;

use rusqlite::{OptionalExtension as _, TransactionBehavior, params};
use skein_core::{
  model::{Conversation, ConversationId, Discussion, DiscussionId, Post, PostId, User, UserId},
  store::{Notifier, Reader, Store, WriteToken, Writer},
  window::{DateWindow, WindowRecord},
};
use tracing::debug;

use crate::{
  Error, Result,
  encode::{
    CONVERSATION_COLUMNS, DISCUSSION_COLUMNS, POST_COLUMNS, RawConversation, RawDiscussion,
    RawPostRow, USER_COLUMNS, encode_dt, encode_ids, encode_read_state, encode_relevance,
    user_from_row,
  },
  schema::SCHEMA,
};

type CoreResult<T> = skein_core::Result<T>;

const GLOBAL_SCOPE: &str = "global";
const USER_SCOPE: &str = "user";

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Skein store backed by a single SQLite file.
///
/// Cloning is cheap: the connection handle and the notifier are both
/// reference-counted, and clones share observers.
#[derive(Clone)]
pub struct SqliteStore {
  conn:     tokio_rusqlite::Connection,
  notifier: Notifier,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref().to_owned();
    let conn = tokio_rusqlite::Connection::open(&path).await?;
    let store = Self { conn, notifier: Notifier::default() };
    store.init_schema().await?;
    debug!(path = %path.display(), "opened sqlite store");
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn, notifier: Notifier::default() };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── Store impl ──────────────────────────────────────────────────────────────

impl Store for SqliteStore {
  async fn read<R, F>(&self, f: F) -> CoreResult<R>
  where
    R: Send + 'static,
    F: FnOnce(&dyn Reader) -> CoreResult<R> + Send + 'static,
  {
    let outcome = self
      .conn
      .call(move |conn| {
        // A deferred transaction pins one snapshot for the whole closure;
        // dropping it rolls back, which is all a read needs.
        let tx = conn.transaction()?;
        let outcome = f(&Db { conn: &tx });
        Ok(outcome)
      })
      .await
      .map_err(Error::from)?;
    outcome
  }

  async fn write<R, F>(&self, f: F) -> CoreResult<R>
  where
    R: Send + 'static,
    F: FnOnce(&mut dyn Writer) -> CoreResult<R> + Send + 'static,
  {
    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let outcome = f(&mut Db { conn: &tx });
        match outcome {
          Ok(value) => {
            tx.commit()?;
            Ok(Ok(value))
          }
          // Dropping `tx` rolls everything back.
          Err(err) => Ok(Err(err)),
        }
      })
      .await
      .map_err(Error::from)?;
    outcome
  }

  fn notifier(&self) -> &Notifier { &self.notifier }
}

// ─── Connection-bound reader/writer ──────────────────────────────────────────

/// Row access over a connection that is inside a transaction.
struct Db<'c> {
  conn: &'c rusqlite::Connection,
}

impl Db<'_> {
  fn query_all<T>(
    &self,
    sql: &str,
    args: impl rusqlite::Params,
    map: impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
  ) -> Result<Vec<T>> {
    let mut stmt = self.conn.prepare_cached(sql)?;
    let rows = stmt.query_map(args, map)?.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
  }

  fn query_one<T>(
    &self,
    sql: &str,
    args: impl rusqlite::Params,
    map: impl FnOnce(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
  ) -> Result<Option<T>> {
    let mut stmt = self.conn.prepare_cached(sql)?;
    Ok(stmt.query_row(args, map).optional()?)
  }

  fn posts_where(&self, clause: &str, args: impl rusqlite::Params) -> Result<Vec<Post>> {
    let sql = format!("SELECT {POST_COLUMNS} FROM posts WHERE {clause}");
    let rows = self.query_all(&sql, args, RawPostRow::from_row)?;
    rows.into_iter().map(RawPostRow::into_post).collect()
  }

  fn conversations_where(&self, clause: &str) -> Result<Vec<Conversation>> {
    let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations {clause}");
    let rows = self.query_all(&sql, [], RawConversation::from_row)?;
    rows.into_iter().map(RawConversation::into_conversation).collect()
  }

  fn window(&self, scope: &str, owner: &str) -> Result<Option<DateWindow>> {
    let record = self.query_one(
      "SELECT start, duration FROM windows WHERE scope = ?1 AND owner_id = ?2",
      params![scope, owner],
      |r| Ok(WindowRecord { start: r.get(0)?, duration: r.get(1)? }),
    )?;
    Ok(record.map(DateWindow::try_from).transpose()?)
  }

  fn put_window(&self, scope: &str, owner: &str, window: DateWindow) -> Result<()> {
    let record = WindowRecord::from(window);
    self.conn.execute(
      "INSERT INTO windows (scope, owner_id, start, duration) VALUES (?1, ?2, ?3, ?4)
       ON CONFLICT (scope, owner_id) DO UPDATE
         SET start = excluded.start, duration = excluded.duration",
      params![scope, owner, record.start, record.duration],
    )?;
    Ok(())
  }
}

impl Reader for Db<'_> {
  fn get_post(&self, id: &PostId) -> CoreResult<Option<Post>> {
    Ok(self.posts_where("post_id = ?1", params![id.as_str()])?.pop())
  }

  fn get_conversation(&self, id: &ConversationId) -> CoreResult<Option<Conversation>> {
    let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE conversation_id = ?1");
    let raw = self.query_one(&sql, params![id.as_str()], RawConversation::from_row)?;
    Ok(raw.map(RawConversation::into_conversation).transpose()?)
  }

  fn get_discussion(&self, id: &DiscussionId) -> CoreResult<Option<Discussion>> {
    let sql = format!("SELECT {DISCUSSION_COLUMNS} FROM discussions WHERE discussion_id = ?1");
    let raw = self.query_one(&sql, params![id.as_str()], RawDiscussion::from_row)?;
    Ok(raw.map(RawDiscussion::into_discussion).transpose()?)
  }

  fn get_user(&self, id: &UserId) -> CoreResult<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1");
    Ok(self.query_one(&sql, params![id.as_str()], user_from_row)?)
  }

  fn posts_by_author(&self, author: &UserId) -> CoreResult<Vec<Post>> {
    Ok(self.posts_where("author_id = ?1", params![author.as_str()])?)
  }

  fn dangling_posts(&self) -> CoreResult<Vec<Post>> {
    Ok(self.posts_where("dangling != 0 ORDER BY length(post_id), post_id", [])?)
  }

  fn unlinked_conversations(&self) -> CoreResult<Vec<Conversation>> {
    // Numeric ID order: shorter first, then lexical.
    Ok(self.conversations_where(
      "WHERE discussion_id IS NULL ORDER BY length(conversation_id), conversation_id",
    )?)
  }

  fn discussions(&self) -> CoreResult<Vec<Discussion>> {
    let sql = format!("SELECT {DISCUSSION_COLUMNS} FROM discussions");
    let rows = self.query_all(&sql, [], RawDiscussion::from_row)?;
    Ok(rows.into_iter().map(RawDiscussion::into_discussion).collect::<Result<Vec<_>>>()?)
  }

  fn followed_users(&self) -> CoreResult<Vec<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE following != 0");
    Ok(self.query_all(&sql, [], user_from_row)?)
  }

  fn global_window(&self) -> CoreResult<Option<DateWindow>> {
    Ok(self.window(GLOBAL_SCOPE, "")?)
  }

  fn user_window(&self, author: &UserId) -> CoreResult<Option<DateWindow>> {
    Ok(self.window(USER_SCOPE, author.as_str())?)
  }

  fn has_post(&self, id: &PostId) -> CoreResult<bool> {
    let found = self.query_one("SELECT 1 FROM posts WHERE post_id = ?1", params![id.as_str()], |_| {
      Ok(())
    })?;
    Ok(found.is_some())
  }
}

impl Writer for Db<'_> {
  fn put_post(&mut self, _: &WriteToken, post: &Post) -> CoreResult<()> {
    self
      .conn
      .execute(
        "INSERT OR REPLACE INTO posts (
           post_id, conversation_id, author_id, created_at, text,
           replying_to, quoting, retweeting, dangling, relevance
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
          post.id.as_str(),
          post.conversation_id.as_str(),
          post.author_id.as_str(),
          encode_dt(post.created_at),
          post.text,
          post.replying_to.as_ref().map(PostId::as_str),
          post.quoting.as_ref().map(PostId::as_str),
          post.retweeting.as_ref().map(PostId::as_str),
          post.dangling.bits(),
          encode_relevance(post.relevance),
        ],
      )
      .map_err(Error::from)?;
    Ok(())
  }

  fn put_conversation(&mut self, _: &WriteToken, conv: &Conversation) -> CoreResult<()> {
    let post_ids = encode_ids(&conv.posts)?;
    self
      .conn
      .execute(
        "INSERT OR REPLACE INTO conversations (
           conversation_id, post_ids, root_id, upstream_id, discussion_id
         ) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
          conv.id.as_str(),
          post_ids,
          conv.root.as_ref().map(PostId::as_str),
          conv.upstream.as_ref().map(PostId::as_str),
          conv.discussion.as_ref().map(PostId::as_str),
        ],
      )
      .map_err(Error::from)?;
    Ok(())
  }

  fn put_discussion(&mut self, _: &WriteToken, disc: &Discussion) -> CoreResult<()> {
    let conversation_ids = encode_ids(&disc.conversations)?;
    let tweet_count = i64::try_from(disc.tweet_count).unwrap_or(i64::MAX);
    self
      .conn
      .execute(
        "INSERT OR REPLACE INTO discussions (
           discussion_id, conversation_ids, updated_at, read_state, tweet_count
         ) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
          disc.id.as_str(),
          conversation_ids,
          encode_dt(disc.updated_at),
          encode_read_state(disc.read),
          tweet_count,
        ],
      )
      .map_err(Error::from)?;
    Ok(())
  }

  fn put_user(&mut self, _: &WriteToken, user: &User) -> CoreResult<()> {
    self
      .conn
      .execute(
        "INSERT OR REPLACE INTO users (user_id, handle, name, following)
         VALUES (?1, ?2, ?3, ?4)",
        params![user.id.as_str(), user.handle, user.name, user.following],
      )
      .map_err(Error::from)?;
    Ok(())
  }

  fn put_global_window(&mut self, _: &WriteToken, window: DateWindow) -> CoreResult<()> {
    Ok(self.put_window(GLOBAL_SCOPE, "", window)?)
  }

  fn put_user_window(
    &mut self,
    _: &WriteToken,
    author: &UserId,
    window: DateWindow,
  ) -> CoreResult<()> {
    Ok(self.put_window(USER_SCOPE, author.as_str(), window)?)
  }
}
