//! The store abstraction: readers, token-gated writers, and change
//! notification.
//!
//! Backends implement [`Reader`], [`Writer`] and [`Store`]. Engine code never
//! calls [`Store::write`] directly; it goes through [`transact`], the only
//! place a [`WriteToken`] is minted. Every [`Writer`] mutation demands a
//! `&WriteToken`, so no mutation can run outside a transaction.

use std::{collections::HashSet, future::Future};

use tokio::sync::broadcast;

use crate::{
  Result,
  model::{
    Conversation, ConversationId, Discussion, DiscussionId, Post, PostId, User, UserId,
  },
  window::DateWindow,
};

// ─── Capability token ────────────────────────────────────────────────────────

/// Proof that the holder is running inside a write transaction.
///
/// Cannot be constructed outside this module and cannot be cloned.
#[derive(Debug)]
pub struct WriteToken {
  _private: (),
}

// ─── Backend traits ──────────────────────────────────────────────────────────

/// Indexed, side-effect-free lookups.
pub trait Reader {
  fn get_post(&self, id: &PostId) -> Result<Option<Post>>;

  fn get_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>>;

  fn get_discussion(&self, id: &DiscussionId) -> Result<Option<Discussion>>;

  fn get_user(&self, id: &UserId) -> Result<Option<User>>;

  fn posts_by_author(&self, author: &UserId) -> Result<Vec<Post>>;

  /// Every post whose dangling set is non-empty.
  fn dangling_posts(&self) -> Result<Vec<Post>>;

  /// Every conversation with no discussion, ordered by ID.
  fn unlinked_conversations(&self) -> Result<Vec<Conversation>>;

  fn discussions(&self) -> Result<Vec<Discussion>>;

  fn followed_users(&self) -> Result<Vec<User>>;

  fn global_window(&self) -> Result<Option<DateWindow>>;

  fn user_window(&self, author: &UserId) -> Result<Option<DateWindow>>;

  fn has_post(&self, id: &PostId) -> Result<bool> { Ok(self.get_post(id)?.is_some()) }
}

/// Insert-or-replace operations, valid only inside a write transaction.
pub trait Writer: Reader {
  fn put_post(&mut self, token: &WriteToken, post: &Post) -> Result<()>;

  fn put_conversation(&mut self, token: &WriteToken, conv: &Conversation) -> Result<()>;

  fn put_discussion(&mut self, token: &WriteToken, disc: &Discussion) -> Result<()>;

  fn put_user(&mut self, token: &WriteToken, user: &User) -> Result<()>;

  fn put_global_window(&mut self, token: &WriteToken, window: DateWindow) -> Result<()>;

  fn put_user_window(
    &mut self,
    token: &WriteToken,
    author: &UserId,
    window: DateWindow,
  ) -> Result<()>;
}

/// A transactional entity store.
///
/// `write` must be atomic: if `f` returns an error nothing it did is kept.
/// At most one write closure runs at a time. Closures are synchronous and
/// run on the store's own thread, so they cannot await network calls.
pub trait Store: Send + Sync {
  fn read<R, F>(&self, f: F) -> impl Future<Output = Result<R>> + Send + '_
  where
    R: Send + 'static,
    F: FnOnce(&dyn Reader) -> Result<R> + Send + 'static;

  fn write<R, F>(&self, f: F) -> impl Future<Output = Result<R>> + Send + '_
  where
    R: Send + 'static,
    F: FnOnce(&mut dyn Writer) -> Result<R> + Send + 'static;

  fn notifier(&self) -> &Notifier;
}

// ─── Change notification ─────────────────────────────────────────────────────

/// An entity touched by a committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Change {
  Post(PostId),
  Conversation(ConversationId),
  Discussion(DiscussionId),
  User(UserId),
  Frontier,
}

/// Fan-out of committed changes to observers.
#[derive(Debug, Clone)]
pub struct Notifier {
  tx: broadcast::Sender<Change>,
}

impl Notifier {
  pub fn new(capacity: usize) -> Self {
    let (tx, _) = broadcast::channel(capacity);
    Self { tx }
  }

  /// Subscribe to every change committed from now on.
  pub fn observe(&self) -> broadcast::Receiver<Change> { self.tx.subscribe() }

  fn publish(&self, changes: Vec<Change>) {
    let mut seen = HashSet::new();
    for change in changes {
      if seen.insert(change.clone()) {
        // No receivers is not an error.
        let _ = self.tx.send(change);
      }
    }
  }
}

impl Default for Notifier {
  fn default() -> Self { Self::new(1024) }
}

// ─── Transactions ────────────────────────────────────────────────────────────

/// A write transaction in progress: the backend writer, the capability
/// token, and the changes recorded so far.
pub struct WriteTxn<'t> {
  raw:     &'t mut dyn Writer,
  token:   WriteToken,
  changes: Vec<Change>,
}

impl WriteTxn<'_> {
  pub fn put_post(&mut self, post: &Post) -> Result<()> {
    self.raw.put_post(&self.token, post)?;
    self.changes.push(Change::Post(post.id.clone()));
    Ok(())
  }

  pub fn put_conversation(&mut self, conv: &Conversation) -> Result<()> {
    self.raw.put_conversation(&self.token, conv)?;
    self.changes.push(Change::Conversation(conv.id.clone()));
    Ok(())
  }

  pub fn put_discussion(&mut self, disc: &Discussion) -> Result<()> {
    self.raw.put_discussion(&self.token, disc)?;
    self.changes.push(Change::Discussion(disc.id.clone()));
    Ok(())
  }

  pub fn put_user(&mut self, user: &User) -> Result<()> {
    self.raw.put_user(&self.token, user)?;
    self.changes.push(Change::User(user.id.clone()));
    Ok(())
  }

  pub fn put_global_window(&mut self, window: DateWindow) -> Result<()> {
    self.raw.put_global_window(&self.token, window)?;
    self.changes.push(Change::Frontier);
    Ok(())
  }

  pub fn put_user_window(&mut self, author: &UserId, window: DateWindow) -> Result<()> {
    self.raw.put_user_window(&self.token, author, window)?;
    self.changes.push(Change::Frontier);
    Ok(())
  }
}

impl Reader for WriteTxn<'_> {
  fn get_post(&self, id: &PostId) -> Result<Option<Post>> { self.raw.get_post(id) }

  fn get_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>> {
    self.raw.get_conversation(id)
  }

  fn get_discussion(&self, id: &DiscussionId) -> Result<Option<Discussion>> {
    self.raw.get_discussion(id)
  }

  fn get_user(&self, id: &UserId) -> Result<Option<User>> { self.raw.get_user(id) }

  fn posts_by_author(&self, author: &UserId) -> Result<Vec<Post>> {
    self.raw.posts_by_author(author)
  }

  fn dangling_posts(&self) -> Result<Vec<Post>> { self.raw.dangling_posts() }

  fn unlinked_conversations(&self) -> Result<Vec<Conversation>> {
    self.raw.unlinked_conversations()
  }

  fn discussions(&self) -> Result<Vec<Discussion>> { self.raw.discussions() }

  fn followed_users(&self) -> Result<Vec<User>> { self.raw.followed_users() }

  fn global_window(&self) -> Result<Option<DateWindow>> { self.raw.global_window() }

  fn user_window(&self, author: &UserId) -> Result<Option<DateWindow>> {
    self.raw.user_window(author)
  }

  fn has_post(&self, id: &PostId) -> Result<bool> { self.raw.has_post(id) }
}

/// Run `f` inside one atomic write transaction on `store`.
///
/// This is the only way to obtain a [`WriteTxn`]. Changes recorded by `f`
/// are published to observers after the commit succeeds; a failed `f`
/// publishes nothing.
pub async fn transact<S, R, F>(store: &S, f: F) -> Result<R>
where
  S: Store,
  R: Send + 'static,
  F: FnOnce(&mut WriteTxn<'_>) -> Result<R> + Send + 'static,
{
  let (value, changes) = store
    .write(move |raw| {
      let mut tx = WriteTxn {
        raw,
        token: WriteToken { _private: () },
        changes: Vec::new(),
      };
      let value = f(&mut tx)?;
      Ok((value, tx.changes))
    })
    .await?;
  store.notifier().publish(changes);
  Ok(value)
}
