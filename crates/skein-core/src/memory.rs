//! [`MemoryStore`]: an in-process arena implementation of [`Store`].
//!
//! Writers are serialised by a gate mutex. A write stages its mutations in an
//! overlay on top of the committed arena; readers keep seeing the committed
//! state until the overlay is applied in one step at commit.

use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};

use crate::{
  Result,
  model::{
    Conversation, ConversationId, Discussion, DiscussionId, Post, PostId, User, UserId,
  },
  store::{Notifier, Reader, Store, WriteToken, Writer},
  window::DateWindow,
};

// ─── Arena ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone)]
struct Arena {
  posts:         HashMap<PostId, Post>,
  conversations: HashMap<ConversationId, Conversation>,
  discussions:   HashMap<DiscussionId, Discussion>,
  users:         HashMap<UserId, User>,
  global:        Option<DateWindow>,
  user_windows:  HashMap<UserId, DateWindow>,
}

impl Arena {
  fn apply(&mut self, delta: Arena) {
    self.posts.extend(delta.posts);
    self.conversations.extend(delta.conversations);
    self.discussions.extend(delta.discussions);
    self.users.extend(delta.users);
    self.user_windows.extend(delta.user_windows);
    if delta.global.is_some() {
      self.global = delta.global;
    }
  }
}

impl Reader for Arena {
  fn get_post(&self, id: &PostId) -> Result<Option<Post>> { Ok(self.posts.get(id).cloned()) }

  fn get_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>> {
    Ok(self.conversations.get(id).cloned())
  }

  fn get_discussion(&self, id: &DiscussionId) -> Result<Option<Discussion>> {
    Ok(self.discussions.get(id).cloned())
  }

  fn get_user(&self, id: &UserId) -> Result<Option<User>> { Ok(self.users.get(id).cloned()) }

  fn posts_by_author(&self, author: &UserId) -> Result<Vec<Post>> {
    Ok(self.posts.values().filter(|p| &p.author_id == author).cloned().collect())
  }

  fn dangling_posts(&self) -> Result<Vec<Post>> {
    Ok(self.posts.values().filter(|p| !p.dangling.is_empty()).cloned().collect())
  }

  fn unlinked_conversations(&self) -> Result<Vec<Conversation>> {
    let mut convs: Vec<Conversation> = self
      .conversations
      .values()
      .filter(|c| c.discussion.is_none())
      .cloned()
      .collect();
    convs.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(convs)
  }

  fn discussions(&self) -> Result<Vec<Discussion>> {
    Ok(self.discussions.values().cloned().collect())
  }

  fn followed_users(&self) -> Result<Vec<User>> {
    Ok(self.users.values().filter(|u| u.following).cloned().collect())
  }

  fn global_window(&self) -> Result<Option<DateWindow>> { Ok(self.global) }

  fn user_window(&self, author: &UserId) -> Result<Option<DateWindow>> {
    Ok(self.user_windows.get(author).copied())
  }
}

// ─── Staged overlay ──────────────────────────────────────────────────────────

/// Committed state plus the uncommitted writes of the running transaction.
struct Staged<'a> {
  base:  &'a Arena,
  delta: Arena,
}

/// Values of `base` not shadowed by `delta`, followed by those of `delta`.
fn merged<'m, K, V>(
  base: &'m HashMap<K, V>,
  delta: &'m HashMap<K, V>,
) -> impl Iterator<Item = &'m V>
where
  K: std::hash::Hash + Eq,
{
  base
    .iter()
    .filter(|(k, _)| !delta.contains_key(*k))
    .map(|(_, v)| v)
    .chain(delta.values())
}

impl Reader for Staged<'_> {
  fn get_post(&self, id: &PostId) -> Result<Option<Post>> {
    Ok(self.delta.posts.get(id).or_else(|| self.base.posts.get(id)).cloned())
  }

  fn get_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>> {
    Ok(
      self
        .delta
        .conversations
        .get(id)
        .or_else(|| self.base.conversations.get(id))
        .cloned(),
    )
  }

  fn get_discussion(&self, id: &DiscussionId) -> Result<Option<Discussion>> {
    Ok(
      self
        .delta
        .discussions
        .get(id)
        .or_else(|| self.base.discussions.get(id))
        .cloned(),
    )
  }

  fn get_user(&self, id: &UserId) -> Result<Option<User>> {
    Ok(self.delta.users.get(id).or_else(|| self.base.users.get(id)).cloned())
  }

  fn posts_by_author(&self, author: &UserId) -> Result<Vec<Post>> {
    Ok(
      merged(&self.base.posts, &self.delta.posts)
        .filter(|p| &p.author_id == author)
        .cloned()
        .collect(),
    )
  }

  fn dangling_posts(&self) -> Result<Vec<Post>> {
    Ok(
      merged(&self.base.posts, &self.delta.posts)
        .filter(|p| !p.dangling.is_empty())
        .cloned()
        .collect(),
    )
  }

  fn unlinked_conversations(&self) -> Result<Vec<Conversation>> {
    let mut convs: Vec<Conversation> =
      merged(&self.base.conversations, &self.delta.conversations)
        .filter(|c| c.discussion.is_none())
        .cloned()
        .collect();
    convs.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(convs)
  }

  fn discussions(&self) -> Result<Vec<Discussion>> {
    Ok(merged(&self.base.discussions, &self.delta.discussions).cloned().collect())
  }

  fn followed_users(&self) -> Result<Vec<User>> {
    Ok(
      merged(&self.base.users, &self.delta.users)
        .filter(|u| u.following)
        .cloned()
        .collect(),
    )
  }

  fn global_window(&self) -> Result<Option<DateWindow>> {
    Ok(self.delta.global.or(self.base.global))
  }

  fn user_window(&self, author: &UserId) -> Result<Option<DateWindow>> {
    Ok(
      self
        .delta
        .user_windows
        .get(author)
        .or_else(|| self.base.user_windows.get(author))
        .copied(),
    )
  }
}

impl Writer for Staged<'_> {
  fn put_post(&mut self, _: &WriteToken, post: &Post) -> Result<()> {
    self.delta.posts.insert(post.id.clone(), post.clone());
    Ok(())
  }

  fn put_conversation(&mut self, _: &WriteToken, conv: &Conversation) -> Result<()> {
    self.delta.conversations.insert(conv.id.clone(), conv.clone());
    Ok(())
  }

  fn put_discussion(&mut self, _: &WriteToken, disc: &Discussion) -> Result<()> {
    self.delta.discussions.insert(disc.id.clone(), disc.clone());
    Ok(())
  }

  fn put_user(&mut self, _: &WriteToken, user: &User) -> Result<()> {
    self.delta.users.insert(user.id.clone(), user.clone());
    Ok(())
  }

  fn put_global_window(&mut self, _: &WriteToken, window: DateWindow) -> Result<()> {
    self.delta.global = Some(window);
    Ok(())
  }

  fn put_user_window(
    &mut self,
    _: &WriteToken,
    author: &UserId,
    window: DateWindow,
  ) -> Result<()> {
    self.delta.user_windows.insert(author.clone(), window);
    Ok(())
  }
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A volatile store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStore {
  arena:    RwLock<Arena>,
  gate:     Mutex<()>,
  notifier: Notifier,
}

impl MemoryStore {
  pub fn new() -> Self { Self::default() }
}

impl Store for MemoryStore {
  async fn read<R, F>(&self, f: F) -> Result<R>
  where
    R: Send + 'static,
    F: FnOnce(&dyn Reader) -> Result<R> + Send + 'static,
  {
    let arena = self.arena.read();
    f(&*arena)
  }

  async fn write<R, F>(&self, f: F) -> Result<R>
  where
    R: Send + 'static,
    F: FnOnce(&mut dyn Writer) -> Result<R> + Send + 'static,
  {
    let _gate = self.gate.lock();
    let (value, delta) = {
      let base = self.arena.read();
      let mut staged = Staged { base: &*base, delta: Arena::default() };
      let value = f(&mut staged)?;
      (value, staged.delta)
    };
    self.arena.write().apply(delta);
    Ok(value)
  }

  fn notifier(&self) -> &Notifier { &self.notifier }
}

#[cfg(test)]
mod tests {
  use chrono::{TimeZone, Utc};

  use super::*;
  use crate::{
    Error,
    model::{Dangling, Relevance},
    store::transact,
  };

  fn post(id: &str) -> Post {
    Post {
      id:              id.into(),
      conversation_id: id.into(),
      author_id:       "u1".into(),
      created_at:      Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
      text:            format!("post {id}"),
      replying_to:     None,
      quoting:         None,
      retweeting:      None,
      dangling:        Dangling::NONE,
      relevance:       Relevance::Irrelevant,
    }
  }

  #[tokio::test]
  async fn committed_writes_are_visible() {
    let store = MemoryStore::new();
    let p = post("10");
    transact(&store, move |tx| tx.put_post(&p)).await.unwrap();

    let got = store.read(|r| r.get_post(&"10".into())).await.unwrap();
    assert_eq!(got.map(|p| p.text).as_deref(), Some("post 10"));
  }

  #[tokio::test]
  async fn staged_writes_are_visible_inside_the_transaction() {
    let store = MemoryStore::new();
    let seen = transact(&store, |tx| {
      tx.put_post(&post("11"))?;
      tx.has_post(&"11".into())
    })
    .await
    .unwrap();
    assert!(seen);
  }

  #[tokio::test]
  async fn failed_transaction_rolls_back() {
    let store = MemoryStore::new();
    let result = transact(&store, |tx| -> Result<()> {
      tx.put_post(&post("12"))?;
      Err(Error::PostNotFound("nope".into()))
    })
    .await;
    assert!(result.is_err());

    let got = store.read(|r| r.has_post(&"12".into())).await.unwrap();
    assert!(!got);
  }

  #[tokio::test]
  async fn observers_see_committed_changes_only() {
    let store = MemoryStore::new();
    let mut rx = store.notifier().observe();

    let _ = transact(&store, |tx| -> Result<()> {
      tx.put_post(&post("13"))?;
      Err(Error::PostNotFound("13".into()))
    })
    .await;
    transact(&store, |tx| {
      tx.put_post(&post("14"))?;
      tx.put_post(&post("14"))
    })
    .await
    .unwrap();

    assert_eq!(rx.try_recv().unwrap(), crate::store::Change::Post("14".into()));
    assert!(rx.try_recv().is_err());
  }
}
