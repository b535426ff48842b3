//! Fixtures shared by the unit tests.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use crate::{
  fetch::{FetchError, FetchService, RawPost, RawReference, RawUser},
  model::{Dangling, Post, PostId, ReferenceKind, Relevance, UserId},
  plan::FetchRequest,
  window::DateWindow,
};

pub fn now() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 6, 20, 12, 0, 0).unwrap() }

/// A post by `u1` at [`now`], optionally replying to `replying_to`.
pub fn post(id: &str, conversation: &str, replying_to: Option<&str>) -> Post {
  Post {
    id:              id.into(),
    conversation_id: conversation.into(),
    author_id:       "u1".into(),
    created_at:      now(),
    text:            format!("post {id}"),
    replying_to:     replying_to.map(PostId::from),
    quoting:         None,
    retweeting:      None,
    dangling:        Dangling::NONE,
    relevance:       Relevance::Irrelevant,
  }
}

/// An origin post at `at`.
pub fn post_at(id: &str, at: DateTime<Utc>) -> Post {
  Post { created_at: at, ..post(id, id, None) }
}

/// An origin post written by `author`.
pub fn post_by(id: &str, author: &str) -> Post {
  Post { author_id: author.into(), ..post(id, id, None) }
}

pub fn raw(id: &str, conversation: &str, author: &str, at: DateTime<Utc>) -> RawPost {
  RawPost {
    id:              id.into(),
    conversation_id: conversation.into(),
    author_id:       author.into(),
    created_at:      at,
    text:            format!("raw {id}"),
    references:      Vec::new(),
  }
}

pub fn raw_ref(id: &str, conversation: &str, author: &str, kind: ReferenceKind, target: &str) -> RawPost {
  RawPost {
    references: vec![RawReference { kind, id: target.into() }],
    ..raw(id, conversation, author, now())
  }
}

pub fn raw_user(id: &str) -> RawUser {
  RawUser { id: id.into(), handle: format!("@{id}"), name: format!("User {id}") }
}

// ─── Scripted fetch service ──────────────────────────────────────────────────

/// A [`FetchService`] over a fixed universe of posts and users.
#[derive(Default)]
pub struct ScriptedFetcher {
  posts:           Vec<RawPost>,
  users:           Vec<RawUser>,
  failing_authors: HashSet<UserId>,
  calls:           Mutex<Vec<FetchRequest>>,
}

impl ScriptedFetcher {
  pub fn new(posts: Vec<RawPost>, users: Vec<RawUser>) -> Self {
    Self { posts, users, ..Default::default() }
  }

  /// Timeline fetches for `author` fail with a server error.
  pub fn failing_for(mut self, author: &str) -> Self {
    self.failing_authors.insert(author.into());
    self
  }

  pub fn calls(&self) -> Vec<FetchRequest> { self.calls.lock().clone() }
}

impl FetchService for ScriptedFetcher {
  async fn fetch_posts_by_id(&self, ids: BTreeSet<PostId>) -> Result<Vec<RawPost>, FetchError> {
    let found = self.posts.iter().filter(|p| ids.contains(&p.id)).cloned().collect();
    self.calls.lock().push(FetchRequest::Posts(ids));
    Ok(found)
  }

  async fn fetch_timeline(
    &self,
    author: UserId,
    window: DateWindow,
  ) -> Result<Vec<RawPost>, FetchError> {
    self.calls.lock().push(FetchRequest::Timeline { author: author.clone(), window });
    if self.failing_authors.contains(&author) {
      return Err(FetchError::Status { status: 503, body: "unavailable".to_owned() });
    }
    Ok(
      self
        .posts
        .iter()
        .filter(|p| p.author_id == author && window.contains(p.created_at))
        .cloned()
        .collect(),
    )
  }

  async fn fetch_users_by_id(&self, ids: BTreeSet<UserId>) -> Result<Vec<RawUser>, FetchError> {
    let found = self.users.iter().filter(|u| ids.contains(&u.id)).cloned().collect();
    self.calls.lock().push(FetchRequest::Users(ids));
    Ok(found)
  }

  async fn fetch_home_timeline(
    &self,
    since: Option<DateTime<Utc>>,
  ) -> Result<Vec<RawPost>, FetchError> {
    self.calls.lock().push(FetchRequest::Home { since });
    Ok(
      self
        .posts
        .iter()
        .filter(|p| since.is_none_or(|s| p.created_at > s))
        .cloned()
        .collect(),
    )
  }
}
