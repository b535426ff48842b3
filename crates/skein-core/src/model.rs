//! The reference graph: posts, conversations, discussions and users.
//!
//! Entities live in an arena keyed by ID. Parent links (`upstream`,
//! `discussion`) are plain IDs used for lookup; nothing holds a live
//! reference to another entity.

use std::{cmp::Ordering, collections::BTreeSet, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Identifiers ─────────────────────────────────────────────────────────────

/// A platform-assigned post ID.
///
/// IDs are decimal strings that grow over time, so they order numerically:
/// a shorter ID sorts first, equal lengths compare lexically. This is the
/// tie-breaker when two posts share a creation timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(String);

impl PostId {
  pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl Ord for PostId {
  fn cmp(&self, other: &Self) -> Ordering {
    self.0.len().cmp(&other.0.len()).then_with(|| self.0.cmp(&other.0))
  }
}

impl PartialOrd for PostId {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl fmt::Display for PostId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for PostId {
  fn from(s: &str) -> Self { Self(s.to_owned()) }
}

impl From<String> for PostId {
  fn from(s: String) -> Self { Self(s) }
}

/// A conversation is named after its root post.
pub type ConversationId = PostId;

/// A discussion is named after its root conversation.
pub type DiscussionId = PostId;

/// A platform-assigned user ID.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
  pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for UserId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for UserId {
  fn from(s: &str) -> Self { Self(s.to_owned()) }
}

impl From<String> for UserId {
  fn from(s: String) -> Self { Self(s) }
}

// ─── References ──────────────────────────────────────────────────────────────

/// The three ways one post can point at another.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  strum::EnumString,
  strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReferenceKind {
  Reply,
  Quote,
  Retweet,
}

impl ReferenceKind {
  /// All kinds, in primary-reference precedence order.
  pub const ALL: [ReferenceKind; 3] = [Self::Reply, Self::Quote, Self::Retweet];

  fn bit(self) -> u8 {
    match self {
      Self::Reply => 0b001,
      Self::Quote => 0b010,
      Self::Retweet => 0b100,
    }
  }
}

/// The subset of a post's references whose targets are not yet known
/// locally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub struct Dangling(u8);

impl Dangling {
  pub const NONE: Dangling = Dangling(0);

  pub fn contains(self, kind: ReferenceKind) -> bool { self.0 & kind.bit() != 0 }

  pub fn insert(&mut self, kind: ReferenceKind) { self.0 |= kind.bit(); }

  pub fn remove(&mut self, kind: ReferenceKind) { self.0 &= !kind.bit(); }

  pub fn is_empty(self) -> bool { self.0 == 0 }

  pub fn iter(self) -> impl Iterator<Item = ReferenceKind> {
    ReferenceKind::ALL.into_iter().filter(move |k| self.contains(*k))
  }

  pub fn bits(self) -> u8 { self.0 }
}

impl From<u8> for Dangling {
  fn from(bits: u8) -> Self { Self(bits & 0b111) }
}

impl From<Dangling> for u8 {
  fn from(d: Dangling) -> Self { d.0 }
}

impl FromIterator<ReferenceKind> for Dangling {
  fn from_iter<I: IntoIterator<Item = ReferenceKind>>(iter: I) -> Self {
    let mut set = Self::NONE;
    for kind in iter {
      set.insert(kind);
    }
    set
  }
}

// ─── Classification ──────────────────────────────────────────────────────────

/// How strongly a post is tied to the people the reader follows.
#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  strum::EnumString,
  strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Relevance {
  #[default]
  Irrelevant,
  /// Written by someone not followed, but referenced by a followed author.
  Referenced,
  Followed,
}

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  strum::EnumString,
  strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReadState {
  #[default]
  Unread,
  Read,
}

// ─── Post ────────────────────────────────────────────────────────────────────

/// A single fetched post. Its conversation is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
  pub id:              PostId,
  pub conversation_id: ConversationId,
  pub author_id:       UserId,
  pub created_at:      DateTime<Utc>,
  pub text:            String,
  pub replying_to:     Option<PostId>,
  pub quoting:         Option<PostId>,
  pub retweeting:      Option<PostId>,
  pub dangling:        Dangling,
  pub relevance:       Relevance,
}

impl Post {
  pub fn reference(&self, kind: ReferenceKind) -> Option<&PostId> {
    match kind {
      ReferenceKind::Reply => self.replying_to.as_ref(),
      ReferenceKind::Quote => self.quoting.as_ref(),
      ReferenceKind::Retweet => self.retweeting.as_ref(),
    }
  }

  /// Every present reference, in precedence order.
  pub fn references(&self) -> impl Iterator<Item = (ReferenceKind, &PostId)> {
    ReferenceKind::ALL
      .into_iter()
      .filter_map(|kind| self.reference(kind).map(|id| (kind, id)))
  }

  /// The reference that places this post in the tree: reply, then quote,
  /// then retweet.
  pub fn primary_reference(&self) -> Option<(ReferenceKind, &PostId)> {
    self.references().next()
  }

  /// True for posts that reference nothing at all.
  pub fn is_origin(&self) -> bool { self.primary_reference().is_none() }

  /// Sort key for display: creation time, then ID.
  pub fn timeline_key(&self) -> (DateTime<Utc>, &PostId) { (self.created_at, &self.id) }
}

// ─── Conversation ────────────────────────────────────────────────────────────

/// All locally known posts sharing one root-post ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
  pub id:         ConversationId,
  pub posts:      BTreeSet<PostId>,
  /// Set once the post named by `id` is known locally.
  pub root:       Option<PostId>,
  /// The conversation holding the target of the root's primary reference.
  /// Equal to `id` when the root references nothing.
  pub upstream:   Option<ConversationId>,
  pub discussion: Option<DiscussionId>,
}

impl Conversation {
  pub fn new(id: ConversationId) -> Self {
    Self {
      id,
      posts: BTreeSet::new(),
      root: None,
      upstream: None,
      discussion: None,
    }
  }

  /// True when this conversation roots its own discussion.
  pub fn is_origin(&self) -> bool { self.upstream.as_ref() == Some(&self.id) }
}

// ─── Discussion ──────────────────────────────────────────────────────────────

/// A resolved tree of conversations rooted at a true origin post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discussion {
  pub id:            DiscussionId,
  pub conversations: BTreeSet<ConversationId>,
  /// Creation time of the newest member post.
  pub updated_at:    DateTime<Utc>,
  pub read:          ReadState,
  pub tweet_count:   usize,
}

impl Discussion {
  pub fn new(id: DiscussionId, updated_at: DateTime<Utc>) -> Self {
    Self {
      id,
      conversations: BTreeSet::new(),
      updated_at,
      read: ReadState::Unread,
      tweet_count: 0,
    }
  }
}

// ─── User ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
  pub id:        UserId,
  /// `None` until the user record has been fetched.
  pub handle:    Option<String>,
  pub name:      Option<String>,
  pub following: bool,
}

impl User {
  /// A user known only by ID.
  pub fn placeholder(id: UserId) -> Self {
    Self { id, handle: None, name: None, following: false }
  }

  pub fn is_placeholder(&self) -> bool { self.handle.is_none() }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
