//! The `FetchService` trait and the raw records it returns.
//!
//! Implemented by network backends (e.g. `skein-twitter`). Records arrive
//! already decoded; the engine never sees a wire format.

use std::{collections::BTreeSet, future::Future};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
  model::{PostId, ReferenceKind, UserId},
  window::DateWindow,
};

#[derive(Debug, Clone, Error)]
pub enum FetchError {
  #[error("not authorised: {0}")]
  Auth(String),

  #[error("rate limited (resets at {reset_at:?})")]
  RateLimited { reset_at: Option<DateTime<Utc>> },

  #[error("unexpected status {status}: {body}")]
  Status { status: u16, body: String },

  #[error("transport error: {0}")]
  Transport(String),

  #[error("could not decode response: {0}")]
  Decode(String),
}

// ─── Raw records ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawReference {
  pub kind: ReferenceKind,
  pub id:   PostId,
}

/// A post exactly as the fetch service reported it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPost {
  pub id:              PostId,
  pub conversation_id: PostId,
  pub author_id:       UserId,
  pub created_at:      DateTime<Utc>,
  pub text:            String,
  #[serde(default)]
  pub references:      Vec<RawReference>,
}

impl RawPost {
  /// The first reference of `kind`, if any.
  pub fn reference(&self, kind: ReferenceKind) -> Option<&PostId> {
    self.references.iter().find(|r| r.kind == kind).map(|r| &r.id)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawUser {
  pub id:     UserId,
  pub handle: String,
  pub name:   String,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Network access to posts and users.
///
/// Implementations hold no engine state; every call is independent and may
/// be retried.
pub trait FetchService: Send + Sync {
  /// Look up posts by ID. IDs the service cannot return are simply absent
  /// from the result.
  fn fetch_posts_by_id(
    &self,
    ids: BTreeSet<PostId>,
  ) -> impl Future<Output = Result<Vec<RawPost>, FetchError>> + Send + '_;

  /// Posts written by `author` within `window`.
  fn fetch_timeline(
    &self,
    author: UserId,
    window: DateWindow,
  ) -> impl Future<Output = Result<Vec<RawPost>, FetchError>> + Send + '_;

  fn fetch_users_by_id(
    &self,
    ids: BTreeSet<UserId>,
  ) -> impl Future<Output = Result<Vec<RawUser>, FetchError>> + Send + '_;

  /// The reader's home timeline, newest first, optionally only posts
  /// created after `since`.
  fn fetch_home_timeline(
    &self,
    since: Option<DateTime<Utc>>,
  ) -> impl Future<Output = Result<Vec<RawPost>, FetchError>> + Send + '_;
}
