//! Read-only views for the presentation layer.

use serde::{Deserialize, Serialize};

use crate::{
  Result,
  model::{Discussion, DiscussionId, Post, Relevance},
  store::Reader,
};

/// A discussion with its member posts in display order. Derived on read,
/// never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscussionView {
  pub discussion: Discussion,
  /// Creation time, then ID.
  pub posts:      Vec<Post>,
  /// The highest tier among the member posts.
  pub relevance:  Relevance,
}

pub fn discussion_view<R: Reader + ?Sized>(
  reader: &R,
  id: &DiscussionId,
) -> Result<Option<DiscussionView>> {
  let Some(discussion) = reader.get_discussion(id)? else {
    return Ok(None);
  };

  let mut posts = Vec::with_capacity(discussion.tweet_count);
  for conv_id in &discussion.conversations {
    let Some(conv) = reader.get_conversation(conv_id)? else {
      continue;
    };
    for post_id in &conv.posts {
      if let Some(post) = reader.get_post(post_id)? {
        posts.push(post);
      }
    }
  }
  posts.sort_by(|a, b| a.timeline_key().cmp(&b.timeline_key()));

  let relevance = posts.iter().map(|p| p.relevance).max().unwrap_or_default();
  Ok(Some(DiscussionView { discussion, posts, relevance }))
}

/// Discussions at or above `min` relevance, most recently updated first.
pub fn list_discussions<R: Reader + ?Sized>(
  reader: &R,
  min: Relevance,
) -> Result<Vec<DiscussionView>> {
  let mut views = Vec::new();
  for discussion in reader.discussions()? {
    if let Some(view) = discussion_view(reader, &discussion.id)?
      && view.relevance >= min
    {
      views.push(view);
    }
  }
  views.sort_by(|a, b| {
    b.discussion
      .updated_at
      .cmp(&a.discussion.updated_at)
      .then_with(|| b.discussion.id.cmp(&a.discussion.id))
  });
  Ok(views)
}
