//! Linking posts into conversations and conversations into discussions.

use std::collections::HashSet;

use tracing::{debug, error};

use crate::{
  Result,
  model::{Conversation, ConversationId, Discussion, DiscussionId, Post, ReadState},
  store::{Reader, WriteTxn},
};

/// What [`link`] did with a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linked {
  /// The post joined its conversation.
  Inserted,
  /// The conversation already held the post; nothing changed.
  AlreadyPresent,
}

/// Insert `post` into its conversation, creating the conversation on first
/// sight. Linking the same post twice is a no-op.
pub fn link(tx: &mut WriteTxn<'_>, post: &Post) -> Result<Linked> {
  let mut conv = tx
    .get_conversation(&post.conversation_id)?
    .unwrap_or_else(|| Conversation::new(post.conversation_id.clone()));

  if !conv.posts.insert(post.id.clone()) {
    return Ok(Linked::AlreadyPresent);
  }
  tx.put_conversation(&conv)?;

  if let Some(discussion_id) = &conv.discussion {
    refresh_discussion(tx, discussion_id)?;
  }
  Ok(Linked::Inserted)
}

/// The discussion the conversation `id` belongs to, if any.
pub fn discussion_of<R: Reader + ?Sized>(
  reader: &R,
  id: &ConversationId,
) -> Result<Option<DiscussionId>> {
  Ok(reader.get_conversation(id)?.and_then(|c| c.discussion))
}

/// Attach `conv` to the discussion `discussion_id`, saving `conv` along the
/// way. Returns `false` when the attachment was refused as inconsistent.
///
/// Refused when the conversation already belongs to a different
/// discussion, or when its upstream chain does not lead back to the
/// discussion root.
pub(crate) fn attach(
  tx: &mut WriteTxn<'_>,
  mut conv: Conversation,
  discussion_id: &DiscussionId,
) -> Result<bool> {
  if let Some(existing) = &conv.discussion {
    if existing != discussion_id {
      error!(
        defect = "conversation_in_two_discussions",
        conversation = %conv.id,
        existing = %existing,
        requested = %discussion_id,
        "conversation already linked to another discussion; skipping",
      );
    }
    return Ok(false);
  }

  let Some(mut discussion) = tx.get_discussion(discussion_id)? else {
    error!(
      defect = "missing_discussion",
      conversation = %conv.id,
      discussion = %discussion_id,
      "upstream names a discussion that does not exist; skipping",
    );
    return Ok(false);
  };

  if !reaches_root(tx, &conv, discussion_id)? {
    return Ok(false);
  }

  conv.discussion = Some(discussion_id.clone());
  tx.put_conversation(&conv)?;
  discussion.conversations.insert(conv.id.clone());
  tx.put_discussion(&discussion)?;
  refresh_discussion(tx, discussion_id)?;
  debug!(conversation = %conv.id, discussion = %discussion_id, "attached conversation");
  Ok(true)
}

/// Follow `upstream` pointers from `conv` and check they end at `root`.
fn reaches_root<R: Reader + ?Sized>(
  reader: &R,
  conv: &Conversation,
  root: &DiscussionId,
) -> Result<bool> {
  let mut visited: HashSet<ConversationId> = HashSet::from([conv.id.clone()]);
  let mut cursor = conv.upstream.clone();

  while let Some(current) = cursor {
    if &current == root {
      return Ok(true);
    }
    if !visited.insert(current.clone()) {
      error!(
        defect = "upstream_cycle",
        conversation = %conv.id,
        at = %current,
        "upstream chain loops; skipping",
      );
      return Ok(false);
    }
    cursor = reader.get_conversation(&current)?.and_then(|c| c.upstream);
  }

  // The origin conversation names itself as upstream, so an origin being
  // attached to its own discussion returns above. Anything else ran out.
  if &conv.id == root {
    return Ok(true);
  }
  error!(
    defect = "orphaned_upstream",
    conversation = %conv.id,
    discussion = %root,
    "upstream chain ends before the discussion root; skipping",
  );
  Ok(false)
}

/// Recompute a discussion's cached aggregates from its member posts.
///
/// New members mark the discussion unread.
pub(crate) fn refresh_discussion(tx: &mut WriteTxn<'_>, id: &DiscussionId) -> Result<()> {
  let Some(mut discussion) = tx.get_discussion(id)? else {
    return Ok(());
  };

  let mut count = 0;
  let mut newest = None;
  for conv_id in &discussion.conversations {
    let Some(conv) = tx.get_conversation(conv_id)? else {
      continue;
    };
    for post_id in &conv.posts {
      if let Some(post) = tx.get_post(post_id)? {
        count += 1;
        newest = newest.max(Some(post.created_at));
      }
    }
  }

  let updated = Discussion {
    updated_at: newest.unwrap_or(discussion.updated_at),
    tweet_count: count,
    read: if count > discussion.tweet_count {
      ReadState::Unread
    } else {
      discussion.read
    },
    ..discussion.clone()
  };
  if updated != discussion {
    discussion = updated;
    tx.put_discussion(&discussion)?;
  }
  Ok(())
}
