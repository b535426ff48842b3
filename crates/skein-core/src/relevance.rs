//! Relevance tiers and their bulk recompute when follow state changes.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{
  Result,
  frontier,
  model::{Relevance, User, UserId},
  store::{Reader, WriteTxn},
};

/// The tier a new post by `author` starts in.
///
/// [`Relevance::Referenced`] is only ever reached later, when a followed
/// author's reference to the post resolves.
pub fn initial_relevance<R: Reader + ?Sized>(reader: &R, author: &UserId) -> Result<Relevance> {
  let following = reader.get_user(author)?.is_some_and(|u| u.following);
  Ok(if following { Relevance::Followed } else { Relevance::Irrelevant })
}

/// Mark `author` followed, promote their posts, and reset their user
/// window so the next catch-up back-fills the whole global window.
///
/// Returns the number of posts whose tier changed.
pub fn follow(tx: &mut WriteTxn<'_>, author: &UserId, now: DateTime<Utc>) -> Result<usize> {
  let mut user = tx.get_user(author)?.unwrap_or_else(|| User::placeholder(author.clone()));
  user.following = true;
  tx.put_user(&user)?;

  let changed = retier(tx, author, Relevance::Followed)?;
  frontier::reset_user(tx, author, now)?;
  debug!(%author, changed, "followed");
  Ok(changed)
}

/// Mark `author` unfollowed and demote their posts. The user window is left
/// alone.
pub fn unfollow(tx: &mut WriteTxn<'_>, author: &UserId) -> Result<usize> {
  if let Some(mut user) = tx.get_user(author)? {
    user.following = false;
    tx.put_user(&user)?;
  }
  let changed = retier(tx, author, Relevance::Irrelevant)?;
  debug!(%author, changed, "unfollowed");
  Ok(changed)
}

fn retier(tx: &mut WriteTxn<'_>, author: &UserId, tier: Relevance) -> Result<usize> {
  let mut changed = 0;
  for mut post in tx.posts_by_author(author)? {
    if post.relevance != tier {
      post.relevance = tier;
      tx.put_post(&post)?;
      changed += 1;
    }
  }
  Ok(changed)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    memory::MemoryStore,
    store::{Store as _, transact},
    testing::{now, post_by},
  };

  #[tokio::test]
  async fn follow_then_unfollow_ends_irrelevant_and_keeps_reset_window() {
    let store = MemoryStore::new();
    let at = now();
    transact(&store, move |tx| {
      tx.put_post(&post_by("1", "u1"))?;
      tx.put_post(&post_by("2", "u1"))?;
      tx.put_post(&post_by("3", "u2"))?;
      Ok(())
    })
    .await
    .unwrap();

    let promoted = transact(&store, move |tx| follow(tx, &"u1".into(), at)).await.unwrap();
    assert_eq!(promoted, 2);
    transact(&store, |tx| unfollow(tx, &"u1".into())).await.unwrap();

    let (posts, user, window) = store
      .read(|r| {
        let id = UserId::from("u1");
        Ok((r.posts_by_author(&id)?, r.get_user(&id)?, r.user_window(&id)?))
      })
      .await
      .unwrap();
    assert!(posts.iter().all(|p| p.relevance == Relevance::Irrelevant));
    assert!(!user.unwrap().following);
    assert_eq!(window, Some(crate::window::DateWindow::zero_at(at)));
  }

  #[tokio::test]
  async fn new_posts_by_followed_authors_start_followed() {
    let store = MemoryStore::new();
    let at = now();
    transact(&store, move |tx| follow(tx, &"u9".into(), at).map(drop)).await.unwrap();
    let tiers = store
      .read(|r| Ok((initial_relevance(r, &"u9".into())?, initial_relevance(r, &"u0".into())?)))
      .await
      .unwrap();
    assert_eq!(tiers, (Relevance::Followed, Relevance::Irrelevant));
  }
}
