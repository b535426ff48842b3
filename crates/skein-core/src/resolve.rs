//! Cross-conversation resolution: attaching unlinked conversations to
//! discussions.
//!
//! Each sweep is a greedy one-step relaxation over the conversations that
//! have no discussion yet. It touches each of them at most once and reports
//! the post IDs that must be fetched before it can make further progress.
//! Convergence comes from repeated sweeps as fetched data arrives.

use std::collections::BTreeSet;

use tracing::{debug, error};

use crate::{
  Result,
  linker::{attach, discussion_of},
  model::{Discussion, PostId},
  store::{Reader, WriteTxn},
};

/// The outcome of one or more sweeps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sweep {
  /// Posts that must be fetched for unresolved conversations to progress.
  pub needed:   BTreeSet<PostId>,
  /// Conversations attached to an existing discussion.
  pub attached: usize,
  /// Discussions created.
  pub created:  usize,
}

impl Sweep {
  pub fn made_progress(&self) -> bool { self.attached + self.created > 0 }
}

/// One sweep over every unlinked conversation.
pub fn resolve_unlinked(tx: &mut WriteTxn<'_>) -> Result<Sweep> {
  let mut sweep = Sweep::default();

  for stale in tx.unlinked_conversations()? {
    // An earlier step of this sweep may have saved it again.
    let Some(mut conv) = tx.get_conversation(&stale.id)? else {
      continue;
    };
    if conv.discussion.is_some() {
      continue;
    }

    if let Some(upstream) = conv.upstream.clone()
      && let Some(discussion_id) = discussion_of(tx, &upstream)?
    {
      if attach(tx, conv, &discussion_id)? {
        sweep.attached += 1;
      }
      continue;
    }

    if conv.root.is_none() && tx.has_post(&conv.id)? {
      conv.root = Some(conv.id.clone());
      tx.put_conversation(&conv)?;
    }

    let Some(root_id) = conv.root.clone() else {
      sweep.needed.insert(conv.id.clone());
      continue;
    };
    let Some(root) = tx.get_post(&root_id)? else {
      sweep.needed.insert(root_id);
      continue;
    };

    let Some((_, target_id)) = root.primary_reference() else {
      conv.upstream = Some(conv.id.clone());
      let discussion_id = conv.id.clone();
      if tx.get_discussion(&discussion_id)?.is_none() {
        tx.put_discussion(&Discussion::new(discussion_id.clone(), root.created_at))?;
        sweep.created += 1;
        debug!(discussion = %discussion_id, "new discussion");
      }
      attach(tx, conv, &discussion_id)?;
      continue;
    };

    let Some(target) = tx.get_post(target_id)? else {
      sweep.needed.insert(target_id.clone());
      continue;
    };

    let upstream = target.conversation_id;
    if upstream == conv.id {
      error!(
        defect = "upstream_cycle",
        conversation = %conv.id,
        root = %root.id,
        "root post references its own conversation; skipping",
      );
      continue;
    }

    conv.upstream = Some(upstream.clone());
    match discussion_of(tx, &upstream)? {
      Some(discussion_id) => {
        if attach(tx, conv, &discussion_id)? {
          sweep.attached += 1;
        }
      }
      None => {
        tx.put_conversation(&conv)?;
        sweep.needed.insert(upstream);
      }
    }
  }

  Ok(sweep)
}

/// Sweep until a sweep makes no progress.
///
/// The returned `needed` set comes from the final sweep, minus posts that are
/// already present locally; `attached` and `created` are totals.
pub fn resolve_until_stable(tx: &mut WriteTxn<'_>) -> Result<Sweep> {
  let bound = tx.unlinked_conversations()?.len() + 1;
  let mut total = Sweep::default();

  for _ in 0..bound {
    let sweep = resolve_unlinked(tx)?;
    total.attached += sweep.attached;
    total.created += sweep.created;
    let progressed = sweep.made_progress();
    total.needed = sweep.needed;
    if !progressed {
      break;
    }
  }

  let mut needed = BTreeSet::new();
  for id in std::mem::take(&mut total.needed) {
    if !tx.has_post(&id)? {
      needed.insert(id);
    }
  }
  total.needed = needed;
  Ok(total)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    linker::link,
    memory::MemoryStore,
    model::ConversationId,
    store::{Store as _, transact},
    testing::post,
  };

  async fn seed(store: &MemoryStore, posts: Vec<crate::model::Post>) {
    transact(store, move |tx| {
      for p in &posts {
        tx.put_post(p)?;
        link(tx, p)?;
      }
      Ok(())
    })
    .await
    .unwrap();
  }

  async fn conv(store: &MemoryStore, id: &str) -> crate::model::Conversation {
    let id = ConversationId::from(id);
    store.read(move |r| r.get_conversation(&id)).await.unwrap().unwrap()
  }

  #[tokio::test]
  async fn missing_root_is_needed() {
    let store = MemoryStore::new();
    // A reply whose conversation root has not been fetched.
    seed(&store, vec![post("101", "100", Some("100"))]).await;
    let sweep = transact(&store, |tx| resolve_unlinked(tx)).await.unwrap();
    assert_eq!(sweep.needed, BTreeSet::from(["100".into()]));
    assert!(!sweep.made_progress());
  }

  #[tokio::test]
  async fn origin_root_becomes_a_discussion() {
    let store = MemoryStore::new();
    seed(&store, vec![post("200", "200", None), post("201", "200", Some("200"))]).await;
    let sweep = transact(&store, |tx| resolve_unlinked(tx)).await.unwrap();
    assert_eq!(sweep.created, 1);

    let c = conv(&store, "200").await;
    assert_eq!(c.root, Some("200".into()));
    assert!(c.is_origin());
    assert_eq!(c.discussion, Some("200".into()));
    let disc = store
      .read(|r| r.get_discussion(&"200".into()))
      .await
      .unwrap()
      .unwrap();
    assert_eq!(disc.tweet_count, 2);
  }

  #[tokio::test]
  async fn missing_reference_target_is_needed() {
    let store = MemoryStore::new();
    // Root of conversation 300 quotes 299, which is unknown.
    let mut root = post("300", "300", None);
    root.quoting = Some("299".into());
    seed(&store, vec![root]).await;
    let sweep = transact(&store, |tx| resolve_unlinked(tx)).await.unwrap();
    assert_eq!(sweep.needed, BTreeSet::from(["299".into()]));
  }

  #[tokio::test]
  async fn unresolved_upstream_asks_for_its_root() {
    let store = MemoryStore::new();
    // 4010 roots its own conversation and replies to 4001, which sits in
    // conversation 400 whose root is not local.
    seed(&store, vec![
      post("4001", "400", Some("400")),
      post("4010", "4010", Some("4001")),
    ])
    .await;
    // One sweep only: 400 needs its root, 4010 points upstream at 400.
    let sweep = transact(&store, |tx| resolve_unlinked(tx)).await.unwrap();
    assert!(sweep.needed.contains(&PostId::from("400")));
    assert_eq!(conv(&store, "4010").await.upstream, Some("400".into()));
  }

  #[tokio::test]
  async fn repeated_sweeps_attach_chains_in_any_order() {
    let store = MemoryStore::new();
    // 500 <- 60 <- 7, each in its own conversation. IDs sort leaf first,
    // so the first sweep only creates the discussion at 500.
    seed(&store, vec![
      post("7", "7", Some("60")),
      post("60", "60", Some("500")),
      post("500", "500", None),
    ])
    .await;
    let total = transact(&store, |tx| resolve_until_stable(tx)).await.unwrap();
    assert_eq!(total.created, 1);
    assert_eq!(total.attached, 2);
    assert!(total.needed.is_empty());

    for id in ["7", "60", "500"] {
      assert_eq!(conv(&store, id).await.discussion, Some("500".into()));
    }
  }
}
