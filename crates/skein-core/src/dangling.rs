//! Re-scanning posts with dangling references.
//!
//! Dangling bits are set once, when a post is built from its raw record.
//! This resolver only ever clears them, one per reference whose target has
//! since become available locally.

use std::collections::BTreeSet;

use tracing::error;

use crate::{
  Result,
  model::{PostId, Relevance},
  store::{Reader, WriteTxn},
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RescanReport {
  /// Bits cleared during this rescan.
  pub cleared:        usize,
  /// Targets that are still missing.
  pub still_dangling: BTreeSet<PostId>,
}

/// Clear every dangling bit whose referenced post is now known.
///
/// A resolved reference from a followed author's post raises the target to
/// at least [`Relevance::Referenced`].
pub fn rescan_dangling(tx: &mut WriteTxn<'_>) -> Result<RescanReport> {
  let mut report = RescanReport::default();

  for stale in tx.dangling_posts()? {
    // Re-read: an earlier iteration may have raised this post's relevance.
    let Some(mut post) = tx.get_post(&stale.id)? else {
      continue;
    };
    if let Some(kind) = post.dangling.iter().find(|k| post.reference(*k).is_none()) {
      error!(
        defect = "dangling_without_reference",
        post = %post.id,
        ?kind,
        "dangling bit set for an absent reference; skipping post",
      );
      continue;
    }

    let before = post.dangling;
    for kind in before.iter() {
      let Some(target_id) = post.reference(kind).cloned() else {
        continue;
      };
      match tx.get_post(&target_id)? {
        Some(mut target) => {
          post.dangling.remove(kind);
          report.cleared += 1;
          if post.relevance == Relevance::Followed && target.relevance < Relevance::Referenced {
            target.relevance = Relevance::Referenced;
            tx.put_post(&target)?;
          }
        }
        None => {
          report.still_dangling.insert(target_id);
        }
      }
    }

    if post.dangling != before {
      tx.put_post(&post)?;
    }
  }

  Ok(report)
}
