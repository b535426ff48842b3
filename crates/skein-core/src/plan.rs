//! Fetch requests and the de-duplicating queue that holds them.
//!
//! The engine never performs network calls while deciding what to fetch.
//! It records requests here; a caller drains the queue and hands each
//! request to a [`FetchService`](crate::fetch::FetchService).

use std::collections::{BTreeSet, HashSet, VecDeque};

use chrono::{DateTime, Utc};

use crate::{
  model::{PostId, UserId},
  window::DateWindow,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchRequest {
  Posts(BTreeSet<PostId>),
  Users(BTreeSet<UserId>),
  Timeline { author: UserId, window: DateWindow },
  Home { since: Option<DateTime<Utc>> },
}

/// Pending requests in FIFO order.
///
/// An ID is queued at most once per process: IDs already handed out stay
/// remembered, so a post the service never returns is not requested again
/// until [`FetchQueue::forget_posts`] is called.
#[derive(Debug)]
pub struct FetchQueue {
  pending:    VecDeque<FetchRequest>,
  seen_posts: HashSet<PostId>,
  seen_users: HashSet<UserId>,
  max_ids:    usize,
}

impl FetchQueue {
  pub fn new(max_ids: usize) -> Self {
    Self {
      pending: VecDeque::new(),
      seen_posts: HashSet::new(),
      seen_users: HashSet::new(),
      max_ids: max_ids.max(1),
    }
  }

  /// Queue post lookups for IDs not seen before. Returns how many were new.
  pub fn push_posts(&mut self, ids: impl IntoIterator<Item = PostId>) -> usize {
    let fresh: Vec<PostId> =
      ids.into_iter().filter(|id| self.seen_posts.insert(id.clone())).collect();
    for chunk in fresh.chunks(self.max_ids) {
      self.pending.push_back(FetchRequest::Posts(chunk.iter().cloned().collect()));
    }
    fresh.len()
  }

  /// Queue user lookups for IDs not seen before. Returns how many were new.
  pub fn push_users(&mut self, ids: impl IntoIterator<Item = UserId>) -> usize {
    let fresh: Vec<UserId> =
      ids.into_iter().filter(|id| self.seen_users.insert(id.clone())).collect();
    for chunk in fresh.chunks(self.max_ids) {
      self.pending.push_back(FetchRequest::Users(chunk.iter().cloned().collect()));
    }
    fresh.len()
  }

  /// Queue a timeline or home request unless an identical one is pending.
  pub fn push(&mut self, request: FetchRequest) -> bool {
    match request {
      FetchRequest::Posts(ids) => self.push_posts(ids) > 0,
      FetchRequest::Users(ids) => self.push_users(ids) > 0,
      other => {
        if self.pending.contains(&other) {
          return false;
        }
        self.pending.push_back(other);
        true
      }
    }
  }

  pub fn pop(&mut self) -> Option<FetchRequest> { self.pending.pop_front() }

  /// Allow these IDs to be queued again, e.g. after a failed fetch.
  pub fn forget_posts<'a>(&mut self, ids: impl IntoIterator<Item = &'a PostId>) {
    for id in ids {
      self.seen_posts.remove(id);
    }
  }

  pub fn forget_users<'a>(&mut self, ids: impl IntoIterator<Item = &'a UserId>) {
    for id in ids {
      self.seen_users.remove(id);
    }
  }

  /// A snapshot of everything waiting to be fetched.
  pub fn pending(&self) -> Vec<FetchRequest> { self.pending.iter().cloned().collect() }

  pub fn len(&self) -> usize { self.pending.len() }

  pub fn is_empty(&self) -> bool { self.pending.is_empty() }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn ids(raw: &[&str]) -> Vec<PostId> { raw.iter().map(|s| PostId::from(*s)).collect() }

  #[test]
  fn never_queues_an_id_twice() {
    let mut q = FetchQueue::new(100);
    assert_eq!(q.push_posts(ids(&["1", "2"])), 2);
    assert_eq!(q.push_posts(ids(&["2", "3"])), 1);
    assert_eq!(q.len(), 2);

    // Still remembered after being handed out.
    q.pop();
    q.pop();
    assert_eq!(q.push_posts(ids(&["1", "3"])), 0);
    assert!(q.is_empty());
  }

  #[test]
  fn forgotten_ids_can_be_queued_again() {
    let mut q = FetchQueue::new(100);
    q.push_posts(ids(&["7"]));
    q.pop();
    q.forget_posts(&ids(&["7"]));
    assert_eq!(q.push_posts(ids(&["7"])), 1);
  }

  #[test]
  fn chunks_large_lookups() {
    let mut q = FetchQueue::new(2);
    q.push_posts(ids(&["1", "2", "3", "4", "5"]));
    let sizes: Vec<usize> = q
      .pending()
      .into_iter()
      .map(|r| match r {
        FetchRequest::Posts(set) => set.len(),
        other => panic!("unexpected {other:?}"),
      })
      .collect();
    assert_eq!(sizes, [2, 2, 1]);
  }

  #[test]
  fn identical_timeline_requests_collapse() {
    let mut q = FetchQueue::new(10);
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let window = DateWindow::between(start, start + chrono::TimeDelta::hours(4)).unwrap();
    let req = FetchRequest::Timeline { author: "u1".into(), window };
    assert!(q.push(req.clone()));
    assert!(!q.push(req));
    assert_eq!(q.len(), 1);
  }
}
