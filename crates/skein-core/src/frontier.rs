//! The fetch frontier: how far back, per author and globally, posts have
//! been fetched, and which ranges still need fetching.
//!
//! The global window is the union of every home-timeline fetch. Each
//! followed author has a user window covering their user-timeline fetches.
//! `catch_up` asks for the part of the global window an author's window does
//! not cover yet; only the user-timeline path deepens coverage, since it
//! reaches further into the past than the home timeline.

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, warn};

use crate::{
  Result,
  model::{Post, UserId},
  plan::FetchRequest,
  store::{Reader, WriteTxn},
  window::DateWindow,
};

/// How far the global start moves back per widening event.
pub fn widening_step() -> TimeDelta { TimeDelta::days(1) }

/// The global window, or a zero-width window at `now` if nothing has been
/// fetched yet.
pub fn global_or_empty<R: Reader + ?Sized>(reader: &R, now: DateTime<Utc>) -> Result<DateWindow> {
  Ok(reader.global_window()?.unwrap_or_else(|| DateWindow::zero_at(now)))
}

/// Union the creation-time span of `posts` into the global window.
///
/// Only the end moves forward here. Once a global window exists its start
/// moves back solely through [`widen_global`], so the part of the span older
/// than the current start is left out.
///
/// A span that neither overlaps nor touches the prior window means a part
/// of the home timeline was skipped; that is logged and the hull kept.
pub fn expand_global(
  tx: &mut WriteTxn<'_>,
  posts: &[Post],
  now: DateTime<Utc>,
) -> Result<Option<DateWindow>> {
  let Some(mut span) = DateWindow::spanning(posts.iter().map(|p| p.created_at)) else {
    return Ok(None);
  };
  let stored = tx.global_window()?;
  if let Some(prior) = stored {
    if span.end() <= prior.start() {
      return Ok(Some(prior));
    }
    if span.start() < prior.start() {
      span = DateWindow::between(prior.start(), span.end())?;
    }
  }
  let prior = stored.unwrap_or_else(|| DateWindow::zero_at(now));
  if !prior.is_zero_width() && prior.is_disjoint(&span) {
    warn!(?prior, ?span, "home timeline gap skipped; global window bridged");
  }
  let next = prior.hull(&span);
  if stored != Some(next) {
    tx.put_global_window(next)?;
  }
  Ok(Some(next))
}

/// Union a fetched home-timeline range into the global window.
pub fn record_home(tx: &mut WriteTxn<'_>, window: DateWindow, now: DateTime<Utc>) -> Result<DateWindow> {
  let next = global_or_empty(tx, now)?.union(&window);
  tx.put_global_window(next)?;
  Ok(next)
}

/// Push the global start back by one step if any post predates it by more
/// than that step.
///
/// The start never jumps straight to an old post's timestamp. Returns the widened window when it moved. Nothing happens before the
/// first home fetch has created a global window.
pub fn widen_global(tx: &mut WriteTxn<'_>, posts: &[Post]) -> Result<Option<DateWindow>> {
  let Some(oldest) = posts.iter().map(|p| p.created_at).min() else {
    return Ok(None);
  };
  let Some(global) = tx.global_window()? else {
    return Ok(None);
  };
  if oldest >= global.start() - widening_step() {
    return Ok(None);
  }
  let widened = global.extended_back(widening_step());
  debug!(?oldest, from = ?global.start(), to = ?widened.start(), "widening global window");
  tx.put_global_window(widened)?;
  Ok(Some(widened))
}

/// The parts of the global window `author` has not fetched yet, as
/// user-timeline requests.
pub fn catch_up<R: Reader + ?Sized>(
  reader: &R,
  author: &UserId,
  now: DateTime<Utc>,
) -> Result<Vec<FetchRequest>> {
  let global = global_or_empty(reader, now)?;
  let user = reader.user_window(author)?.unwrap_or_else(|| DateWindow::zero_at(now));
  let (earlier, later) = global.subtracting(&user);
  Ok(
    earlier
      .into_iter()
      .chain(later)
      .map(|window| FetchRequest::Timeline { author: author.clone(), window })
      .collect(),
  )
}

/// Forget an author's coverage: zero-width at `now`.
pub fn reset_user(tx: &mut WriteTxn<'_>, author: &UserId, now: DateTime<Utc>) -> Result<()> {
  tx.put_user_window(author, DateWindow::zero_at(now))
}

/// Record that `window` of `author`'s timeline has been fetched, whether or
/// not it held any posts.
pub fn record_timeline(
  tx: &mut WriteTxn<'_>,
  author: &UserId,
  window: DateWindow,
  now: DateTime<Utc>,
) -> Result<DateWindow> {
  let prior = tx.user_window(author)?.unwrap_or_else(|| DateWindow::zero_at(now));
  let next = prior.union(&window);
  tx.put_user_window(author, next)?;
  Ok(next)
}
