//! The ingestion engine: one write transaction per fetched batch, and a
//! fetch queue drained outside of any transaction.

use std::{
  collections::{BTreeSet, HashSet},
  sync::Arc,
};

use chrono::{DateTime, Timelike as _, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
  Error, Result,
  dangling::rescan_dangling,
  fetch::{FetchService, RawPost, RawUser},
  frontier,
  linker::{Linked, link},
  model::{DiscussionId, Post, PostId, ReadState, ReferenceKind, Relevance, User, UserId},
  plan::{FetchQueue, FetchRequest},
  relevance,
  resolve::resolve_until_stable,
  store::{Reader, Store, WriteTxn, transact},
  window::DateWindow,
};

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
  /// Largest ID set sent in one lookup request.
  pub max_ids_per_request:  usize,
  /// Upper bound on requests issued by one [`Engine::run_pending`] call.
  pub max_requests_per_run: usize,
}

impl Default for EngineConfig {
  fn default() -> Self { Self { max_ids_per_request: 100, max_requests_per_run: 500 } }
}

// ─── Batches and reports ─────────────────────────────────────────────────────

/// Where a batch of raw posts came from; decides which window it widens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
  /// The reader's home timeline. `window`, when known, is the range the
  /// fetch covered.
  Home { window: Option<DateWindow> },
  /// One author's timeline over `window`.
  UserTimeline { author: UserId, window: DateWindow },
  /// Posts or users looked up by ID.
  Lookup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestBatch {
  pub source: Source,
  pub posts:  Vec<RawPost>,
  pub users:  Vec<RawUser>,
}

impl IngestBatch {
  pub fn home(posts: Vec<RawPost>) -> Self {
    Self { source: Source::Home { window: None }, posts, users: Vec::new() }
  }

  pub fn timeline(author: UserId, window: DateWindow, posts: Vec<RawPost>) -> Self {
    Self { source: Source::UserTimeline { author, window }, posts, users: Vec::new() }
  }

  pub fn lookup(posts: Vec<RawPost>) -> Self {
    Self { source: Source::Lookup, posts, users: Vec::new() }
  }

  pub fn users(users: Vec<RawUser>) -> Self {
    Self { source: Source::Lookup, posts: Vec::new(), users }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
  pub inserted:            usize,
  /// Posts already present, or repeated within the batch.
  pub duplicates:          usize,
  pub discussions_created: usize,
  pub attached:            usize,
  pub bits_cleared:        usize,
  /// Posts that must be fetched to make further progress.
  pub missing_posts:       BTreeSet<PostId>,
  /// Authors with no fetched user record.
  pub unknown_users:       BTreeSet<UserId>,
  /// The global window start moved back.
  pub widened:             bool,
}

/// Per-author outcome of [`Engine::on_follow`] / [`Engine::on_unfollow`].
#[derive(Debug, Default)]
pub struct FollowReport {
  /// Authors processed, with the number of posts whose tier changed.
  pub succeeded: Vec<(UserId, usize)>,
  pub failed:    Vec<(UserId, Error)>,
}

#[derive(Debug, Default)]
pub struct SyncReport {
  pub requests:            usize,
  pub inserted:            usize,
  pub discussions_created: usize,
  pub failures:            Vec<(FetchRequest, Error)>,
}

impl SyncReport {
  fn absorb(&mut self, ingest: &IngestReport) {
    self.inserted += ingest.inserted;
    self.discussions_created += ingest.discussions_created;
  }
}

// ─── Engine ──────────────────────────────────────────────────────────────────

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Drives ingestion against a [`Store`] and keeps the fetch queue.
///
/// The engine never spawns work of its own. Operations that discover
/// something to fetch only queue it; callers drain the queue with
/// [`Engine::run_pending`] whenever suits them.
pub struct Engine<S> {
  store:  S,
  queue:  Mutex<FetchQueue>,
  config: EngineConfig,
  clock:  Clock,
}

impl<S: Store> Engine<S> {
  pub fn new(store: S, config: EngineConfig) -> Self {
    Self {
      store,
      queue: Mutex::new(FetchQueue::new(config.max_ids_per_request)),
      config,
      clock: Arc::new(Utc::now),
    }
  }

  /// Replace the wall clock, e.g. with a fixed instant in tests.
  pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
    self.clock = Arc::new(clock);
    self
  }

  pub fn store(&self) -> &S { &self.store }

  /// Give the store back, dropping the queue.
  pub fn into_store(self) -> S { self.store }

  /// The clock, truncated to whole seconds so windows survive persistence
  /// unchanged.
  fn now(&self) -> DateTime<Utc> {
    let now = (self.clock)();
    now.with_nanosecond(0).unwrap_or(now)
  }

  /// What should be fetched now, in order.
  pub fn pending(&self) -> Vec<FetchRequest> { self.queue.lock().pending() }

  // ── Ingestion ─────────────────────────────────────────────────────────────

  /// Ingest one fetched batch in a single write transaction.
  pub async fn ingest(&self, batch: IngestBatch) -> Result<IngestReport> {
    let now = self.now();
    let count = batch.posts.len();
    let report = transact(&self.store, move |tx| ingest_in(tx, batch, now)).await?;
    debug!(
      posts = count,
      inserted = report.inserted,
      missing = report.missing_posts.len(),
      "ingested batch",
    );

    {
      let mut queue = self.queue.lock();
      queue.push_posts(report.missing_posts.iter().cloned());
      queue.push_users(report.unknown_users.iter().cloned());
    }
    if report.widened {
      self.catch_up_all().await?;
    }
    Ok(report)
  }

  // ── Frontier ──────────────────────────────────────────────────────────────

  /// Queue the user-timeline ranges `author` is missing. Returns how many
  /// requests were queued.
  pub async fn catch_up(&self, author: &UserId) -> Result<usize> {
    let now = self.now();
    let a = author.clone();
    let requests = self.store.read(move |r| frontier::catch_up(r, &a, now)).await?;
    Ok(self.enqueue(requests))
  }

  /// [`Engine::catch_up`] for every followed author.
  pub async fn catch_up_all(&self) -> Result<usize> {
    let now = self.now();
    let requests = self
      .store
      .read(move |r| {
        let mut all = Vec::new();
        for user in r.followed_users()? {
          all.extend(frontier::catch_up(r, &user.id, now)?);
        }
        Ok(all)
      })
      .await?;
    Ok(self.enqueue(requests))
  }

  /// Rebuild the fetch queue from stored state: re-run resolution and the
  /// dangling rescan, queue whatever they still need, then catch up every
  /// followed author. Returns how many requests were queued.
  ///
  /// The queue lives in memory only, so a fresh process calls this before
  /// its first [`Engine::run_pending`].
  pub async fn replan(&self) -> Result<usize> {
    let needed = transact(&self.store, |tx| {
      let mut needed = resolve_until_stable(tx)?.needed;
      needed.extend(rescan_dangling(tx)?.still_dangling);
      Ok(needed)
    })
    .await?;
    let queued = {
      let mut queue = self.queue.lock();
      let before = queue.len();
      queue.push_posts(needed);
      queue.len() - before
    };
    Ok(queued + self.catch_up_all().await?)
  }

  fn enqueue(&self, requests: Vec<FetchRequest>) -> usize {
    let mut queue = self.queue.lock();
    requests.into_iter().filter(|r| queue.push(r.clone())).count()
  }

  // ── Follow state ──────────────────────────────────────────────────────────

  /// Follow each author in its own transaction, then queue the catch-up
  /// fetches. One author failing does not stop the others.
  pub async fn on_follow(&self, ids: Vec<UserId>) -> FollowReport {
    let mut report = FollowReport::default();
    for id in ids {
      let now = self.now();
      let author = id.clone();
      match transact(&self.store, move |tx| relevance::follow(tx, &author, now)).await {
        Ok(changed) => report.succeeded.push((id, changed)),
        Err(err) => {
          warn!(author = %id, %err, "follow failed");
          report.failed.push((id, err));
        }
      }
    }

    for (id, _) in &report.succeeded {
      if let Err(err) = self.catch_up(id).await {
        warn!(author = %id, %err, "could not plan catch-up");
      }
    }
    let followed: Vec<UserId> = report.succeeded.iter().map(|(id, _)| id.clone()).collect();
    match self.store.read(move |r| placeholders(r, followed)).await {
      Ok(unknown) => {
        self.queue.lock().push_users(unknown);
      }
      Err(err) => warn!(%err, "could not look up followed users"),
    }
    report
  }

  /// Unfollow each author in its own transaction. No fetch is queued.
  pub async fn on_unfollow(&self, ids: Vec<UserId>) -> FollowReport {
    let mut report = FollowReport::default();
    for id in ids {
      let author = id.clone();
      match transact(&self.store, move |tx| relevance::unfollow(tx, &author)).await {
        Ok(changed) => report.succeeded.push((id, changed)),
        Err(err) => {
          warn!(author = %id, %err, "unfollow failed");
          report.failed.push((id, err));
        }
      }
    }
    report
  }

  // ── Presentation hooks ────────────────────────────────────────────────────

  pub async fn mark_read(&self, id: DiscussionId) -> Result<()> {
    transact(&self.store, move |tx| {
      let mut discussion =
        tx.get_discussion(&id)?.ok_or_else(|| Error::DiscussionNotFound(id.clone()))?;
      if discussion.read != ReadState::Read {
        discussion.read = ReadState::Read;
        tx.put_discussion(&discussion)?;
      }
      Ok(())
    })
    .await
  }

  // ── Fetching ──────────────────────────────────────────────────────────────

  /// Drain the fetch queue through `fetcher`.
  ///
  /// Network calls happen here, outside any write transaction; each result
  /// is ingested in its own transaction. A failed request is logged and
  /// recorded, and the rest carry on.
  pub async fn run_pending<F: FetchService>(&self, fetcher: &F) -> SyncReport {
    let mut report = SyncReport::default();
    while report.requests < self.config.max_requests_per_run {
      let Some(request) = self.queue.lock().pop() else {
        break;
      };
      report.requests += 1;
      match self.execute(fetcher, request.clone()).await {
        Ok(ingest) => report.absorb(&ingest),
        Err(err) => {
          warn!(?request, %err, "fetch request failed");
          self.release(&request);
          report.failures.push((request, err));
        }
      }
    }
    info!(
      requests = report.requests,
      inserted = report.inserted,
      failures = report.failures.len(),
      "fetch round finished",
    );
    report
  }

  /// Fetch the home timeline newer than the global window, then drain the
  /// queue.
  pub async fn sync_home<F: FetchService>(&self, fetcher: &F) -> Result<SyncReport> {
    let since = self.store.read(|r| Ok(r.global_window()?.map(|w| w.end()))).await?;
    self.queue.lock().push(FetchRequest::Home { since });
    Ok(self.run_pending(fetcher).await)
  }

  async fn execute<F: FetchService>(&self, fetcher: &F, request: FetchRequest) -> Result<IngestReport> {
    let batch = match request {
      FetchRequest::Posts(ids) => IngestBatch::lookup(fetcher.fetch_posts_by_id(ids).await?),
      FetchRequest::Users(ids) => IngestBatch::users(fetcher.fetch_users_by_id(ids).await?),
      FetchRequest::Timeline { author, window } => {
        let posts = fetcher.fetch_timeline(author.clone(), window).await?;
        IngestBatch::timeline(author, window, posts)
      }
      FetchRequest::Home { since } => IngestBatch::home(fetcher.fetch_home_timeline(since).await?),
    };
    self.ingest(batch).await
  }

  /// Let the IDs of a failed request be queued again later.
  fn release(&self, request: &FetchRequest) {
    let mut queue = self.queue.lock();
    match request {
      FetchRequest::Posts(ids) => queue.forget_posts(ids),
      FetchRequest::Users(ids) => queue.forget_users(ids),
      FetchRequest::Timeline { .. } | FetchRequest::Home { .. } => {}
    }
  }
}

// ─── Transaction bodies ──────────────────────────────────────────────────────

fn ingest_in(tx: &mut WriteTxn<'_>, batch: IngestBatch, now: DateTime<Utc>) -> Result<IngestReport> {
  let mut report = IngestReport::default();

  for raw in &batch.users {
    let mut user = tx.get_user(&raw.id)?.unwrap_or_else(|| User::placeholder(raw.id.clone()));
    let handle = Some(raw.handle.clone());
    let name = Some(raw.name.clone());
    if user.handle != handle || user.name != name {
      user.handle = handle;
      user.name = name;
      tx.put_user(&user)?;
    }
  }

  let mut seen = HashSet::new();
  let mut fetched: Vec<Post> = Vec::with_capacity(batch.posts.len());
  let mut fresh: Vec<Post> = Vec::new();
  for raw in batch.posts {
    if !seen.insert(raw.id.clone()) {
      report.duplicates += 1;
      continue;
    }
    if let Some(existing) = tx.get_post(&raw.id)? {
      report.duplicates += 1;
      fetched.push(existing);
      continue;
    }
    let post = build_post(tx, raw)?;
    tx.put_post(&post)?;
    if tx.get_user(&post.author_id)?.is_none_or(|u| u.is_placeholder()) {
      report.unknown_users.insert(post.author_id.clone());
    }
    fresh.push(post);
  }

  // Every new post joins its conversation before anything resolves.
  for post in &fresh {
    if link(tx, post)? == Linked::Inserted {
      report.inserted += 1;
    }
  }

  fetched.extend(fresh);
  let prior_start = tx.global_window()?.map(|w| w.start());
  match &batch.source {
    Source::Home { window } => {
      frontier::expand_global(tx, &fetched, now)?;
      if let Some(window) = window {
        frontier::record_home(tx, *window, now)?;
      }
    }
    Source::UserTimeline { author, window } => {
      frontier::record_timeline(tx, author, *window, now)?;
    }
    Source::Lookup => {}
  }
  frontier::widen_global(tx, &fetched)?;
  let start = tx.global_window()?.map(|w| w.start());
  report.widened = matches!((prior_start, start), (Some(before), Some(after)) if after < before);

  let sweep = resolve_until_stable(tx)?;
  report.discussions_created = sweep.created;
  report.attached = sweep.attached;

  let rescan = rescan_dangling(tx)?;
  report.bits_cleared = rescan.cleared;
  report.missing_posts = sweep.needed;
  report.missing_posts.extend(rescan.still_dangling);
  Ok(report)
}

/// Build a post from its raw record, flagging references whose targets are
/// not known yet. A followed author's reference to a known post raises that
/// post's tier.
fn build_post(tx: &mut WriteTxn<'_>, raw: RawPost) -> Result<Post> {
  let relevance = relevance::initial_relevance(tx, &raw.author_id)?;
  let mut post = Post {
    replying_to: raw.reference(ReferenceKind::Reply).cloned(),
    quoting: raw.reference(ReferenceKind::Quote).cloned(),
    retweeting: raw.reference(ReferenceKind::Retweet).cloned(),
    id: raw.id,
    conversation_id: raw.conversation_id,
    author_id: raw.author_id,
    created_at: raw.created_at,
    text: raw.text,
    dangling: Default::default(),
    relevance,
  };

  let references: Vec<(ReferenceKind, PostId)> =
    post.references().map(|(kind, id)| (kind, id.clone())).collect();
  for (kind, target_id) in references {
    match tx.get_post(&target_id)? {
      None => post.dangling.insert(kind),
      Some(mut target) => {
        if relevance == Relevance::Followed && target.relevance < Relevance::Referenced {
          target.relevance = Relevance::Referenced;
          tx.put_post(&target)?;
        }
      }
    }
  }
  Ok(post)
}

fn placeholders<R: Reader + ?Sized>(reader: &R, ids: Vec<UserId>) -> Result<Vec<UserId>> {
  let mut unknown = Vec::new();
  for id in ids {
    if reader.get_user(&id)?.is_none_or(|u| u.is_placeholder()) {
      unknown.push(id);
    }
  }
  Ok(unknown)
}
