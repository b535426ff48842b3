//! `DateWindow`: a closed time interval used to track fetch coverage.
//!
//! Windows are values: every operation returns a fresh window. The only
//! in-place transform is [`DateWindow::cap`], which replaces `self` with its
//! capped form.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
  #[error("window would end ({end}) before it starts ({start})")]
  Inverted {
    start: DateTime<Utc>,
    end:   DateTime<Utc>,
  },

  #[error("negative window duration: {0} seconds")]
  NegativeDuration(i64),

  #[error("timestamp out of range: {0}")]
  OutOfRange(i64),
}

// ─── DateWindow ──────────────────────────────────────────────────────────────

/// The interval `[start, start + duration]`. `duration` is never negative.
///
/// A zero-width window anchored at "now" means nothing has been fetched yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "WindowRecord", into = "WindowRecord")]
pub struct DateWindow {
  start:    DateTime<Utc>,
  duration: TimeDelta,
}

impl DateWindow {
  pub fn new(start: DateTime<Utc>, duration: TimeDelta) -> Result<Self, WindowError> {
    if duration < TimeDelta::zero() {
      return Err(WindowError::NegativeDuration(duration.num_seconds()));
    }
    Ok(Self { start, duration })
  }

  pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, WindowError> {
    if end < start {
      return Err(WindowError::Inverted { start, end });
    }
    Ok(Self { start, duration: end - start })
  }

  /// A zero-width window at `instant`.
  pub fn zero_at(instant: DateTime<Utc>) -> Self {
    Self { start: instant, duration: TimeDelta::zero() }
  }

  /// The smallest window containing every instant, or `None` when empty.
  pub fn spanning<I>(instants: I) -> Option<Self>
  where
    I: IntoIterator<Item = DateTime<Utc>>,
  {
    let mut iter = instants.into_iter();
    let first = iter.next()?;
    let (lo, hi) = iter.fold((first, first), |(lo, hi), t| (lo.min(t), hi.max(t)));
    Some(Self { start: lo, duration: hi - lo })
  }

  pub fn start(&self) -> DateTime<Utc> { self.start }

  pub fn end(&self) -> DateTime<Utc> { self.start + self.duration }

  pub fn duration(&self) -> TimeDelta { self.duration }

  pub fn is_zero_width(&self) -> bool { self.duration.is_zero() }

  pub fn contains(&self, instant: DateTime<Utc>) -> bool {
    self.start <= instant && instant <= self.end()
  }

  /// True when `other` lies entirely inside `self`.
  pub fn covers(&self, other: &DateWindow) -> bool {
    self.start <= other.start && other.end() <= self.end()
  }

  /// Strict overlap: `other.end > self.start && self.end > other.start`.
  pub fn overlaps(&self, other: &DateWindow) -> bool {
    other.end() > self.start && self.end() > other.start
  }

  /// True when neither window overlaps nor touches the other.
  pub fn is_disjoint(&self, other: &DateWindow) -> bool {
    other.start > self.end() || self.start > other.end()
  }

  /// Convex hull of both windows, without any anomaly logging.
  pub fn hull(&self, other: &DateWindow) -> Self {
    let start = self.start.min(other.start);
    let end = self.end().max(other.end());
    Self { start, duration: end - start }
  }

  /// Convex hull of both windows. Joining two non-empty windows with a gap
  /// between them is logged, since it usually means a range was skipped.
  pub fn union(&self, other: &DateWindow) -> Self {
    if !self.is_zero_width() && !other.is_zero_width() && self.is_disjoint(other) {
      tracing::warn!(
        a = ?self,
        b = ?other,
        "union of disjoint date windows; using convex hull",
      );
    }
    self.hull(other)
  }

  /// The parts of `self` not covered by `other`: `(earlier, later)`.
  ///
  /// Both parts are clipped to `self` and omitted when empty.
  pub fn subtracting(&self, other: &DateWindow) -> (Option<DateWindow>, Option<DateWindow>) {
    let earlier = (other.start > self.start).then(|| {
      let end = other.start.min(self.end());
      Self { start: self.start, duration: end - self.start }
    });
    let later = (other.end() < self.end()).then(|| {
      let start = other.end().max(self.start);
      Self { start, duration: self.end() - start }
    });
    (
      earlier.filter(|w| !w.is_zero_width()),
      later.filter(|w| !w.is_zero_width()),
    )
  }

  /// Clamp `start` up to `lower` and `end` down to `upper`.
  ///
  /// Fails rather than producing a window that ends before it starts.
  pub fn capped(
    &self,
    lower: Option<DateTime<Utc>>,
    upper: Option<DateTime<Utc>>,
  ) -> Result<Self, WindowError> {
    let start = lower.map_or(self.start, |l| self.start.max(l));
    let end = upper.map_or(self.end(), |u| self.end().min(u));
    Self::between(start, end)
  }

  /// In-place form of [`DateWindow::capped`]. `self` is untouched on error.
  pub fn cap(
    &mut self,
    lower: Option<DateTime<Utc>>,
    upper: Option<DateTime<Utc>>,
  ) -> Result<(), WindowError> {
    *self = self.capped(lower, upper)?;
    Ok(())
  }

  /// Move `start` back by `by`, keeping `end` fixed.
  pub fn extended_back(&self, by: TimeDelta) -> Self {
    let start = self.start - by;
    Self { start, duration: self.end() - start }
  }
}

// ─── Persisted form ──────────────────────────────────────────────────────────

/// `{start: epoch-seconds, duration: seconds}`, the durable representation.
///
/// Second-granular: sub-second parts of a window are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowRecord {
  pub start:    i64,
  pub duration: i64,
}

impl From<DateWindow> for WindowRecord {
  fn from(w: DateWindow) -> Self {
    Self { start: w.start.timestamp(), duration: w.duration.num_seconds() }
  }
}

impl TryFrom<WindowRecord> for DateWindow {
  type Error = WindowError;

  fn try_from(r: WindowRecord) -> Result<Self, Self::Error> {
    let start =
      DateTime::from_timestamp(r.start, 0).ok_or(WindowError::OutOfRange(r.start))?;
    let duration =
      TimeDelta::try_seconds(r.duration).ok_or(WindowError::OutOfRange(r.duration))?;
    DateWindow::new(start, duration)
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
