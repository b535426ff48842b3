//! Error types for `skein-core`.

use thiserror::Error;

use crate::{fetch::FetchError, model::PostId, window::WindowError};

#[derive(Debug, Error)]
pub enum Error {
  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("fetch error: {0}")]
  Fetch(#[from] FetchError),

  #[error("invalid date window: {0}")]
  Window(#[from] WindowError),

  #[error("post not found: {0}")]
  PostNotFound(PostId),

  #[error("discussion not found: {0}")]
  DiscussionNotFound(PostId),
}

impl Error {
  /// Wrap a backend-specific error.
  pub fn store(err: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Store(Box::new(err))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
