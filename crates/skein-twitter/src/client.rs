//! Async HTTP client for the Twitter API v2.

use std::{collections::BTreeSet, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use skein_core::{
  fetch::{FetchError, FetchService, RawPost, RawUser},
  model::{PostId, UserId},
  window::DateWindow,
};
use tracing::{debug, warn};

use crate::wire::{Page, TWEET_FIELDS, Tweet, USER_FIELDS, User};

/// Lookup endpoints accept at most this many IDs.
const MAX_LOOKUP_IDS: usize = 100;

/// Connection settings for the API.
#[derive(Debug, Clone)]
pub struct TwitterConfig {
  /// e.g. `https://api.twitter.com/2`
  pub api_base:     String,
  /// OAuth 2.0 user-context access token.
  pub bearer_token: String,
  /// The reader's own user ID, for the home timeline.
  pub me:           UserId,
  /// Upper bound on pages followed for one timeline request.
  pub max_pages:    usize,
}

/// A [`FetchService`] over the Twitter API v2.
///
/// Cheap to clone: the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct TwitterClient {
  client: Client,
  config: TwitterConfig,
}

impl TwitterClient {
  pub fn new(config: TwitterConfig) -> Result<Self, FetchError> {
    let client = Client::builder()
      .timeout(Duration::from_secs(30))
      .user_agent(concat!("skein/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(transport)?;
    Ok(Self { client, config })
  }

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
  }

  async fn get_page<T: DeserializeOwned>(
    &self,
    path: &str,
    query: &[(&str, String)],
  ) -> Result<Page<T>, FetchError> {
    let resp = self
      .client
      .get(self.url(path))
      .bearer_auth(&self.config.bearer_token)
      .query(query)
      .send()
      .await
      .map_err(transport)?;
    let resp = check_status(resp).await?;
    let page: Page<T> = resp.json().await.map_err(|e| FetchError::Decode(e.to_string()))?;
    page.log_problems(path);
    Ok(page)
  }

  /// Follow `next_token` until the last page or `max_pages`.
  async fn get_all_pages(
    &self,
    path: &str,
    query: Vec<(&str, String)>,
  ) -> Result<Vec<RawPost>, FetchError> {
    let mut posts = Vec::new();
    let mut token: Option<String> = None;
    for _ in 0..self.config.max_pages.max(1) {
      let mut q = query.clone();
      if let Some(t) = token.take() {
        q.push(("pagination_token", t));
      }
      let page: Page<Tweet> = self.get_page(path, &q).await?;
      posts.extend(page.data.into_iter().filter_map(Tweet::into_raw));
      match page.meta.and_then(|m| m.next_token) {
        Some(next) => token = Some(next),
        None => return Ok(posts),
      }
    }
    warn!(path, pages = self.config.max_pages, "page limit reached; newer pages kept");
    Ok(posts)
  }

  async fn lookup_posts(&self, ids: &[PostId]) -> Result<Vec<RawPost>, FetchError> {
    let query = [
      ("ids", join_ids(ids.iter().map(PostId::as_str))),
      ("tweet.fields", TWEET_FIELDS.to_owned()),
    ];
    let page: Page<Tweet> = self.get_page("/tweets", &query).await?;
    Ok(page.data.into_iter().filter_map(Tweet::into_raw).collect())
  }

  async fn lookup_users(&self, ids: &[UserId]) -> Result<Vec<RawUser>, FetchError> {
    let query = [
      ("ids", join_ids(ids.iter().map(UserId::as_str))),
      ("user.fields", USER_FIELDS.to_owned()),
    ];
    let page: Page<User> = self.get_page("/users", &query).await?;
    Ok(page.data.into_iter().map(RawUser::from).collect())
  }
}

// ─── FetchService impl ───────────────────────────────────────────────────────

impl FetchService for TwitterClient {
  /// `GET /tweets?ids=…`
  async fn fetch_posts_by_id(&self, ids: BTreeSet<PostId>) -> Result<Vec<RawPost>, FetchError> {
    let ids: Vec<PostId> = ids.into_iter().collect();
    let mut posts = Vec::with_capacity(ids.len());
    for chunk in ids.chunks(MAX_LOOKUP_IDS) {
      posts.extend(self.lookup_posts(chunk).await?);
    }
    debug!(requested = ids.len(), returned = posts.len(), "looked up posts");
    Ok(posts)
  }

  /// `GET /users/:id/tweets?start_time=…&end_time=…`
  async fn fetch_timeline(
    &self,
    author: UserId,
    window: DateWindow,
  ) -> Result<Vec<RawPost>, FetchError> {
    if window.is_zero_width() {
      return Ok(Vec::new());
    }
    let path = format!("/users/{author}/tweets");
    let query = vec![
      ("start_time", api_time(window.start())),
      ("end_time", api_time(window.end())),
      ("max_results", "100".to_owned()),
      ("tweet.fields", TWEET_FIELDS.to_owned()),
    ];
    let posts = self.get_all_pages(&path, query).await?;
    debug!(%author, returned = posts.len(), "fetched user timeline");
    Ok(posts)
  }

  /// `GET /users?ids=…`
  async fn fetch_users_by_id(&self, ids: BTreeSet<UserId>) -> Result<Vec<RawUser>, FetchError> {
    let ids: Vec<UserId> = ids.into_iter().collect();
    let mut users = Vec::with_capacity(ids.len());
    for chunk in ids.chunks(MAX_LOOKUP_IDS) {
      users.extend(self.lookup_users(chunk).await?);
    }
    Ok(users)
  }

  /// `GET /users/:me/timelines/reverse_chronological`
  async fn fetch_home_timeline(
    &self,
    since: Option<DateTime<Utc>>,
  ) -> Result<Vec<RawPost>, FetchError> {
    let path = format!("/users/{}/timelines/reverse_chronological", self.config.me);
    let mut query = vec![
      ("max_results", "100".to_owned()),
      ("tweet.fields", TWEET_FIELDS.to_owned()),
    ];
    if let Some(since) = since {
      query.push(("start_time", api_time(since)));
    }
    let posts = self.get_all_pages(&path, query).await?;
    debug!(returned = posts.len(), "fetched home timeline");
    Ok(posts)
  }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn transport(err: reqwest::Error) -> FetchError { FetchError::Transport(err.to_string()) }

fn join_ids<'a>(ids: impl Iterator<Item = &'a str>) -> String {
  ids.collect::<Vec<_>>().join(",")
}

/// `YYYY-MM-DDTHH:mm:ssZ`, the only form the API accepts.
fn api_time(at: DateTime<Utc>) -> String { at.to_rfc3339_opts(SecondsFormat::Secs, true) }

async fn check_status(resp: Response) -> Result<Response, FetchError> {
  let status = resp.status();
  if status.is_success() {
    return Ok(resp);
  }
  let reset = resp
    .headers()
    .get("x-rate-limit-reset")
    .and_then(|v| v.to_str().ok())
    .map(str::to_owned);
  let body = resp.text().await.unwrap_or_default();
  Err(classify(status, reset.as_deref(), body))
}

/// Map a non-success response onto a [`FetchError`].
fn classify(status: StatusCode, rate_limit_reset: Option<&str>, body: String) -> FetchError {
  match status {
    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchError::Auth(body),
    StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited {
      reset_at: rate_limit_reset
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0)),
    },
    other => FetchError::Status { status: other.as_u16(), body },
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn client(base: &str) -> TwitterClient {
    TwitterClient::new(TwitterConfig {
      api_base:     base.to_owned(),
      bearer_token: "token".to_owned(),
      me:           "1".into(),
      max_pages:    5,
    })
    .unwrap()
  }

  #[test]
  fn statuses_map_to_fetch_errors() {
    assert!(matches!(
      classify(StatusCode::UNAUTHORIZED, None, "nope".into()),
      FetchError::Auth(body) if body == "nope"
    ));
    assert!(matches!(classify(StatusCode::FORBIDDEN, None, String::new()), FetchError::Auth(_)));
    assert!(matches!(
      classify(StatusCode::SERVICE_UNAVAILABLE, None, "later".into()),
      FetchError::Status { status: 503, .. }
    ));
  }

  #[test]
  fn rate_limit_carries_reset_time() {
    let err = classify(StatusCode::TOO_MANY_REQUESTS, Some("1718884800"), String::new());
    let FetchError::RateLimited { reset_at } = err else {
      panic!("expected a rate-limit error");
    };
    assert_eq!(reset_at, Some(Utc.with_ymd_and_hms(2024, 6, 20, 12, 0, 0).unwrap()));

    let garbled = classify(StatusCode::TOO_MANY_REQUESTS, Some("soon"), String::new());
    assert!(matches!(garbled, FetchError::RateLimited { reset_at: None }));
  }

  #[test]
  fn times_use_whole_seconds_and_z() {
    let at = Utc.with_ymd_and_hms(2024, 6, 20, 12, 0, 0).unwrap();
    assert_eq!(api_time(at), "2024-06-20T12:00:00Z");
  }

  #[test]
  fn urls_join_without_double_slash() {
    let c = client("https://api.twitter.com/2/");
    assert_eq!(c.url("/tweets"), "https://api.twitter.com/2/tweets");
  }

  #[test]
  fn ids_are_comma_joined() {
    let ids: Vec<PostId> = ["1", "22", "333"].into_iter().map(PostId::from).collect();
    assert_eq!(join_ids(ids.iter().map(PostId::as_str)), "1,22,333");
  }

  #[tokio::test]
  async fn zero_width_timeline_skips_the_network() {
    // Unroutable base: any request would fail with a transport error.
    let c = client("http://127.0.0.1:9");
    let window = DateWindow::zero_at(Utc.with_ymd_and_hms(2024, 6, 20, 0, 0, 0).unwrap());
    let posts = c.fetch_timeline("7".into(), window).await.unwrap();
    assert!(posts.is_empty());
  }

  #[tokio::test]
  async fn unreachable_host_is_a_transport_error() {
    let c = client("http://127.0.0.1:9");
    let err = c.fetch_users_by_id(BTreeSet::from(["7".into()])).await.unwrap_err();
    assert!(matches!(err, FetchError::Transport(_)));
  }
}
