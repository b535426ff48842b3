//! Response shapes of the v2 endpoints and their conversion to raw records.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use skein_core::{
  fetch::{RawPost, RawReference, RawUser},
  model::ReferenceKind,
};
use tracing::{debug, warn};

pub const TWEET_FIELDS: &str = "id,conversation_id,author_id,created_at,text,referenced_tweets";
pub const USER_FIELDS: &str = "id,username,name";

/// One page of any list endpoint.
#[derive(Debug, Deserialize)]
pub struct Page<T> {
  #[serde(default = "Vec::new")]
  pub data:   Vec<T>,
  #[serde(default)]
  pub meta:   Option<Meta>,
  /// Per-item problems, e.g. IDs that no longer exist. Not fatal.
  #[serde(default)]
  pub errors: Vec<Problem>,
}

#[derive(Debug, Deserialize)]
pub struct Meta {
  pub next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Problem {
  #[serde(default)]
  pub value:  Option<String>,
  #[serde(default)]
  pub detail: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Tweet {
  pub id:                String,
  pub text:              String,
  pub conversation_id:   Option<String>,
  pub author_id:         Option<String>,
  pub created_at:        Option<DateTime<Utc>>,
  #[serde(default)]
  pub referenced_tweets: Vec<ReferencedTweet>,
}

#[derive(Debug, Deserialize)]
pub struct ReferencedTweet {
  #[serde(rename = "type")]
  pub kind: String,
  pub id:   String,
}

#[derive(Debug, Deserialize)]
pub struct User {
  pub id:       String,
  pub username: String,
  pub name:     String,
}

fn reference_kind(wire: &str) -> Option<ReferenceKind> {
  match wire {
    "replied_to" => Some(ReferenceKind::Reply),
    "quoted" => Some(ReferenceKind::Quote),
    "retweeted" => Some(ReferenceKind::Retweet),
    _ => None,
  }
}

impl Tweet {
  /// `None` when a field the engine needs was not returned.
  pub fn into_raw(self) -> Option<RawPost> {
    let (Some(author_id), Some(created_at)) = (self.author_id, self.created_at) else {
      warn!(tweet = %self.id, "tweet without author or timestamp; dropped");
      return None;
    };
    let references = self
      .referenced_tweets
      .into_iter()
      .filter_map(|r| match reference_kind(&r.kind) {
        Some(kind) => Some(RawReference { kind, id: r.id.into() }),
        None => {
          debug!(tweet = %self.id, kind = %r.kind, "unknown reference type ignored");
          None
        }
      })
      .collect();
    // A tweet that starts its own thread may omit the conversation ID.
    let conversation_id = self.conversation_id.unwrap_or_else(|| self.id.clone());
    Some(RawPost {
      id: self.id.into(),
      conversation_id: conversation_id.into(),
      author_id: author_id.into(),
      created_at,
      text: self.text,
      references,
    })
  }
}

impl From<User> for RawUser {
  fn from(u: User) -> Self {
    Self { id: u.id.into(), handle: format!("@{}", u.username), name: u.name }
  }
}

impl<T> Page<T> {
  pub fn log_problems(&self, endpoint: &str) {
    for problem in &self.errors {
      debug!(
        endpoint,
        value = problem.value.as_deref().unwrap_or(""),
        detail = problem.detail.as_deref().unwrap_or(""),
        "item not returned",
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reply_with_quote_decodes_both_references() {
    let page: Page<Tweet> = serde_json::from_str(
      r#"{
        "data": [{
          "id": "1502",
          "text": "agreed",
          "conversation_id": "1500",
          "author_id": "42",
          "created_at": "2024-06-20T12:00:00.000Z",
          "referenced_tweets": [
            {"type": "replied_to", "id": "1501"},
            {"type": "quoted", "id": "900"}
          ]
        }],
        "meta": {"result_count": 1}
      }"#,
    )
    .unwrap();
    assert!(page.meta.unwrap().next_token.is_none());

    let raw = page.data.into_iter().next().unwrap().into_raw().unwrap();
    assert_eq!(raw.conversation_id.as_str(), "1500");
    assert_eq!(raw.reference(ReferenceKind::Reply).map(|id| id.as_str()), Some("1501"));
    assert_eq!(raw.reference(ReferenceKind::Quote).map(|id| id.as_str()), Some("900"));
    assert!(raw.reference(ReferenceKind::Retweet).is_none());
  }

  #[test]
  fn lookup_with_only_errors_has_no_data() {
    let page: Page<Tweet> = serde_json::from_str(
      r#"{"errors": [{"value": "77", "detail": "Could not find tweet with ids: [77]."}]}"#,
    )
    .unwrap();
    assert!(page.data.is_empty());
    assert_eq!(page.errors[0].value.as_deref(), Some("77"));
  }

  #[test]
  fn missing_conversation_defaults_to_self_and_unknown_types_drop() {
    let tweet: Tweet = serde_json::from_str(
      r#"{
        "id": "10", "text": "hi", "author_id": "1",
        "created_at": "2024-01-01T00:00:00Z",
        "referenced_tweets": [{"type": "mystery", "id": "3"}]
      }"#,
    )
    .unwrap();
    let raw = tweet.into_raw().unwrap();
    assert_eq!(raw.conversation_id.as_str(), "10");
    assert!(raw.references.is_empty());
  }

  #[test]
  fn tweet_without_author_is_dropped() {
    let tweet: Tweet =
      serde_json::from_str(r#"{"id": "10", "text": "hi", "created_at": "2024-01-01T00:00:00Z"}"#)
        .unwrap();
    assert!(tweet.into_raw().is_none());
  }

  #[test]
  fn user_handle_gets_at_sign() {
    let user: User =
      serde_json::from_str(r#"{"id": "42", "username": "ada", "name": "Ada"}"#).unwrap();
    let raw = RawUser::from(user);
    assert_eq!(raw.handle, "@ada");
    assert_eq!(raw.id.as_str(), "42");
  }
}
