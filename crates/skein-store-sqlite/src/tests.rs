//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use skein_core::{
  Error as CoreError,
  engine::{Engine, EngineConfig, IngestBatch},
  fetch::{RawPost, RawReference},
  model::{
    Conversation, Dangling, Discussion, Post, PostId, ReadState, ReferenceKind, Relevance, User,
    UserId,
  },
  store::{Reader, Store, transact},
  window::DateWindow,
};

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn now() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 6, 20, 12, 0, 0).unwrap() }

fn post(id: &str, conversation: &str) -> Post {
  Post {
    id:              id.into(),
    conversation_id: conversation.into(),
    author_id:       "u1".into(),
    created_at:      now(),
    text:            format!("post {id}"),
    replying_to:     None,
    quoting:         None,
    retweeting:      None,
    dangling:        Dangling::NONE,
    relevance:       Relevance::Irrelevant,
  }
}

fn raw(id: &str, conversation: &str, reply_to: Option<&str>) -> RawPost {
  RawPost {
    id:              id.into(),
    conversation_id: conversation.into(),
    author_id:       "u1".into(),
    created_at:      now(),
    text:            format!("raw {id}"),
    references:      reply_to
      .map(|target| RawReference { kind: ReferenceKind::Reply, id: target.into() })
      .into_iter()
      .collect(),
  }
}

// ─── Entities ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn post_columns_round_trip() {
  let s = store().await;
  let mut p = post("11", "10");
  p.replying_to = Some("10".into());
  p.quoting = Some("7".into());
  p.dangling = [ReferenceKind::Reply, ReferenceKind::Quote].into_iter().collect();
  p.relevance = Relevance::Referenced;

  let expected = p.clone();
  transact(&s, move |tx| tx.put_post(&p)).await.unwrap();

  let fetched = s.read(|r| r.get_post(&"11".into())).await.unwrap();
  assert_eq!(fetched, Some(expected));
  assert!(s.read(|r| r.has_post(&"11".into())).await.unwrap());
  assert!(!s.read(|r| r.has_post(&"12".into())).await.unwrap());
}

#[tokio::test]
async fn missing_rows_read_as_none() {
  let s = store().await;
  let (post, conv, disc, user) = s
    .read(|r| {
      let id = PostId::from("1");
      Ok((
        r.get_post(&id)?,
        r.get_conversation(&id)?,
        r.get_discussion(&id)?,
        r.get_user(&UserId::from("u1"))?,
      ))
    })
    .await
    .unwrap();
  assert!(post.is_none() && conv.is_none() && disc.is_none() && user.is_none());
  assert!(s.read(|r| r.global_window()).await.unwrap().is_none());
}

#[tokio::test]
async fn conversation_and_discussion_members_round_trip() {
  let s = store().await;
  let mut conv = Conversation::new("10".into());
  conv.posts.extend(["10".into(), "11".into(), "9".into()]);
  conv.root = Some("10".into());
  conv.upstream = Some("10".into());
  conv.discussion = Some("10".into());

  let mut disc = Discussion::new("10".into(), now());
  disc.conversations.insert("10".into());
  disc.tweet_count = 3;
  disc.read = ReadState::Read;

  let (c, d) = (conv.clone(), disc.clone());
  transact(&s, move |tx| {
    tx.put_conversation(&c)?;
    tx.put_discussion(&d)
  })
  .await
  .unwrap();

  let (got_conv, got_disc) = s
    .read(|r| Ok((r.get_conversation(&"10".into())?, r.get_discussion(&"10".into())?)))
    .await
    .unwrap();
  assert_eq!(got_conv, Some(conv));
  assert_eq!(got_disc, Some(disc));
}

#[tokio::test]
async fn users_and_follow_flags() {
  let s = store().await;
  transact(&s, |tx| {
    tx.put_user(&User::placeholder("u1".into()))?;
    tx.put_user(&User {
      id:        "u2".into(),
      handle:    Some("@two".into()),
      name:      Some("Two".into()),
      following: true,
    })
  })
  .await
  .unwrap();

  let followed = s.read(|r| r.followed_users()).await.unwrap();
  assert_eq!(followed.len(), 1);
  assert_eq!(followed[0].id, UserId::from("u2"));

  let placeholder = s.read(|r| r.get_user(&"u1".into())).await.unwrap().unwrap();
  assert!(placeholder.is_placeholder());
}

// ─── Queries ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unlinked_conversations_in_numeric_order() {
  let s = store().await;
  transact(&s, |tx| {
    for id in ["100", "20", "3", "21"] {
      tx.put_conversation(&Conversation::new(id.into()))?;
    }
    let mut linked = Conversation::new("5".into());
    linked.discussion = Some("5".into());
    tx.put_conversation(&linked)
  })
  .await
  .unwrap();

  let ids: Vec<String> = s
    .read(|r| r.unlinked_conversations())
    .await
    .unwrap()
    .into_iter()
    .map(|c| c.id.to_string())
    .collect();
  assert_eq!(ids, ["3", "20", "21", "100"]);
}

#[tokio::test]
async fn dangling_and_author_indexes() {
  let s = store().await;
  transact(&s, |tx| {
    let mut a = post("1", "1");
    a.dangling = [ReferenceKind::Retweet].into_iter().collect();
    a.retweeting = Some("0".into());
    tx.put_post(&a)?;
    tx.put_post(&Post { author_id: "u2".into(), ..post("2", "2") })?;
    tx.put_post(&post("3", "3"))
  })
  .await
  .unwrap();

  let dangling = s.read(|r| r.dangling_posts()).await.unwrap();
  assert_eq!(dangling.len(), 1);
  assert_eq!(dangling[0].id, PostId::from("1"));

  let by_u1 = s.read(|r| r.posts_by_author(&"u1".into())).await.unwrap();
  assert_eq!(by_u1.len(), 2);
}

#[tokio::test]
async fn windows_are_upserted() {
  let s = store().await;
  let first = DateWindow::between(now() - TimeDelta::days(2), now()).unwrap();
  let second = DateWindow::between(now() - TimeDelta::days(3), now()).unwrap();
  transact(&s, move |tx| {
    tx.put_global_window(first)?;
    tx.put_global_window(second)?;
    tx.put_user_window(&"u1".into(), first)
  })
  .await
  .unwrap();

  let (global, user, other) = s
    .read(|r| {
      Ok((r.global_window()?, r.user_window(&"u1".into())?, r.user_window(&"u2".into())?))
    })
    .await
    .unwrap();
  assert_eq!(global, Some(second));
  assert_eq!(user, Some(first));
  assert_eq!(other, None);
}

// ─── Transactions ────────────────────────────────────────────────────────────

#[tokio::test]
async fn failed_transaction_rolls_back() {
  let s = store().await;
  let result: Result<(), _> = transact(&s, |tx| {
    tx.put_post(&post("1", "1"))?;
    Err(CoreError::PostNotFound("2".into()))
  })
  .await;
  assert!(matches!(result, Err(CoreError::PostNotFound(_))));
  assert!(s.read(|r| r.get_post(&"1".into())).await.unwrap().is_none());
}

#[tokio::test]
async fn writes_are_visible_inside_the_transaction() {
  let s = store().await;
  let seen = transact(&s, |tx| {
    tx.put_post(&post("1", "1"))?;
    tx.has_post(&"1".into())
  })
  .await
  .unwrap();
  assert!(seen);
}

#[tokio::test]
async fn clones_share_data_and_observers() {
  let s = store().await;
  let other = s.clone();
  let mut changes = other.notifier().observe();
  transact(&s, |tx| tx.put_post(&post("1", "1"))).await.unwrap();

  assert!(other.read(|r| r.has_post(&"1".into())).await.unwrap());
  assert!(changes.try_recv().is_ok());
}

#[tokio::test]
async fn reopening_a_file_keeps_state() {
  let path = std::env::temp_dir().join(format!("skein-store-{}.db", std::process::id()));
  let _ = std::fs::remove_file(&path);
  {
    let s = SqliteStore::open(&path).await.unwrap();
    transact(&s, |tx| {
      tx.put_post(&post("1", "1"))?;
      tx.put_global_window(DateWindow::zero_at(now()))
    })
    .await
    .unwrap();
  }

  let s = SqliteStore::open(&path).await.unwrap();
  let (post, global) = s
    .read(|r| Ok((r.get_post(&"1".into())?, r.global_window()?)))
    .await
    .unwrap();
  assert!(post.is_some());
  assert_eq!(global, Some(DateWindow::zero_at(now())));
  drop(s);
  let _ = std::fs::remove_file(&path);
}

// ─── Engine over SQLite ──────────────────────────────────────────────────────

#[tokio::test]
async fn engine_resolves_threads_on_sqlite() {
  let engine = Engine::new(store().await, EngineConfig::default()).with_clock(now);

  let first = engine.ingest(IngestBatch::lookup(vec![raw("11", "10", Some("10"))])).await.unwrap();
  assert!(first.missing_posts.contains(&PostId::from("10")));

  let second = engine.ingest(IngestBatch::lookup(vec![raw("10", "10", None)])).await.unwrap();
  assert_eq!(second.discussions_created, 1);
  assert!(second.missing_posts.is_empty());

  let (disc, reply) = engine
    .store()
    .read(|r| Ok((r.get_discussion(&"10".into())?, r.get_post(&"11".into())?)))
    .await
    .unwrap();
  let disc = disc.unwrap();
  assert_eq!(disc.tweet_count, 2);
  assert_eq!(disc.read, ReadState::Unread);
  assert!(reply.unwrap().dangling.is_empty());

  // Re-ingesting is a no-op.
  let again = engine.ingest(IngestBatch::lookup(vec![raw("10", "10", None)])).await.unwrap();
  assert_eq!(again.inserted, 0);
  assert_eq!(again.duplicates, 1);
}

#[tokio::test]
async fn follow_window_survives_a_round_trip() {
  let engine = Engine::new(store().await, EngineConfig::default())
    .with_clock(|| now() + TimeDelta::milliseconds(250));
  engine.on_follow(vec!["u4".into()]).await;
  let window = engine.store().read(|r| r.user_window(&"u4".into())).await.unwrap();
  assert_eq!(window, Some(DateWindow::zero_at(now())));
}
