//! skein binary.
//!
//! Reads `skein.toml` (or the path given with `--config`), opens the SQLite
//! store and syncs it against the Twitter API.

mod config;

use std::{path::PathBuf, time::Duration};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use skein_core::{
  engine::{Engine, SyncReport},
  model::{ReadState, Relevance, UserId},
  snapshot::list_discussions,
  store::Store,
};
use skein_store_sqlite::SqliteStore;
use skein_twitter::TwitterClient;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

use crate::config::SyncConfig;

#[derive(Parser)]
#[command(author, version, about = "Skein timeline reader")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "skein.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Fetch the home timeline and everything it still needs.
  Sync {
    /// Keep syncing every `poll_interval_secs` until interrupted.
    #[arg(long)]
    watch: bool,
  },
  /// Follow users by ID and back-fill their timelines.
  Follow { ids: Vec<String> },
  /// Stop following users by ID.
  Unfollow { ids: Vec<String> },
  /// List discussions, most recently active first.
  Discussions {
    /// Lowest relevance tier to show.
    #[arg(long, default_value = "referenced")]
    min: Relevance,
    #[arg(long, default_value_t = 20)]
    limit: usize,
  },
  /// Mark a discussion read.
  Read { id: String },
  /// Summarise what is stored.
  Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let cfg = SyncConfig::load(&cli.config)?;

  let store_path = cfg.store_path();
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;
  let engine = Engine::new(store, cfg.engine());

  match cli.command {
    Command::Sync { watch } => {
      let client = TwitterClient::new(cfg.twitter()).context("failed to build API client")?;
      let queued = engine.replan().await.context("failed to plan fetches")?;
      info!(queued, "restored fetch plan");
      sync_once(&engine, &client).await?;
      if watch {
        let mut tick = tokio::time::interval(Duration::from_secs(cfg.poll_interval_secs.max(1)));
        // The first tick fires immediately; the initial sync covered it.
        tick.tick().await;
        loop {
          tokio::select! {
            _ = tick.tick() => sync_once(&engine, &client).await?,
            _ = tokio::signal::ctrl_c() => {
              info!("interrupted; stopping");
              break;
            }
          }
        }
      }
    }
    Command::Follow { ids } => {
      let client = TwitterClient::new(cfg.twitter()).context("failed to build API client")?;
      let report = engine.on_follow(ids.into_iter().map(UserId::from).collect()).await;
      for (id, err) in &report.failed {
        warn!(user = %id, %err, "follow failed");
      }
      for (id, changed) in &report.succeeded {
        println!("following {id} ({changed} posts promoted)");
      }
      log_sync(&engine.run_pending(&client).await);
    }
    Command::Unfollow { ids } => {
      let report = engine.on_unfollow(ids.into_iter().map(UserId::from).collect()).await;
      for (id, err) in &report.failed {
        warn!(user = %id, %err, "unfollow failed");
      }
      for (id, changed) in &report.succeeded {
        println!("unfollowed {id} ({changed} posts demoted)");
      }
    }
    Command::Discussions { min, limit } => {
      let views = engine
        .store()
        .read(move |r| list_discussions(r, min))
        .await
        .context("failed to list discussions")?;
      for view in views.into_iter().take(limit) {
        let marker = if view.discussion.read == ReadState::Unread { "*" } else { " " };
        let headline = view.posts.first().map(|p| p.text.as_str()).unwrap_or("");
        println!(
          "{marker} {id:>20}  {count:>4}  {at}  {headline}",
          id = view.discussion.id.as_str(),
          count = view.discussion.tweet_count,
          at = view.discussion.updated_at.format("%Y-%m-%d %H:%M"),
          headline = headline.lines().next().unwrap_or(""),
        );
      }
    }
    Command::Read { id } => {
      engine
        .mark_read(id.as_str().into())
        .await
        .with_context(|| format!("failed to mark {id} read"))?;
    }
    Command::Status => print_status(&engine).await?,
  }

  Ok(())
}

async fn sync_once(engine: &Engine<SqliteStore>, client: &TwitterClient) -> anyhow::Result<()> {
  let report = engine.sync_home(client).await.context("sync failed")?;
  log_sync(&report);
  Ok(())
}

fn log_sync(report: &SyncReport) {
  for (request, err) in &report.failures {
    warn!(?request, %err, "request failed");
  }
  info!(
    requests = report.requests,
    inserted = report.inserted,
    discussions = report.discussions_created,
    failures = report.failures.len(),
    "sync round done",
  );
}

async fn print_status(engine: &Engine<SqliteStore>) -> anyhow::Result<()> {
  let (global, followed, discussions, unread, dangling) = engine
    .store()
    .read(|r| {
      let discussions = r.discussions()?;
      let unread = discussions.iter().filter(|d| d.read == ReadState::Unread).count();
      Ok((
        r.global_window()?,
        r.followed_users()?.len(),
        discussions.len(),
        unread,
        r.dangling_posts()?.len(),
      ))
    })
    .await
    .context("failed to read status")?;

  match global {
    Some(w) => println!("fetched:     {} .. {}", w.start(), w.end()),
    None => println!("fetched:     nothing yet"),
  }
  println!("following:   {followed}");
  println!("discussions: {discussions} ({unread} unread)");
  println!("dangling:    {dangling}");
  Ok(())
}
