//! `quickpoll`: create, vote on and follow polls from the terminal.
//!
//! Every process opening the same database sees the others' votes and likes
//! live.
//!
//! # Usage
//!
//! ```
//! quickpoll create --title "Best color?" -o Red -o Blue
//! quickpoll vote <poll-id> 1
//! quickpoll watch --limit 5
//! ```

mod commands;
mod render;
mod settings;

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use quickpoll_core::session::{FileStorage, get_or_create_session_id};
use quickpoll_live::{Gateway, Subscriptions};
use quickpoll_store_sqlite::SqliteStore;
use settings::{Settings, expand_tilde};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::commands::App;

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "quickpoll", version, about = "Live polls in the terminal")]
struct Cli {
  /// Path to a TOML configuration file.
  #[arg(short, long, value_name = "FILE")]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Create a poll with two to six options.
  Create {
    #[arg(short, long)]
    title:  String,
    /// An answer option; repeat for each one.
    #[arg(short = 'o', long = "option", value_name = "TEXT")]
    option: Vec<String>,
  },
  /// Print every poll, newest first.
  List,
  /// Print one poll.
  Show { poll: Uuid },
  /// Vote on a poll by option number (1-based) or option id.
  Vote { poll: Uuid, choice: String },
  /// Like a poll, or remove your like.
  Like { poll: Uuid },
  /// Follow the newest polls live until interrupted.
  Watch {
    #[arg(short, long, default_value_t = 5)]
    limit: usize,
  },
  /// List polls whose options were never written.
  Orphans,
  /// Print this machine's session identifier.
  Session,
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();

  let settings =
    Settings::load(cli.config.as_deref()).context("failed to load settings")?;

  let store_path = expand_tilde(&settings.store_path);
  if let Some(parent) = store_path.parent() {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create {parent:?}"))?;
  }
  let store = SqliteStore::open_with(&store_path, settings.relay())
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let session =
    get_or_create_session_id(&FileStorage::new(expand_tilde(&settings.session_file)));

  let gateway = Arc::new(Gateway::new(store.clone(), settings.gateway()));
  let app = App {
    subs: Subscriptions::new(gateway.clone(), Arc::new(store.feed())),
    gateway,
    session,
  };

  match cli.command {
    Command::Create { title, option } => app.create(title, option).await,
    Command::List => app.list().await,
    Command::Show { poll } => app.show(poll).await,
    Command::Vote { poll, choice } => app.vote(poll, &choice).await,
    Command::Like { poll } => app.like(poll).await,
    Command::Watch { limit } => app.watch(limit).await,
    Command::Orphans => app.orphans().await,
    Command::Session => {
      app.session();
      Ok(())
    }
  }
}
