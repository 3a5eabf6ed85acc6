//! Subcommand implementations.

use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{Context as _, Result, anyhow, bail};
use quickpoll_core::{
  SessionId,
  poll::{PollAggregate, PollDraft},
};
use quickpoll_live::{Ballot, Gateway, PollWatch, Subscriptions, VoteOutcome};
use quickpoll_store_sqlite::{ChangeHub, SqliteStore};
use uuid::Uuid;

use crate::render;

pub struct App {
  pub gateway: Arc<Gateway<SqliteStore>>,
  pub subs:    Subscriptions<SqliteStore, ChangeHub>,
  pub session: SessionId,
}

impl App {
  async fn ballot(&self, poll_id: Uuid) -> Result<Ballot<SqliteStore>> {
    Ballot::open(self.gateway.clone(), self.session.clone(), poll_id)
      .await
      .context("failed to read your vote")
  }

  async fn aggregate(&self, poll_id: Uuid) -> Result<PollAggregate> {
    self
      .gateway
      .fetch_aggregate(poll_id)
      .await?
      .ok_or_else(|| anyhow!("no poll with id {poll_id}"))
  }

  async fn print_card(&self, poll_id: Uuid, ballot: &Ballot<SqliteStore>) -> Result<()> {
    let aggregate = self.aggregate(poll_id).await?;
    println!("{}", render::poll_card(&aggregate, ballot.state()));
    Ok(())
  }

  // ── Commands ──────────────────────────────────────────────────────────────

  pub async fn create(&self, title: String, options: Vec<String>) -> Result<()> {
    let draft = PollDraft::new(title, options);
    let aggregate = match self.gateway.publish(draft).await {
      Ok(aggregate) => aggregate,
      Err(e) => {
        let notice = render::create_failure(&e);
        return Err(anyhow::Error::new(e).context(notice));
      }
    };
    println!("{}", render::POLL_CREATED);
    let ballot = self.ballot(aggregate.poll_id()).await?;
    println!("{}", render::poll_card(&aggregate, ballot.state()));
    Ok(())
  }

  pub async fn list(&self) -> Result<()> {
    let board = self.gateway.fetch_board().await?;
    if board.is_empty() {
      println!("No polls yet.");
    }
    for aggregate in &board {
      let ballot = self.ballot(aggregate.poll_id()).await?;
      println!("{}\n", render::poll_card(aggregate, ballot.state()));
    }
    Ok(())
  }

  pub async fn show(&self, poll_id: Uuid) -> Result<()> {
    let ballot = self.ballot(poll_id).await?;
    self.print_card(poll_id, &ballot).await
  }

  /// `choice` is a 1-based option number or an option id.
  pub async fn vote(&self, poll_id: Uuid, choice: &str) -> Result<()> {
    let aggregate = self.aggregate(poll_id).await?;
    let option_id = resolve_choice(&aggregate, choice)?;
    let mut ballot = self.ballot(poll_id).await?;

    match ballot.vote(option_id).await {
      Ok(VoteOutcome::Recorded) => println!("{}", render::VOTE_RECORDED),
      Ok(VoteOutcome::AlreadyVoted) => println!("{}", render::ALREADY_VOTED),
      Err(e) => {
        let notice = render::vote_failure(&e);
        self.print_card(poll_id, &ballot).await?;
        return Err(anyhow::Error::new(e).context(notice));
      }
    }
    self.print_card(poll_id, &ballot).await
  }

  pub async fn like(&self, poll_id: Uuid) -> Result<()> {
    let mut ballot = self.ballot(poll_id).await?;
    if let Err(e) = ballot.toggle_like().await {
      let notice = render::like_failure(&e);
      return Err(anyhow::Error::new(e).context(notice));
    }
    self.print_card(poll_id, &ballot).await
  }

  pub async fn orphans(&self) -> Result<()> {
    let orphans = self.gateway.orphaned_polls().await?;
    if orphans.is_empty() {
      println!("No orphaned polls.");
    }
    for poll in orphans {
      println!("{}  {}  created {}", poll.poll_id, poll.title, poll.created_at);
    }
    Ok(())
  }

  pub fn session(&self) { println!("{}", self.session); }

  /// Follow the newest `limit` polls until interrupted, reprinting a poll
  /// whenever its counts change.
  pub async fn watch(&self, limit: usize) -> Result<()> {
    let mut board = self.subs.open_board().await?;
    let mut views: HashMap<Uuid, (PollWatch, Ballot<SqliteStore>)> = HashMap::new();
    self.follow(&board.current(), limit, &mut views).await?;

    let mut tick = tokio::time::interval(Duration::from_millis(200));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
      tokio::select! {
        alive = board.changed() => {
          if !alive {
            bail!("lost the live connection to the poll board");
          }
          self.follow(&board.current(), limit, &mut views).await?;
        }
        _ = tick.tick() => {
          for (watch, ballot) in views.values_mut() {
            if watch.has_changed() {
              println!("{}\n", render::poll_card(&watch.current(), ballot.state()));
            }
          }
        }
        _ = &mut shutdown => {
          tracing::debug!("interrupted");
          return Ok(());
        }
      }
    }
  }

  /// Keep a live view open for each of the newest `limit` polls and close
  /// the rest.
  async fn follow(
    &self,
    board: &[PollAggregate],
    limit: usize,
    views: &mut HashMap<Uuid, (PollWatch, Ballot<SqliteStore>)>,
  ) -> Result<()> {
    let wanted: Vec<&PollAggregate> = board.iter().take(limit).collect();
    views.retain(|id, _| wanted.iter().any(|agg| agg.poll_id() == *id));

    for aggregate in wanted.into_iter().rev() {
      if views.contains_key(&aggregate.poll_id()) {
        continue;
      }
      let ballot = self.ballot(aggregate.poll_id()).await?;
      let mut watch = self.subs.watch_poll(aggregate.clone());
      println!("{}\n", render::poll_card(&watch.current(), ballot.state()));
      views.insert(aggregate.poll_id(), (watch, ballot));
    }
    Ok(())
  }
}

fn resolve_choice(aggregate: &PollAggregate, choice: &str) -> Result<Uuid> {
  if let Ok(n) = choice.parse::<usize>() {
    return match n.checked_sub(1).and_then(|i| aggregate.options.get(i)) {
      Some(option) => Ok(option.option_id),
      None => bail!("option {n} does not exist; pick 1..={}", aggregate.options.len()),
    };
  }
  let option_id = Uuid::parse_str(choice)
    .with_context(|| format!("{choice:?} is neither an option number nor an option id"))?;
  if aggregate.option(option_id).is_none() {
    bail!("option {option_id} does not belong to this poll");
  }
  Ok(option_id)
}
