//! [`Gateway`]: the typed CRUD façade every other component talks to.
//!
//! It turns backend errors into the [`quickpoll_core::Error`] taxonomy,
//! enforces a deadline on every store call, and owns the poll creation
//! policy.

use std::{future::Future, time::Duration};

use quickpoll_core::{
  Error, Result, SessionId, ValidationError,
  poll::{Like, Poll, PollAggregate, PollDraft, PollOption, Vote},
  store::{PollStore, StoreFailure},
};
use uuid::Uuid;

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct GatewayConfig {
  /// Upper bound on any single store call.
  pub request_timeout: Duration,
  /// Create a poll and its options in one store transaction. When off, the
  /// two rows sets are written separately and an option failure leaves an
  /// orphaned poll behind.
  pub atomic_create:   bool,
}

impl Default for GatewayConfig {
  fn default() -> Self {
    Self {
      request_timeout: Duration::from_secs(10),
      atomic_create:   true,
    }
  }
}

// ─── Gateway ─────────────────────────────────────────────────────────────────

pub struct Gateway<S> {
  store:  S,
  config: GatewayConfig,
}

impl<S: PollStore> Gateway<S> {
  pub fn new(store: S, config: GatewayConfig) -> Self { Self { store, config } }

  pub fn store(&self) -> &S { &self.store }

  pub fn config(&self) -> &GatewayConfig { &self.config }

  /// Run `call` under the request deadline.
  async fn deadline<T>(
    &self,
    operation: &'static str,
    call: impl Future<Output = T>,
  ) -> Result<T> {
    let after = self.config.request_timeout;
    tokio::time::timeout(after, call).await.map_err(|_| {
      tracing::warn!(operation, ?after, "store call timed out");
      Error::Timeout { operation, after }
    })
  }

  /// Run `call` under the deadline and report any backend error as a store
  /// failure.
  async fn call<T>(
    &self,
    operation: &'static str,
    call: impl Future<Output = Result<T, S::Error>>,
  ) -> Result<T> {
    self.deadline(operation, call).await?.map_err(|e| {
      tracing::warn!(operation, error = %e, "store call failed");
      Error::store(e)
    })
  }

  // ── Creation ──────────────────────────────────────────────────────────────

  /// Insert a bare poll row.
  pub async fn create_poll(&self, title: &str) -> Result<Poll> {
    let title = title.trim();
    if title.is_empty() {
      return Err(ValidationError::EmptyTitle.into());
    }
    self
      .call("create_poll", self.store.insert_poll(title.to_owned()))
      .await
  }

  /// Insert options for an existing poll. Blank entries are dropped.
  pub async fn create_options(
    &self,
    poll_id: Uuid,
    texts: &[String],
  ) -> Result<Vec<PollOption>> {
    let texts: Vec<String> = texts
      .iter()
      .map(|t| t.trim())
      .filter(|t| !t.is_empty())
      .map(str::to_owned)
      .collect();
    self
      .call("create_options", self.store.insert_options(poll_id, texts))
      .await
  }

  /// Validate a draft and create the poll with its options.
  pub async fn publish(&self, draft: PollDraft) -> Result<PollAggregate> {
    let valid = draft.validate()?;

    if self.config.atomic_create {
      let (title, texts) = valid.into_parts();
      let (poll, options) = self
        .call(
          "publish",
          self.store.insert_poll_with_options(title, texts),
        )
        .await?;
      tracing::info!(poll_id = %poll.poll_id, options = options.len(), "poll created");
      return Ok(PollAggregate { poll, options });
    }

    let poll = self.create_poll(valid.title()).await?;
    match self.create_options(poll.poll_id, valid.options()).await {
      Ok(options) => {
        tracing::info!(poll_id = %poll.poll_id, options = options.len(), "poll created");
        Ok(PollAggregate { poll, options })
      }
      Err(e) => {
        tracing::error!(
          poll_id = %poll.poll_id,
          error = %e,
          "options failed after the poll was stored; poll is orphaned"
        );
        Err(Error::PartialCreate { poll_id: poll.poll_id, source: Box::new(e) })
      }
    }
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  /// All polls, newest first.
  pub async fn list_polls(&self) -> Result<Vec<Poll>> {
    self.call("list_polls", self.store.list_polls()).await
  }

  /// Options oldest first, for one poll or for all of them.
  pub async fn list_options(&self, poll_id: Option<Uuid>) -> Result<Vec<PollOption>> {
    self.call("list_options", self.store.list_options(poll_id)).await
  }

  pub async fn get_poll(&self, poll_id: Uuid) -> Result<Option<Poll>> {
    self.call("get_poll", self.store.get_poll(poll_id)).await
  }

  /// One poll with its options, or `None` if the poll does not exist.
  pub async fn fetch_aggregate(&self, poll_id: Uuid) -> Result<Option<PollAggregate>> {
    let Some(poll) = self.get_poll(poll_id).await? else {
      return Ok(None);
    };
    let options = self.list_options(Some(poll_id)).await?;
    Ok(Some(PollAggregate { poll, options }))
  }

  /// Every poll with its options, newest poll first.
  pub async fn fetch_board(&self) -> Result<Vec<PollAggregate>> {
    let polls = self.list_polls().await?;
    let options = self.list_options(None).await?;
    Ok(PollAggregate::group(polls, options))
  }

  /// Polls left without options by a failed two-step creation.
  pub async fn orphaned_polls(&self) -> Result<Vec<Poll>> {
    Ok(
      self
        .fetch_board()
        .await?
        .into_iter()
        .filter(|agg| agg.options.is_empty())
        .map(|agg| agg.poll)
        .collect(),
    )
  }

  // ── Votes ─────────────────────────────────────────────────────────────────

  /// Record a vote. The store's unique (poll, session) constraint is the
  /// authority: a second vote fails with [`Error::DuplicateVote`].
  pub async fn cast_vote(
    &self,
    poll_id: Uuid,
    option_id: Uuid,
    session: &SessionId,
  ) -> Result<Vote> {
    let outcome = self
      .deadline(
        "cast_vote",
        self.store.insert_vote(poll_id, option_id, session),
      )
      .await?;

    match outcome {
      Ok(vote) => {
        tracing::debug!(%poll_id, %option_id, "vote recorded");
        Ok(vote)
      }
      Err(e) if e.is_unique_violation() => {
        tracing::info!(%poll_id, "duplicate vote rejected by the store");
        Err(Error::DuplicateVote { poll_id })
      }
      Err(e) => {
        tracing::warn!(%poll_id, error = %e, "vote failed");
        Err(Error::store(e))
      }
    }
  }

  pub async fn find_vote(&self, poll_id: Uuid, session: &SessionId) -> Result<Option<Vote>> {
    self.call("find_vote", self.store.find_vote(poll_id, session)).await
  }

  // ── Likes ─────────────────────────────────────────────────────────────────

  pub async fn find_like(&self, poll_id: Uuid, session: &SessionId) -> Result<Option<Like>> {
    self.call("find_like", self.store.find_like(poll_id, session)).await
  }

  /// Flip the session's like based on what the caller believes the current
  /// state is, and return the new state.
  ///
  /// This is not a test-and-set: two toggles racing from one session may both
  /// act. Each resolves to the state the caller asked for, so a like that
  /// already exists counts as liked and an unlike of a missing row counts as
  /// not liked.
  pub async fn toggle_like(
    &self,
    poll_id: Uuid,
    session: &SessionId,
    liked: bool,
  ) -> Result<bool> {
    if liked {
      let removed = self
        .call("unlike", self.store.delete_like(poll_id, session))
        .await?;
      if !removed {
        tracing::debug!(%poll_id, "like was already gone");
      }
      return Ok(false);
    }

    let outcome = self
      .deadline("like", self.store.insert_like(poll_id, session))
      .await?;
    match outcome {
      Ok(_) => Ok(true),
      Err(e) if e.is_unique_violation() => {
        tracing::debug!(%poll_id, "like already present");
        Ok(true)
      }
      Err(e) => {
        tracing::warn!(%poll_id, error = %e, "like failed");
        Err(Error::store(e))
      }
    }
  }
}
