//! Per-viewer voting consistency.
//!
//! A [`Ballot`] holds what one session believes about one poll: whether it
//! has voted, for which option, and whether it likes the poll. Local state
//! only moves after the store accepted a mutation. When the store rejects
//! one, the ballot re-reads the session's rows so that a stale belief (for
//! example a vote cast from another window) is corrected before the next
//! action.

use std::sync::Arc;

use quickpoll_core::{
  Error, Result, SessionId,
  poll::{Like, Vote},
  store::PollStore,
};
use uuid::Uuid;

use crate::Gateway;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoterState {
  pub has_voted:       bool,
  pub selected_option: Option<Uuid>,
  pub has_liked:       bool,
}

impl VoterState {
  fn from_rows(vote: Option<Vote>, like: Option<Like>) -> Self {
    Self {
      has_voted:       vote.is_some(),
      selected_option: vote.map(|v| v.option_id),
      has_liked:       like.is_some(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
  Recorded,
  /// This ballot already holds a vote; nothing was sent to the store.
  AlreadyVoted,
}

/// One session's view of one poll.
///
/// Actions take `&mut self`, so a ballot never has two mutations in flight.
pub struct Ballot<S> {
  gateway: Arc<Gateway<S>>,
  session: SessionId,
  poll_id: Uuid,
  state:   VoterState,
}

impl<S: PollStore> Ballot<S> {
  /// Open a ballot, seeding its state from the store.
  pub async fn open(
    gateway: Arc<Gateway<S>>,
    session: SessionId,
    poll_id: Uuid,
  ) -> Result<Self> {
    let mut ballot = Self { gateway, session, poll_id, state: VoterState::default() };
    ballot.reconcile().await?;
    Ok(ballot)
  }

  pub fn poll_id(&self) -> Uuid { self.poll_id }

  pub fn session(&self) -> &SessionId { &self.session }

  pub fn state(&self) -> &VoterState { &self.state }

  /// Re-read this session's vote and like for the poll.
  pub async fn reconcile(&mut self) -> Result<&VoterState> {
    let vote = self.gateway.find_vote(self.poll_id, &self.session).await?;
    let like = self.gateway.find_like(self.poll_id, &self.session).await?;
    let next = VoterState::from_rows(vote, like);
    if next != self.state {
      tracing::debug!(poll_id = %self.poll_id, state = ?next, "voter state reconciled");
    }
    self.state = next;
    Ok(&self.state)
  }

  /// Vote for `option_id`. A second vote is refused locally when this ballot
  /// knows about the first one, and by the store otherwise.
  pub async fn vote(&mut self, option_id: Uuid) -> Result<VoteOutcome> {
    if self.state.has_voted {
      tracing::debug!(poll_id = %self.poll_id, "vote ignored; already voted");
      return Ok(VoteOutcome::AlreadyVoted);
    }

    match self
      .gateway
      .cast_vote(self.poll_id, option_id, &self.session)
      .await
    {
      Ok(_) => {
        self.state.has_voted = true;
        self.state.selected_option = Some(option_id);
        Ok(VoteOutcome::Recorded)
      }
      Err(e) => {
        self.settle(&e).await;
        Err(e)
      }
    }
  }

  /// Flip the like and return whether the poll is now liked.
  pub async fn toggle_like(&mut self) -> Result<bool> {
    match self
      .gateway
      .toggle_like(self.poll_id, &self.session, self.state.has_liked)
      .await
    {
      Ok(liked) => {
        self.state.has_liked = liked;
        Ok(liked)
      }
      Err(e) => {
        self.settle(&e).await;
        Err(e)
      }
    }
  }

  async fn settle(&mut self, failure: &Error) {
    if let Err(e) = self.reconcile().await {
      tracing::warn!(
        poll_id = %self.poll_id,
        error = %e,
        after = %failure,
        "could not reconcile voter state"
      );
    }
  }
}
