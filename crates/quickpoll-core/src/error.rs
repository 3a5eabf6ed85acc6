//! Error types for `quickpoll-core`.
//!
//! Every failure surfaced to a user falls into one of these variants. None of
//! them are fatal; callers report them and return to a re-interactable state.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// A poll draft was rejected before any store call was made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
  #[error("poll title must not be empty")]
  EmptyTitle,

  #[error("a poll needs at least {min} options, got {given}")]
  TooFewOptions { given: usize, min: usize },

  #[error("a poll allows at most {max} options, got {given}")]
  TooManyOptions { given: usize, max: usize },
}

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Validation(#[from] ValidationError),

  /// The store's unique (poll, session) constraint rejected a second vote.
  #[error("session has already voted on poll {poll_id}")]
  DuplicateVote { poll_id: Uuid },

  /// The poll row exists but its options do not. Not rolled back.
  #[error("poll {poll_id} was created but its options were not: {source}")]
  PartialCreate {
    poll_id: Uuid,
    #[source]
    source:  Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("{operation} timed out after {after:?}")]
  Timeout {
    operation: &'static str,
    after:     Duration,
  },
}

impl Error {
  /// Wrap a backend error.
  pub fn store(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Store(Box::new(e))
  }

  /// Whether this failure came from the store or its transport, as opposed to
  /// a rule the caller broke.
  pub fn is_store_failure(&self) -> bool {
    matches!(self, Self::Store(_) | Self::Timeout { .. })
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
