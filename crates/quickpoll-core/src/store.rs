//! The `PollStore` trait: the backing store's typed query/insert/delete
//! surface over the `polls`, `poll_options`, `votes` and `likes` tables.
//!
//! Implemented by storage backends (e.g. `quickpoll-store-sqlite`). The store
//! owns every invariant that matters under concurrency: unique
//! `(poll_id, session_id)` on votes and likes, and the `votes_count` /
//! `likes_count` aggregates.

use std::future::Future;

use uuid::Uuid;

use crate::{
  SessionId,
  poll::{Like, Poll, PollOption, Vote},
};

/// Classification a backend error must offer so callers can tell a
/// constraint rejection from an ordinary failure.
pub trait StoreFailure: std::error::Error + Send + Sync + 'static {
  /// True when a write was refused because it would duplicate a unique key.
  fn is_unique_violation(&self) -> bool;
}

/// Abstraction over a QuickPoll store backend.
///
/// All methods return `Send` futures so the trait can be driven from spawned
/// tokio tasks.
pub trait PollStore: Send + Sync {
  type Error: StoreFailure;

  // ── Polls and options ─────────────────────────────────────────────────

  /// Insert a poll row with zero likes.
  fn insert_poll(
    &self,
    title: String,
  ) -> impl Future<Output = Result<Poll, Self::Error>> + Send + '_;

  /// Insert option rows for an existing poll, in the given order.
  fn insert_options(
    &self,
    poll_id: Uuid,
    texts: Vec<String>,
  ) -> impl Future<Output = Result<Vec<PollOption>, Self::Error>> + Send + '_;

  /// Insert a poll and its options in one transaction: either all rows land
  /// or none do.
  fn insert_poll_with_options(
    &self,
    title: String,
    texts: Vec<String>,
  ) -> impl Future<Output = Result<(Poll, Vec<PollOption>), Self::Error>>
  + Send
  + '_;

  /// Retrieve a poll by id. Returns `None` if not found.
  fn get_poll(
    &self,
    poll_id: Uuid,
  ) -> impl Future<Output = Result<Option<Poll>, Self::Error>> + Send + '_;

  /// All polls, newest first.
  fn list_polls(
    &self,
  ) -> impl Future<Output = Result<Vec<Poll>, Self::Error>> + Send + '_;

  /// Options ordered oldest first, optionally restricted to one poll.
  fn list_options(
    &self,
    poll_id: Option<Uuid>,
  ) -> impl Future<Output = Result<Vec<PollOption>, Self::Error>> + Send + '_;

  // ── Votes ─────────────────────────────────────────────────────────────

  /// Insert a vote row. A second vote for the same (poll, session) fails with
  /// an error whose [`StoreFailure::is_unique_violation`] is true.
  fn insert_vote<'a>(
    &'a self,
    poll_id: Uuid,
    option_id: Uuid,
    session: &'a SessionId,
  ) -> impl Future<Output = Result<Vote, Self::Error>> + Send + 'a;

  /// The session's vote on a poll, if any.
  fn find_vote<'a>(
    &'a self,
    poll_id: Uuid,
    session: &'a SessionId,
  ) -> impl Future<Output = Result<Option<Vote>, Self::Error>> + Send + 'a;

  // ── Likes ─────────────────────────────────────────────────────────────

  /// Insert a like row; unique per (poll, session).
  fn insert_like<'a>(
    &'a self,
    poll_id: Uuid,
    session: &'a SessionId,
  ) -> impl Future<Output = Result<Like, Self::Error>> + Send + 'a;

  /// Delete the session's like. Returns whether a row was removed.
  fn delete_like<'a>(
    &'a self,
    poll_id: Uuid,
    session: &'a SessionId,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// The session's like on a poll, if any.
  fn find_like<'a>(
    &'a self,
    poll_id: Uuid,
    session: &'a SessionId,
  ) -> impl Future<Output = Result<Option<Like>, Self::Error>> + Send + 'a;
}
