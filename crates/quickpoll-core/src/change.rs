//! Row-level change notifications and the transport that carries them.
//!
//! A [`ChangeFeed`] hands out [`ChangeStream`]s scoped by [`ChangeFilter`]s.
//! Consumers never patch state from an event's contents: an event only says
//! "this aggregate changed, go re-read it". Because of that the stream makes
//! no ordering or exactly-once promises, and a lagging receiver is reported
//! as [`Notice::Missed`] rather than as an error.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

// ─── Events ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
  Polls,
  PollOptions,
  Votes,
  Likes,
}

impl Table {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Polls => "polls",
      Self::PollOptions => "poll_options",
      Self::Votes => "votes",
      Self::Likes => "likes",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "polls" => Some(Self::Polls),
      "poll_options" => Some(Self::PollOptions),
      "votes" => Some(Self::Votes),
      "likes" => Some(Self::Likes),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
  Insert,
  Update,
  Delete,
}

impl ChangeKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Insert => "insert",
      Self::Update => "update",
      Self::Delete => "delete",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "insert" => Some(Self::Insert),
      "update" => Some(Self::Update),
      "delete" => Some(Self::Delete),
      _ => None,
    }
  }
}

/// One row changed in one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
  /// Transport sequence number; increases per event but may have gaps.
  pub seq:     u64,
  pub table:   Table,
  pub kind:    ChangeKind,
  /// Primary key of the changed row.
  pub row_id:  Uuid,
  /// The poll the row belongs to (the row's own id for `polls`).
  pub poll_id: Uuid,
}

// ─── Filters ─────────────────────────────────────────────────────────────────

/// Which rows of a table a filter admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowFilter {
  Any,
  /// Rows whose `poll_id` column equals the value.
  PollId(Uuid),
  /// The row with this primary key.
  RowId(Uuid),
}

/// A subscription scope: one table, a row predicate, and the operation kinds
/// of interest (empty means all three).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFilter {
  pub table: Table,
  pub rows:  RowFilter,
  pub kinds: Vec<ChangeKind>,
}

impl ChangeFilter {
  pub fn new(table: Table) -> Self {
    Self { table, rows: RowFilter::Any, kinds: Vec::new() }
  }

  pub fn rows(mut self, rows: RowFilter) -> Self {
    self.rows = rows;
    self
  }

  pub fn kinds(mut self, kinds: &[ChangeKind]) -> Self {
    self.kinds = kinds.to_vec();
    self
  }

  pub fn matches(&self, event: &ChangeEvent) -> bool {
    if event.table != self.table {
      return false;
    }
    if !self.kinds.is_empty() && !self.kinds.contains(&event.kind) {
      return false;
    }
    match self.rows {
      RowFilter::Any => true,
      RowFilter::PollId(id) => event.poll_id == id,
      RowFilter::RowId(id) => event.row_id == id,
    }
  }
}

// ─── Transport ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Error)]
#[error("change feed is closed")]
pub struct FeedClosed;

/// A pub/sub source of row-level change events.
pub trait ChangeFeed: Send + Sync {
  /// Open a stream admitting events that match any of `filters`. Dropping
  /// the stream releases it.
  fn open(&self, filters: Vec<ChangeFilter>) -> Result<ChangeStream, FeedClosed>;
}

/// What a stream yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
  Change(ChangeEvent),
  /// The receiver fell behind and this many events were discarded unseen.
  Missed(u64),
}

/// A filtered view over a broadcast of every change event.
#[derive(Debug)]
pub struct ChangeStream {
  rx:      broadcast::Receiver<ChangeEvent>,
  filters: Vec<ChangeFilter>,
}

impl ChangeStream {
  pub fn new(
    rx: broadcast::Receiver<ChangeEvent>,
    filters: Vec<ChangeFilter>,
  ) -> Self {
    Self { rx, filters }
  }

  pub fn filters(&self) -> &[ChangeFilter] { &self.filters }

  fn admits(&self, event: &ChangeEvent) -> bool {
    self.filters.is_empty() || self.filters.iter().any(|f| f.matches(event))
  }

  /// Wait for the next admitted event. Returns `None` once the feed closes.
  pub async fn recv(&mut self) -> Option<Notice> {
    loop {
      match self.rx.recv().await {
        Ok(event) if self.admits(&event) => return Some(Notice::Change(event)),
        Ok(_) => continue,
        Err(RecvError::Lagged(n)) => return Some(Notice::Missed(n)),
        Err(RecvError::Closed) => return None,
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn event(table: Table, kind: ChangeKind, poll_id: Uuid) -> ChangeEvent {
    ChangeEvent { seq: 1, table, kind, row_id: Uuid::new_v4(), poll_id }
  }

  #[test]
  fn filter_checks_table_kind_and_rows() {
    let poll = Uuid::new_v4();
    let filter = ChangeFilter::new(Table::PollOptions).rows(RowFilter::PollId(poll));

    assert!(filter.matches(&event(Table::PollOptions, ChangeKind::Update, poll)));
    assert!(filter.matches(&event(Table::PollOptions, ChangeKind::Delete, poll)));
    assert!(!filter.matches(&event(Table::PollOptions, ChangeKind::Update, Uuid::new_v4())));
    assert!(!filter.matches(&event(Table::Polls, ChangeKind::Update, poll)));

    let inserts = ChangeFilter::new(Table::Polls).kinds(&[ChangeKind::Insert]);
    assert!(inserts.matches(&event(Table::Polls, ChangeKind::Insert, poll)));
    assert!(!inserts.matches(&event(Table::Polls, ChangeKind::Update, poll)));
  }

  #[test]
  fn row_filter_matches_primary_key() {
    let poll = Uuid::new_v4();
    let filter = ChangeFilter::new(Table::Polls).rows(RowFilter::RowId(poll));
    let mut ev = event(Table::Polls, ChangeKind::Update, poll);
    ev.row_id = poll;
    assert!(filter.matches(&ev));
    ev.row_id = Uuid::new_v4();
    assert!(!filter.matches(&ev));
  }

  #[test]
  fn table_and_kind_names_roundtrip() {
    for t in [Table::Polls, Table::PollOptions, Table::Votes, Table::Likes] {
      assert_eq!(Table::parse(t.as_str()), Some(t));
    }
    assert_eq!(ChangeKind::parse("update"), Some(ChangeKind::Update));
    assert_eq!(ChangeKind::parse("truncate"), None);
  }

  #[tokio::test]
  async fn stream_skips_unmatched_and_reports_lag() {
    let (tx, rx) = broadcast::channel(2);
    let poll = Uuid::new_v4();
    let mut stream = ChangeStream::new(
      rx,
      vec![ChangeFilter::new(Table::Likes).rows(RowFilter::PollId(poll))],
    );

    tx.send(event(Table::Votes, ChangeKind::Insert, poll)).unwrap();
    tx.send(event(Table::Likes, ChangeKind::Insert, poll)).unwrap();
    match stream.recv().await {
      Some(Notice::Change(ev)) => assert_eq!(ev.table, Table::Likes),
      other => panic!("unexpected {other:?}"),
    }

    for _ in 0..3 {
      tx.send(event(Table::Likes, ChangeKind::Delete, poll)).unwrap();
    }
    assert_eq!(stream.recv().await, Some(Notice::Missed(1)));

    drop(tx);
    assert!(matches!(stream.recv().await, Some(Notice::Change(_))));
    assert!(matches!(stream.recv().await, Some(Notice::Change(_))));
    assert_eq!(stream.recv().await, None);
  }
}
