//! The change transport: a relay task tailing `change_log` and a
//! [`ChangeHub`] broadcasting what it finds.
//!
//! Triggers write the log, so the relay sees changes made by any process
//! sharing the database file. Local writes nudge the relay for immediate
//! delivery; everything else is picked up on the polling interval.

use std::{
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
  },
  time::Duration,
};

use quickpoll_core::change::{
  ChangeEvent, ChangeFeed, ChangeFilter, ChangeStream, FeedClosed,
};
use tokio::sync::{Notify, broadcast};

use crate::{Result, encode::RawChange};

/// Rows read from the log per pass.
const BATCH: usize = 512;

/// Tuning knobs for the relay.
#[derive(Debug, Clone)]
pub struct RelayOptions {
  /// How often to look for changes written by other connections.
  pub interval:  Duration,
  /// Log rows kept behind the newest delivered one.
  pub retention: u64,
  /// Per-listener buffer; a listener that falls further behind skips ahead.
  pub capacity:  usize,
}

impl Default for RelayOptions {
  fn default() -> Self {
    Self {
      interval:  Duration::from_millis(250),
      retention: 10_000,
      capacity:  1024,
    }
  }
}

// ─── Hub ─────────────────────────────────────────────────────────────────────

/// Fan-out point for change events. Cloning is cheap; every clone shares the
/// same listeners.
#[derive(Debug, Clone)]
pub struct ChangeHub {
  sender: Arc<Mutex<Option<broadcast::Sender<ChangeEvent>>>>,
}

impl ChangeHub {
  pub fn new(capacity: usize) -> Self {
    let (sender, _) = broadcast::channel(capacity.max(1));
    Self { sender: Arc::new(Mutex::new(Some(sender))) }
  }

  /// Deliver an event to every open stream. Returns how many streams were
  /// reached.
  pub fn publish(&self, event: ChangeEvent) -> usize {
    let Ok(guard) = self.sender.lock() else { return 0 };
    guard
      .as_ref()
      .and_then(|s| s.send(event).ok())
      .unwrap_or(0)
  }

  /// Number of streams currently open on this hub.
  pub fn listener_count(&self) -> usize {
    self
      .sender
      .lock()
      .ok()
      .and_then(|g| g.as_ref().map(broadcast::Sender::receiver_count))
      .unwrap_or(0)
  }

  /// End every open stream and refuse new ones.
  pub fn close(&self) {
    if let Ok(mut guard) = self.sender.lock() {
      guard.take();
    }
  }

  pub fn is_closed(&self) -> bool {
    self.sender.lock().map(|g| g.is_none()).unwrap_or(true)
  }
}

impl ChangeFeed for ChangeHub {
  fn open(&self, filters: Vec<ChangeFilter>) -> Result<ChangeStream, FeedClosed> {
    let guard = self.sender.lock().map_err(|_| FeedClosed)?;
    let sender = guard.as_ref().ok_or(FeedClosed)?;
    Ok(ChangeStream::new(sender.subscribe(), filters))
  }
}

// ─── Relay ───────────────────────────────────────────────────────────────────

/// Shared by every clone of a store. Dropping the last clone stops the relay
/// and closes the hub.
pub(crate) struct RelayGuard {
  hub:   ChangeHub,
  nudge: Arc<Notify>,
  stop:  Arc<AtomicBool>,
}

impl RelayGuard {
  pub fn hub(&self) -> &ChangeHub { &self.hub }

  /// Ask the relay to look at the log now.
  pub fn nudge(&self) { self.nudge.notify_one(); }
}

impl Drop for RelayGuard {
  fn drop(&mut self) {
    self.stop.store(true, Ordering::Release);
    self.nudge.notify_one();
    self.hub.close();
  }
}

/// Start tailing the log from its current end.
pub(crate) async fn start(
  conn: tokio_rusqlite::Connection,
  options: RelayOptions,
) -> Result<RelayGuard> {
  let cursor: i64 = conn
    .call(|conn| {
      Ok(conn.query_row("SELECT COALESCE(MAX(seq), 0) FROM change_log", [], |r| {
        r.get(0)
      })?)
    })
    .await?;

  let guard = RelayGuard {
    hub:   ChangeHub::new(options.capacity),
    nudge: Arc::new(Notify::new()),
    stop:  Arc::new(AtomicBool::new(false)),
  };

  tokio::spawn(run(
    conn,
    guard.hub.clone(),
    guard.nudge.clone(),
    guard.stop.clone(),
    cursor,
    options,
  ));

  Ok(guard)
}

async fn run(
  conn: tokio_rusqlite::Connection,
  hub: ChangeHub,
  nudge: Arc<Notify>,
  stop: Arc<AtomicBool>,
  mut cursor: i64,
  options: RelayOptions,
) {
  tracing::debug!(cursor, "change relay started");

  loop {
    tokio::select! {
      () = nudge.notified() => {}
      () = tokio::time::sleep(options.interval) => {}
    }
    if stop.load(Ordering::Acquire) {
      break;
    }

    let rows = match read_batch(&conn, cursor, options.retention).await {
      Ok(rows) => rows,
      Err(e) => {
        tracing::warn!(error = %e, "change relay could not read the log");
        continue;
      }
    };

    let full = rows.len() == BATCH;
    for raw in rows {
      cursor = cursor.max(raw.seq);
      match raw.into_event() {
        Ok(event) => {
          hub.publish(event);
        }
        Err(e) => tracing::warn!(error = %e, "skipping undecodable change"),
      }
    }
    if full {
      nudge.notify_one();
    }
  }

  tracing::debug!(cursor, "change relay stopped");
}

async fn read_batch(
  conn: &tokio_rusqlite::Connection,
  cursor: i64,
  retention: u64,
) -> Result<Vec<RawChange>> {
  let horizon = cursor.saturating_sub(i64::try_from(retention).unwrap_or(i64::MAX));

  let rows = conn
    .call(move |conn| {
      if horizon > 0 {
        conn.execute("DELETE FROM change_log WHERE seq <= ?1", [horizon])?;
      }
      let mut stmt = conn.prepare(
        "SELECT seq, table_name, kind, row_id, poll_id
           FROM change_log
          WHERE seq > ?1
          ORDER BY seq
          LIMIT ?2",
      )?;
      let rows = stmt
        .query_map(rusqlite::params![cursor, BATCH as i64], RawChange::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
      Ok(rows)
    })
    .await?;

  Ok(rows)
}
