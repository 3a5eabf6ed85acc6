//! [`SqliteStore`]: the SQLite implementation of [`PollStore`].

use std::{path::Path, sync::Arc};

use chrono::Utc;
use quickpoll_core::{
  SessionId,
  poll::{Like, Poll, PollOption, Vote},
  store::PollStore,
};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use crate::{
  Result,
  encode::{
    LIKE_COLUMNS, OPTION_COLUMNS, POLL_COLUMNS, RawLike, RawOption, RawPoll,
    RawVote, VOTE_COLUMNS, encode_dt, encode_uuid,
  },
  relay::{self, ChangeHub, RelayGuard, RelayOptions},
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A QuickPoll store backed by a single SQLite file.
///
/// Cloning is cheap; the connection and the change relay are shared. The
/// relay stops and the hub closes once the last clone is dropped.
#[derive(Clone)]
pub struct SqliteStore {
  conn:  tokio_rusqlite::Connection,
  relay: Arc<RelayGuard>,
}

impl SqliteStore {
  /// Open (or create) a store at `path` with default relay settings.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    Self::open_with(path, RelayOptions::default()).await
  }

  pub async fn open_with(
    path: impl AsRef<Path>,
    options: RelayOptions,
  ) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn, options).await
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn, RelayOptions::default()).await
  }

  async fn init(
    conn: tokio_rusqlite::Connection,
    options: RelayOptions,
  ) -> Result<Self> {
    conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;

    let relay = relay::start(conn.clone(), options).await?;
    Ok(Self { conn, relay: Arc::new(relay) })
  }

  /// The change feed fed by this store's relay.
  pub fn feed(&self) -> ChangeHub { self.relay.hub().clone() }

  /// Number of vote rows recorded for a poll.
  #[cfg(test)]
  pub(crate) async fn count_votes(&self, poll_id: Uuid) -> Result<i64> {
    let id_str = encode_uuid(poll_id);
    let n = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT COUNT(*) FROM votes WHERE poll_id = ?1",
          [id_str],
          |r| r.get(0),
        )?)
      })
      .await?;
    Ok(n)
  }
}

/// Insert `options` after any existing ones for the same poll.
fn insert_option_rows(
  conn: &rusqlite::Connection,
  options: &[PollOption],
) -> rusqlite::Result<()> {
  let Some(first) = options.first() else { return Ok(()) };
  let poll_id_str = encode_uuid(first.poll_id);

  let next: i64 = conn.query_row(
    "SELECT COALESCE(MAX(position) + 1, 0) FROM poll_options WHERE poll_id = ?1",
    [&poll_id_str],
    |r| r.get(0),
  )?;

  let mut stmt = conn.prepare(
    "INSERT INTO poll_options
       (option_id, poll_id, option_text, votes_count, position, created_at)
     VALUES (?1, ?2, ?3, 0, ?4, ?5)",
  )?;
  for (offset, option) in (0_i64..).zip(options) {
    stmt.execute(rusqlite::params![
      encode_uuid(option.option_id),
      poll_id_str,
      option.option_text,
      next + offset,
      encode_dt(option.created_at),
    ])?;
  }
  Ok(())
}

fn new_options(poll_id: Uuid, texts: Vec<String>) -> Vec<PollOption> {
  let created_at = Utc::now();
  texts
    .into_iter()
    .map(|option_text| PollOption {
      option_id: Uuid::new_v4(),
      poll_id,
      option_text,
      votes_count: 0,
      created_at,
    })
    .collect()
}

fn new_poll(title: String) -> Poll {
  Poll {
    poll_id: Uuid::new_v4(),
    title,
    likes_count: 0,
    created_at: Utc::now(),
  }
}

// ─── PollStore impl ──────────────────────────────────────────────────────────

impl PollStore for SqliteStore {
  type Error = crate::Error;

  // ── Polls and options ─────────────────────────────────────────────────────

  async fn insert_poll(&self, title: String) -> Result<Poll> {
    let poll = new_poll(title);

    let id_str = encode_uuid(poll.poll_id);
    let title  = poll.title.clone();
    let at_str = encode_dt(poll.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO polls (poll_id, title, likes_count, created_at)
           VALUES (?1, ?2, 0, ?3)",
          rusqlite::params![id_str, title, at_str],
        )?;
        Ok(())
      })
      .await?;

    self.relay.nudge();
    Ok(poll)
  }

  async fn insert_options(
    &self,
    poll_id: Uuid,
    texts: Vec<String>,
  ) -> Result<Vec<PollOption>> {
    let options = new_options(poll_id, texts);
    let rows = options.clone();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        insert_option_rows(&tx, &rows)?;
        tx.commit()?;
        Ok(())
      })
      .await?;

    self.relay.nudge();
    Ok(options)
  }

  async fn insert_poll_with_options(
    &self,
    title: String,
    texts: Vec<String>,
  ) -> Result<(Poll, Vec<PollOption>)> {
    let poll = new_poll(title);
    let options = new_options(poll.poll_id, texts);

    let id_str = encode_uuid(poll.poll_id);
    let title  = poll.title.clone();
    let at_str = encode_dt(poll.created_at);
    let rows   = options.clone();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO polls (poll_id, title, likes_count, created_at)
           VALUES (?1, ?2, 0, ?3)",
          rusqlite::params![id_str, title, at_str],
        )?;
        insert_option_rows(&tx, &rows)?;
        tx.commit()?;
        Ok(())
      })
      .await?;

    self.relay.nudge();
    Ok((poll, options))
  }

  async fn get_poll(&self, poll_id: Uuid) -> Result<Option<Poll>> {
    let id_str = encode_uuid(poll_id);

    let raw: Option<RawPoll> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {POLL_COLUMNS} FROM polls WHERE poll_id = ?1"),
              [id_str],
              RawPoll::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawPoll::into_poll).transpose()
  }

  async fn list_polls(&self) -> Result<Vec<Poll>> {
    let raws: Vec<RawPoll> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {POLL_COLUMNS} FROM polls ORDER BY created_at DESC, rowid DESC"
        ))?;
        let rows = stmt
          .query_map([], RawPoll::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawPoll::into_poll).collect()
  }

  async fn list_options(&self, poll_id: Option<Uuid>) -> Result<Vec<PollOption>> {
    let id_str = poll_id.map(encode_uuid);

    let raws: Vec<RawOption> = self
      .conn
      .call(move |conn| {
        let rows = if let Some(id) = id_str {
          let mut stmt = conn.prepare(&format!(
            "SELECT {OPTION_COLUMNS} FROM poll_options
              WHERE poll_id = ?1
              ORDER BY created_at ASC, position ASC"
          ))?;
          stmt
            .query_map([id], RawOption::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
          let mut stmt = conn.prepare(&format!(
            "SELECT {OPTION_COLUMNS} FROM poll_options
              ORDER BY created_at ASC, poll_id, position ASC"
          ))?;
          stmt
            .query_map([], RawOption::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawOption::into_option).collect()
  }

  // ── Votes ─────────────────────────────────────────────────────────────────

  async fn insert_vote(
    &self,
    poll_id: Uuid,
    option_id: Uuid,
    session: &SessionId,
  ) -> Result<Vote> {
    let vote = Vote {
      vote_id: Uuid::new_v4(),
      poll_id,
      option_id,
      session_id: session.clone(),
      created_at: Utc::now(),
    };

    let vote_id_str   = encode_uuid(vote.vote_id);
    let poll_id_str   = encode_uuid(poll_id);
    let option_id_str = encode_uuid(option_id);
    let session_str   = session.as_str().to_owned();
    let at_str        = encode_dt(vote.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO votes (vote_id, poll_id, option_id, session_id, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![vote_id_str, poll_id_str, option_id_str, session_str, at_str],
        )?;
        Ok(())
      })
      .await?;

    self.relay.nudge();
    Ok(vote)
  }

  async fn find_vote(
    &self,
    poll_id: Uuid,
    session: &SessionId,
  ) -> Result<Option<Vote>> {
    let poll_id_str = encode_uuid(poll_id);
    let session_str = session.as_str().to_owned();

    let raw: Option<RawVote> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {VOTE_COLUMNS} FROM votes WHERE poll_id = ?1 AND session_id = ?2"
              ),
              [poll_id_str, session_str],
              RawVote::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawVote::into_vote).transpose()
  }

  // ── Likes ─────────────────────────────────────────────────────────────────

  async fn insert_like(&self, poll_id: Uuid, session: &SessionId) -> Result<Like> {
    let like = Like {
      like_id: Uuid::new_v4(),
      poll_id,
      session_id: session.clone(),
      created_at: Utc::now(),
    };

    let like_id_str = encode_uuid(like.like_id);
    let poll_id_str = encode_uuid(poll_id);
    let session_str = session.as_str().to_owned();
    let at_str      = encode_dt(like.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO likes (like_id, poll_id, session_id, created_at)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![like_id_str, poll_id_str, session_str, at_str],
        )?;
        Ok(())
      })
      .await?;

    self.relay.nudge();
    Ok(like)
  }

  async fn delete_like(&self, poll_id: Uuid, session: &SessionId) -> Result<bool> {
    let poll_id_str = encode_uuid(poll_id);
    let session_str = session.as_str().to_owned();

    let removed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM likes WHERE poll_id = ?1 AND session_id = ?2",
          [poll_id_str, session_str],
        )?)
      })
      .await?;

    if removed > 0 {
      self.relay.nudge();
    }
    Ok(removed > 0)
  }

  async fn find_like(
    &self,
    poll_id: Uuid,
    session: &SessionId,
  ) -> Result<Option<Like>> {
    let poll_id_str = encode_uuid(poll_id);
    let session_str = session.as_str().to_owned();

    let raw: Option<RawLike> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {LIKE_COLUMNS} FROM likes WHERE poll_id = ?1 AND session_id = ?2"
              ),
              [poll_id_str, session_str],
              RawLike::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawLike::into_like).transpose()
  }
}
