//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (microseconds, `Z`)
//! so that lexical order equals chronological order. UUIDs are stored as
//! hyphenated lowercase strings.

use chrono::{DateTime, SecondsFormat, Utc};
use quickpoll_core::{
  SessionId,
  change::{ChangeEvent, ChangeKind, Table},
  poll::{Like, Poll, PollOption, Vote},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn decode_count(n: i64) -> Result<u64> {
  u64::try_from(n).map_err(|_| Error::Decode(format!("negative count {n}")))
}

// ─── Raw rows ────────────────────────────────────────────────────────────────

pub const POLL_COLUMNS: &str = "poll_id, title, likes_count, created_at";

pub struct RawPoll {
  pub poll_id:     String,
  pub title:       String,
  pub likes_count: i64,
  pub created_at:  String,
}

impl RawPoll {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      poll_id:     row.get(0)?,
      title:       row.get(1)?,
      likes_count: row.get(2)?,
      created_at:  row.get(3)?,
    })
  }

  pub fn into_poll(self) -> Result<Poll> {
    Ok(Poll {
      poll_id:     decode_uuid(&self.poll_id)?,
      title:       self.title,
      likes_count: decode_count(self.likes_count)?,
      created_at:  decode_dt(&self.created_at)?,
    })
  }
}

pub const OPTION_COLUMNS: &str =
  "option_id, poll_id, option_text, votes_count, created_at";

pub struct RawOption {
  pub option_id:   String,
  pub poll_id:     String,
  pub option_text: String,
  pub votes_count: i64,
  pub created_at:  String,
}

impl RawOption {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      option_id:   row.get(0)?,
      poll_id:     row.get(1)?,
      option_text: row.get(2)?,
      votes_count: row.get(3)?,
      created_at:  row.get(4)?,
    })
  }

  pub fn into_option(self) -> Result<PollOption> {
    Ok(PollOption {
      option_id:   decode_uuid(&self.option_id)?,
      poll_id:     decode_uuid(&self.poll_id)?,
      option_text: self.option_text,
      votes_count: decode_count(self.votes_count)?,
      created_at:  decode_dt(&self.created_at)?,
    })
  }
}

pub const VOTE_COLUMNS: &str = "vote_id, poll_id, option_id, session_id, created_at";

pub struct RawVote {
  pub vote_id:    String,
  pub poll_id:    String,
  pub option_id:  String,
  pub session_id: String,
  pub created_at: String,
}

impl RawVote {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      vote_id:    row.get(0)?,
      poll_id:    row.get(1)?,
      option_id:  row.get(2)?,
      session_id: row.get(3)?,
      created_at: row.get(4)?,
    })
  }

  pub fn into_vote(self) -> Result<Vote> {
    Ok(Vote {
      vote_id:    decode_uuid(&self.vote_id)?,
      poll_id:    decode_uuid(&self.poll_id)?,
      option_id:  decode_uuid(&self.option_id)?,
      session_id: SessionId::from(self.session_id),
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

pub const LIKE_COLUMNS: &str = "like_id, poll_id, session_id, created_at";

pub struct RawLike {
  pub like_id:    String,
  pub poll_id:    String,
  pub session_id: String,
  pub created_at: String,
}

impl RawLike {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      like_id:    row.get(0)?,
      poll_id:    row.get(1)?,
      session_id: row.get(2)?,
      created_at: row.get(3)?,
    })
  }

  pub fn into_like(self) -> Result<Like> {
    Ok(Like {
      like_id:    decode_uuid(&self.like_id)?,
      poll_id:    decode_uuid(&self.poll_id)?,
      session_id: SessionId::from(self.session_id),
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

pub struct RawChange {
  pub seq:        i64,
  pub table_name: String,
  pub kind:       String,
  pub row_id:     String,
  pub poll_id:    String,
}

impl RawChange {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      seq:        row.get(0)?,
      table_name: row.get(1)?,
      kind:       row.get(2)?,
      row_id:     row.get(3)?,
      poll_id:    row.get(4)?,
    })
  }

  pub fn into_event(self) -> Result<ChangeEvent> {
    Ok(ChangeEvent {
      seq:     decode_count(self.seq)?,
      table:   Table::parse(&self.table_name)
        .ok_or_else(|| Error::Decode(format!("unknown table {:?}", self.table_name)))?,
      kind:    ChangeKind::parse(&self.kind)
        .ok_or_else(|| Error::Decode(format!("unknown change kind {:?}", self.kind)))?,
      row_id:  decode_uuid(&self.row_id)?,
      poll_id: decode_uuid(&self.poll_id)?,
    })
  }
}
