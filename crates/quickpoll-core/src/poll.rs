//! Poll entities and the aggregate shape that flows to observers.
//!
//! `votes_count` and `likes_count` are maintained by the store. Nothing in
//! the client ever derives them from raw vote or like rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{SessionId, ValidationError};

/// Fewest options a poll may carry.
pub const MIN_OPTIONS: usize = 2;
/// Most options a poll may carry.
pub const MAX_OPTIONS: usize = 6;

// ─── Rows ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
  pub poll_id:     Uuid,
  pub title:       String,
  /// Number of like rows for this poll; store-maintained.
  pub likes_count: u64,
  pub created_at:  DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOption {
  pub option_id:   Uuid,
  pub poll_id:     Uuid,
  pub option_text: String,
  /// Number of vote rows naming this option; store-maintained.
  pub votes_count: u64,
  pub created_at:  DateTime<Utc>,
}

/// One session's vote on one poll. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
  pub vote_id:    Uuid,
  pub poll_id:    Uuid,
  pub option_id:  Uuid,
  pub session_id: SessionId,
  pub created_at: DateTime<Utc>,
}

/// Presence means the session likes the poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Like {
  pub like_id:    Uuid,
  pub poll_id:    Uuid,
  pub session_id: SessionId,
  pub created_at: DateTime<Utc>,
}

// ─── Aggregate ───────────────────────────────────────────────────────────────

/// Everything a viewer needs to render one poll, as last re-fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollAggregate {
  pub poll:    Poll,
  /// Ordered by creation, oldest first.
  pub options: Vec<PollOption>,
}

impl PollAggregate {
  pub fn poll_id(&self) -> Uuid { self.poll.poll_id }

  pub fn total_votes(&self) -> u64 {
    self.options.iter().map(|o| o.votes_count).sum()
  }

  pub fn option(&self, option_id: Uuid) -> Option<&PollOption> {
    self.options.iter().find(|o| o.option_id == option_id)
  }

  /// Group a flat option list under the polls it belongs to. Polls keep their
  /// given order; options keep theirs.
  pub fn group(polls: Vec<Poll>, options: Vec<PollOption>) -> Vec<Self> {
    let mut aggregates: Vec<Self> = polls
      .into_iter()
      .map(|poll| Self { poll, options: Vec::new() })
      .collect();

    for option in options {
      if let Some(agg) = aggregates
        .iter_mut()
        .find(|a| a.poll.poll_id == option.poll_id)
      {
        agg.options.push(option);
      }
    }

    aggregates
  }
}

// ─── Drafts ──────────────────────────────────────────────────────────────────

/// User input for a new poll, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollDraft {
  pub title:   String,
  pub options: Vec<String>,
}

/// A draft that passed validation: trimmed title, 2–6 trimmed non-blank
/// options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidPoll {
  title:   String,
  options: Vec<String>,
}

impl PollDraft {
  pub fn new(
    title: impl Into<String>,
    options: impl IntoIterator<Item = impl Into<String>>,
  ) -> Self {
    Self {
      title:   title.into(),
      options: options.into_iter().map(Into::into).collect(),
    }
  }

  /// Trim the input, drop blank options, and check the option count.
  pub fn validate(self) -> Result<ValidPoll, ValidationError> {
    let title = self.title.trim().to_owned();
    if title.is_empty() {
      return Err(ValidationError::EmptyTitle);
    }

    let options: Vec<String> = self
      .options
      .iter()
      .map(|o| o.trim())
      .filter(|o| !o.is_empty())
      .map(str::to_owned)
      .collect();

    if options.len() < MIN_OPTIONS {
      return Err(ValidationError::TooFewOptions {
        given: options.len(),
        min:   MIN_OPTIONS,
      });
    }
    if options.len() > MAX_OPTIONS {
      return Err(ValidationError::TooManyOptions {
        given: options.len(),
        max:   MAX_OPTIONS,
      });
    }

    Ok(ValidPoll { title, options })
  }
}

impl ValidPoll {
  pub fn title(&self) -> &str { &self.title }

  pub fn options(&self) -> &[String] { &self.options }

  pub fn into_parts(self) -> (String, Vec<String>) {
    (self.title, self.options)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn validate_trims_and_drops_blank_options() {
    let valid = PollDraft::new("  Best color?  ", ["Red ", "", "   ", " Blue"])
      .validate()
      .unwrap();
    assert_eq!(valid.title(), "Best color?");
    assert_eq!(valid.options(), &["Red", "Blue"]);
  }

  #[test]
  fn validate_rejects_blank_title() {
    let err = PollDraft::new("   ", ["a", "b"]).validate().unwrap_err();
    assert_eq!(err, ValidationError::EmptyTitle);
  }

  #[test]
  fn validate_counts_only_filled_options() {
    let err = PollDraft::new("Q", ["a", " "]).validate().unwrap_err();
    assert_eq!(err, ValidationError::TooFewOptions { given: 1, min: 2 });
  }

  #[test]
  fn validate_caps_option_count() {
    let err = PollDraft::new("Q", ["1", "2", "3", "4", "5", "6", "7"])
      .validate()
      .unwrap_err();
    assert_eq!(err, ValidationError::TooManyOptions { given: 7, max: 6 });

    assert!(
      PollDraft::new("Q", ["1", "2", "3", "4", "5", "6"])
        .validate()
        .is_ok()
    );
  }

  #[test]
  fn group_assigns_options_to_their_poll() {
    let now = Utc::now();
    let poll = |title: &str| Poll {
      poll_id: Uuid::new_v4(),
      title: title.into(),
      likes_count: 0,
      created_at: now,
    };
    let a = poll("a");
    let b = poll("b");
    let option = |poll_id: Uuid, text: &str| PollOption {
      option_id: Uuid::new_v4(),
      poll_id,
      option_text: text.into(),
      votes_count: 1,
      created_at: now,
    };

    let grouped = PollAggregate::group(
      vec![b.clone(), a.clone()],
      vec![
        option(a.poll_id, "a1"),
        option(b.poll_id, "b1"),
        option(a.poll_id, "a2"),
        option(Uuid::new_v4(), "stray"),
      ],
    );

    assert_eq!(grouped.len(), 2);
    assert_eq!(grouped[0].poll, b);
    assert_eq!(grouped[0].options.len(), 1);
    assert_eq!(grouped[1].options[1].option_text, "a2");
    assert_eq!(grouped[1].total_votes(), 2);
  }
}
