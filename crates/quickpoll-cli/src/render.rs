//! Plain-text poll cards and user-facing notices.

use std::fmt::Write as _;

use quickpoll_core::{Error, ValidationError, poll::PollAggregate, tally::PollTally};
use quickpoll_live::VoterState;

pub const VOTE_RECORDED: &str = "Vote recorded!";
pub const ALREADY_VOTED: &str = "You've already voted on this poll";
pub const POLL_CREATED: &str = "Poll created successfully!";

/// What to tell the user when a vote fails.
pub fn vote_failure(e: &Error) -> &'static str {
  match e {
    Error::DuplicateVote { .. } => ALREADY_VOTED,
    _ => "Failed to vote",
  }
}

pub fn like_failure(_: &Error) -> &'static str { "Failed to update like" }

/// What to tell the user when creating a poll fails.
pub fn create_failure(e: &Error) -> &'static str {
  match e {
    Error::Validation(ValidationError::EmptyTitle) => "Please enter a poll title",
    Error::Validation(ValidationError::TooFewOptions { .. }) => {
      "Please add at least 2 options"
    }
    Error::Validation(ValidationError::TooManyOptions { .. }) => {
      "A poll can have at most 6 options"
    }
    _ => "Failed to create poll",
  }
}

fn plural(n: u64, one: &str, many: &str) -> String {
  if n == 1 { format!("{n} {one}") } else { format!("{n} {many}") }
}

/// Render one poll. Counts and percentages only appear once the viewer has
/// voted.
pub fn poll_card(aggregate: &PollAggregate, voter: &VoterState) -> String {
  let tally = PollTally::of(aggregate);
  let mut out = String::new();

  let heart = if voter.has_liked { "♥" } else { "♡" };
  let _ = writeln!(out, "{}  {heart} {}", tally.title, tally.likes);
  let _ = writeln!(out, "  id {}", tally.poll_id);

  for (i, option) in tally.options.iter().enumerate() {
    let mut line = format!("  [{}] {}", i + 1, option.text);
    if voter.has_voted {
      let _ = write!(
        line,
        "  {}  {}%",
        plural(option.votes, "vote", "votes"),
        option.percentage
      );
      if voter.selected_option == Some(option.option_id) {
        line.push_str("  ✓ your vote");
      }
    }
    let _ = writeln!(out, "{line}");
  }

  if voter.has_voted {
    let _ = write!(out, "  {}", plural(tally.total_votes, "total vote", "total votes"));
  } else {
    out.truncate(out.trim_end_matches('\n').len());
  }
  out
}

#[cfg(test)]
mod tests {
  use chrono::Utc;
  use quickpoll_core::poll::{Poll, PollOption};
  use uuid::Uuid;

  use super::*;

  fn aggregate(counts: &[u64]) -> PollAggregate {
    let poll_id = Uuid::new_v4();
    let now = Utc::now();
    PollAggregate {
      poll:    Poll { poll_id, title: "Best color?".into(), likes_count: 2, created_at: now },
      options: counts
        .iter()
        .zip(["Red", "Blue", "Green"])
        .map(|(&votes_count, text)| PollOption {
          option_id: Uuid::new_v4(),
          poll_id,
          option_text: text.into(),
          votes_count,
          created_at: now,
        })
        .collect(),
    }
  }

  #[test]
  fn counts_are_hidden_until_voting() {
    let agg = aggregate(&[3, 1]);
    let card = poll_card(&agg, &VoterState::default());
    assert!(card.contains("[1] Red\n"));
    assert!(!card.contains('%'));
    assert!(!card.contains("total vote"));
    assert!(card.ends_with("[2] Blue"));
  }

  #[test]
  fn voter_sees_percentages_and_their_choice() {
    let agg = aggregate(&[3, 1]);
    let voter = VoterState {
      has_voted:       true,
      selected_option: Some(agg.options[1].option_id),
      has_liked:       true,
    };
    let card = poll_card(&agg, &voter);
    assert!(card.contains("[1] Red  3 votes  75%\n"));
    assert!(card.contains("[2] Blue  1 vote  25%  ✓ your vote"));
    assert!(card.contains("♥ 2"));
    assert!(card.ends_with("4 total votes"));
  }

  #[test]
  fn single_vote_footer_is_singular() {
    let agg = aggregate(&[1, 0]);
    let voter = VoterState {
      has_voted:       true,
      selected_option: Some(agg.options[0].option_id),
      has_liked:       false,
    };
    let card = poll_card(&agg, &voter);
    assert!(card.ends_with("  1 total vote"));
  }

  #[test]
  fn notices_follow_the_failure() {
    assert_eq!(
      vote_failure(&Error::DuplicateVote { poll_id: Uuid::nil() }),
      ALREADY_VOTED
    );
    assert_eq!(
      create_failure(&ValidationError::TooFewOptions { given: 1, min: 2 }.into()),
      "Please add at least 2 options"
    );
  }
}
