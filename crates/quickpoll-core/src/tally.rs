//! Vote percentages, computed fresh from the current aggregate on every
//! render.

use serde::Serialize;
use uuid::Uuid;

use crate::poll::PollAggregate;

/// `round(votes / total * 100)`, rounding halves up; 0 when nobody voted.
pub fn percentage(votes: u64, total: u64) -> u64 {
  if total == 0 {
    return 0;
  }
  // floor(v * 100 / t + 1/2) without leaving integer arithmetic.
  (votes.saturating_mul(200) + total) / total.saturating_mul(2)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionTally {
  pub option_id:  Uuid,
  pub text:       String,
  pub votes:      u64,
  pub percentage: u64,
}

/// Per-option counts and percentages for one poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollTally {
  pub poll_id:     Uuid,
  pub title:       String,
  pub likes:       u64,
  pub total_votes: u64,
  pub options:     Vec<OptionTally>,
}

impl PollTally {
  pub fn of(aggregate: &PollAggregate) -> Self {
    let total_votes = aggregate.total_votes();
    Self {
      poll_id: aggregate.poll.poll_id,
      title: aggregate.poll.title.clone(),
      likes: aggregate.poll.likes_count,
      total_votes,
      options: aggregate
        .options
        .iter()
        .map(|o| OptionTally {
          option_id:  o.option_id,
          text:       o.option_text.clone(),
          votes:      o.votes_count,
          percentage: percentage(o.votes_count, total_votes),
        })
        .collect(),
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::Utc;

  use super::*;
  use crate::poll::{Poll, PollOption};

  fn aggregate(counts: &[u64]) -> PollAggregate {
    let poll_id = Uuid::new_v4();
    PollAggregate {
      poll:    Poll {
        poll_id,
        title: "Q".into(),
        likes_count: 3,
        created_at: Utc::now(),
      },
      options: counts
        .iter()
        .enumerate()
        .map(|(i, &votes_count)| PollOption {
          option_id: Uuid::new_v4(),
          poll_id,
          option_text: format!("option {i}"),
          votes_count,
          created_at: Utc::now(),
        })
        .collect(),
    }
  }

  #[test]
  fn zero_total_gives_zero_everywhere() {
    let tally = PollTally::of(&aggregate(&[0, 0, 0]));
    assert_eq!(tally.total_votes, 0);
    assert!(tally.options.iter().all(|o| o.percentage == 0));
  }

  #[test]
  fn rounds_half_up() {
    assert_eq!(percentage(1, 8), 13); // 12.5
    assert_eq!(percentage(1, 3), 33);
    assert_eq!(percentage(2, 3), 67);
    assert_eq!(percentage(1, 1), 100);
    assert_eq!(percentage(0, 5), 0);
  }

  #[test]
  fn percentages_sum_to_about_one_hundred() {
    for counts in [
      vec![1, 0],
      vec![1, 1, 1],
      vec![2, 2, 3],
      vec![5, 7, 11, 13, 17, 19],
      vec![1, 1, 1, 1, 1, 1],
    ] {
      let tally = PollTally::of(&aggregate(&counts));
      let sum: u64 = tally.options.iter().map(|o| o.percentage).sum();
      let slack = tally.options.len() as u64;
      assert!(
        sum.abs_diff(100) <= slack,
        "{counts:?} summed to {sum}"
      );
    }
  }

  #[test]
  fn tally_carries_counts_and_likes() {
    let tally = PollTally::of(&aggregate(&[1, 0]));
    assert_eq!(tally.likes, 3);
    assert_eq!(tally.total_votes, 1);
    assert_eq!(tally.options[0].percentage, 100);
    assert_eq!(tally.options[1].percentage, 0);
  }
}
