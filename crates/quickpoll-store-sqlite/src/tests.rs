//! Integration tests for `SqliteStore` against in-memory and on-disk
//! databases.

use std::time::Duration;

use quickpoll_core::{
  SessionId,
  change::{ChangeFeed, ChangeFilter, ChangeKind, Notice, RowFilter, Table},
  store::{PollStore, StoreFailure},
};
use uuid::Uuid;

use crate::{RelayOptions, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

async fn color_poll(s: &SqliteStore) -> (Uuid, Uuid, Uuid) {
  let (poll, options) = s
    .insert_poll_with_options("Best color?".into(), vec!["Red".into(), "Blue".into()])
    .await
    .unwrap();
  (poll.poll_id, options[0].option_id, options[1].option_id)
}

async fn next_change(stream: &mut quickpoll_core::change::ChangeStream) -> Notice {
  tokio::time::timeout(Duration::from_secs(2), stream.recv())
    .await
    .expect("change within timeout")
    .expect("feed still open")
}

// ─── Polls and options ───────────────────────────────────────────────────────

#[tokio::test]
async fn insert_and_get_poll() {
  let s = store().await;
  let poll = s.insert_poll("Lunch?".into()).await.unwrap();
  assert_eq!(poll.likes_count, 0);

  let fetched = s.get_poll(poll.poll_id).await.unwrap().unwrap();
  assert_eq!(fetched, poll);
  assert!(s.get_poll(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn list_polls_newest_first() {
  let s = store().await;
  let first = s.insert_poll("first".into()).await.unwrap();
  let second = s.insert_poll("second".into()).await.unwrap();
  let third = s.insert_poll("third".into()).await.unwrap();

  let ids: Vec<Uuid> = s
    .list_polls()
    .await
    .unwrap()
    .into_iter()
    .map(|p| p.poll_id)
    .collect();
  assert_eq!(ids, vec![third.poll_id, second.poll_id, first.poll_id]);
}

#[tokio::test]
async fn options_keep_insertion_order() {
  let s = store().await;
  let poll = s.insert_poll("Q".into()).await.unwrap();
  s.insert_options(poll.poll_id, vec!["c".into(), "a".into(), "b".into()])
    .await
    .unwrap();
  s.insert_options(poll.poll_id, vec!["d".into()]).await.unwrap();

  let texts: Vec<String> = s
    .list_options(Some(poll.poll_id))
    .await
    .unwrap()
    .into_iter()
    .map(|o| o.option_text)
    .collect();
  assert_eq!(texts, ["c", "a", "b", "d"]);
}

#[tokio::test]
async fn list_options_without_poll_returns_everything() {
  let s = store().await;
  color_poll(&s).await;
  color_poll(&s).await;
  assert_eq!(s.list_options(None).await.unwrap().len(), 4);
}

#[tokio::test]
async fn options_for_missing_poll_are_rejected() {
  let s = store().await;
  let err = s
    .insert_options(Uuid::new_v4(), vec!["a".into(), "b".into()])
    .await
    .unwrap_err();
  assert!(err.is_constraint_violation());
  assert!(!err.is_unique_violation());
}

#[tokio::test]
async fn combined_insert_is_all_or_nothing() {
  let s = store().await;
  let err = s
    .insert_poll_with_options("Q".into(), vec!["ok".into(), "   ".into()])
    .await
    .unwrap_err();
  assert!(err.is_constraint_violation());
  assert!(s.list_polls().await.unwrap().is_empty());
  assert!(s.list_options(None).await.unwrap().is_empty());
}

// ─── Votes ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn vote_increments_option_count() {
  let s = store().await;
  let (poll_id, red, blue) = color_poll(&s).await;
  let alice = SessionId::from("alice");

  let vote = s.insert_vote(poll_id, red, &alice).await.unwrap();
  assert_eq!(vote.option_id, red);

  let options = s.list_options(Some(poll_id)).await.unwrap();
  let count = |id: Uuid| options.iter().find(|o| o.option_id == id).unwrap().votes_count;
  assert_eq!(count(red), 1);
  assert_eq!(count(blue), 0);

  let found = s.find_vote(poll_id, &alice).await.unwrap().unwrap();
  assert_eq!(found, vote);
  assert!(
    s.find_vote(poll_id, &SessionId::from("bob"))
      .await
      .unwrap()
      .is_none()
  );
}

#[tokio::test]
async fn second_vote_is_a_unique_violation() {
  let s = store().await;
  let (poll_id, red, blue) = color_poll(&s).await;
  let alice = SessionId::from("alice");

  s.insert_vote(poll_id, red, &alice).await.unwrap();
  let err = s.insert_vote(poll_id, blue, &alice).await.unwrap_err();
  assert!(err.is_unique_violation());

  assert_eq!(s.count_votes(poll_id).await.unwrap(), 1);
  let total: u64 = s
    .list_options(Some(poll_id))
    .await
    .unwrap()
    .iter()
    .map(|o| o.votes_count)
    .sum();
  assert_eq!(total, 1);
}

#[tokio::test]
async fn vote_for_another_polls_option_is_rejected() {
  let s = store().await;
  let (poll_a, _, _) = color_poll(&s).await;
  let (_, foreign, _) = color_poll(&s).await;

  let err = s
    .insert_vote(poll_a, foreign, &SessionId::from("alice"))
    .await
    .unwrap_err();
  assert!(err.is_constraint_violation());
  assert!(!err.is_unique_violation());
  assert_eq!(s.count_votes(poll_a).await.unwrap(), 0);
}

#[tokio::test]
async fn option_counts_match_vote_rows() {
  let s = store().await;
  let (poll_id, red, blue) = color_poll(&s).await;

  for (i, option) in [red, blue, red, red, blue].into_iter().enumerate() {
    s.insert_vote(poll_id, option, &SessionId::from(format!("s{i}")))
      .await
      .unwrap();
  }
  // Rejected duplicates must not move the counters.
  let _ = s.insert_vote(poll_id, blue, &SessionId::from("s0")).await;

  let sum: u64 = s
    .list_options(Some(poll_id))
    .await
    .unwrap()
    .iter()
    .map(|o| o.votes_count)
    .sum();
  assert_eq!(sum as i64, s.count_votes(poll_id).await.unwrap());
  assert_eq!(sum, 5);
}

// ─── Likes ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn like_and_unlike_move_the_counter() {
  let s = store().await;
  let (poll_id, _, _) = color_poll(&s).await;
  let bob = SessionId::from("bob");

  s.insert_like(poll_id, &bob).await.unwrap();
  assert_eq!(s.get_poll(poll_id).await.unwrap().unwrap().likes_count, 1);
  assert!(s.find_like(poll_id, &bob).await.unwrap().is_some());

  let err = s.insert_like(poll_id, &bob).await.unwrap_err();
  assert!(err.is_unique_violation());
  assert_eq!(s.get_poll(poll_id).await.unwrap().unwrap().likes_count, 1);

  assert!(s.delete_like(poll_id, &bob).await.unwrap());
  assert_eq!(s.get_poll(poll_id).await.unwrap().unwrap().likes_count, 0);
  assert!(s.find_like(poll_id, &bob).await.unwrap().is_none());

  assert!(!s.delete_like(poll_id, &bob).await.unwrap());
  assert_eq!(s.get_poll(poll_id).await.unwrap().unwrap().likes_count, 0);
}

// ─── Change feed ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn vote_emits_option_update_for_its_poll() {
  let s = store().await;
  let (poll_id, red, _) = color_poll(&s).await;
  let (other_poll, other_red, _) = color_poll(&s).await;

  let mut stream = s
    .feed()
    .open(vec![
      ChangeFilter::new(Table::PollOptions)
        .rows(RowFilter::PollId(poll_id))
        .kinds(&[ChangeKind::Update]),
    ])
    .unwrap();

  s.insert_vote(other_poll, other_red, &SessionId::from("a"))
    .await
    .unwrap();
  s.insert_vote(poll_id, red, &SessionId::from("a")).await.unwrap();

  match next_change(&mut stream).await {
    Notice::Change(ev) => {
      assert_eq!(ev.table, Table::PollOptions);
      assert_eq!(ev.kind, ChangeKind::Update);
      assert_eq!(ev.poll_id, poll_id);
      assert_eq!(ev.row_id, red);
    }
    other => panic!("unexpected {other:?}"),
  }
}

#[tokio::test]
async fn like_emits_poll_row_update() {
  let s = store().await;
  let (poll_id, _, _) = color_poll(&s).await;

  let mut stream = s
    .feed()
    .open(vec![
      ChangeFilter::new(Table::Polls)
        .rows(RowFilter::RowId(poll_id))
        .kinds(&[ChangeKind::Update]),
    ])
    .unwrap();

  s.insert_like(poll_id, &SessionId::from("b")).await.unwrap();
  assert!(matches!(
    next_change(&mut stream).await,
    Notice::Change(ev) if ev.kind == ChangeKind::Update && ev.row_id == poll_id
  ));

  s.delete_like(poll_id, &SessionId::from("b")).await.unwrap();
  assert!(matches!(
    next_change(&mut stream).await,
    Notice::Change(ev) if ev.kind == ChangeKind::Update
  ));
}

#[tokio::test]
async fn poll_insert_reaches_global_listeners() {
  let s = store().await;
  let mut stream = s
    .feed()
    .open(vec![ChangeFilter::new(Table::Polls).kinds(&[ChangeKind::Insert])])
    .unwrap();

  let (poll_id, _, _) = color_poll(&s).await;
  match next_change(&mut stream).await {
    Notice::Change(ev) => assert_eq!(ev.poll_id, poll_id),
    other => panic!("unexpected {other:?}"),
  }
}

#[tokio::test]
async fn changes_from_another_connection_are_relayed() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("polls.db");
  let options = RelayOptions {
    interval: Duration::from_millis(20),
    ..RelayOptions::default()
  };

  let watcher = SqliteStore::open_with(&path, options.clone()).await.unwrap();
  let writer = SqliteStore::open_with(&path, options).await.unwrap();

  let mut stream = watcher
    .feed()
    .open(vec![ChangeFilter::new(Table::Polls).kinds(&[ChangeKind::Insert])])
    .unwrap();

  let poll = writer.insert_poll("elsewhere".into()).await.unwrap();
  match next_change(&mut stream).await {
    Notice::Change(ev) => assert_eq!(ev.poll_id, poll.poll_id),
    other => panic!("unexpected {other:?}"),
  }
}

#[tokio::test]
async fn dropping_the_store_closes_its_feed() {
  let s = store().await;
  let feed = s.feed();
  let mut stream = feed.open(vec![]).unwrap();
  assert_eq!(feed.listener_count(), 1);

  drop(s);
  assert!(feed.is_closed());
  assert!(feed.open(vec![]).is_err());
  assert_eq!(
    tokio::time::timeout(Duration::from_secs(1), stream.recv())
      .await
      .unwrap(),
    None
  );
}

#[tokio::test]
async fn dropped_streams_release_their_slot() {
  let s = store().await;
  let feed = s.feed();
  let a = feed.open(vec![]).unwrap();
  let b = feed.open(vec![]).unwrap();
  assert_eq!(feed.listener_count(), 2);
  drop(a);
  drop(b);
  assert_eq!(feed.listener_count(), 0);
}
