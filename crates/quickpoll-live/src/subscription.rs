//! Live channels: one per poll in view, plus the board channel that tracks
//! newly created polls.
//!
//! Channels are keyed by [`ChannelKey`] and shared. Asking for a channel that
//! is already open attaches another observer to it instead of opening a
//! second stream, and the channel is torn down when its last [`Watch`] is
//! dropped. A channel never patches its view from event contents; every
//! admitted event re-reads the affected aggregate through the [`Gateway`].

use std::{
  collections::HashMap,
  fmt,
  sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use quickpoll_core::{
  Result,
  change::{
    ChangeFeed, ChangeFilter, ChangeKind, ChangeStream, Notice, RowFilter, Table,
  },
  poll::PollAggregate,
  store::PollStore,
};
use tokio::{sync::watch, task::JoinHandle};
use uuid::Uuid;

use crate::Gateway;

// ─── Keys and states ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKey {
  /// New polls appearing anywhere.
  Board,
  /// Option counts and the poll row of one poll.
  Poll(Uuid),
}

impl fmt::Display for ChannelKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Board => f.write_str("polls-channel"),
      Self::Poll(id) => write!(f, "poll-{id}"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
  Unsubscribed,
  Subscribing,
  Active,
  /// The feed refused or ended the stream. The view keeps its last value.
  Error,
  Closed,
}

// ─── Registry ────────────────────────────────────────────────────────────────

enum View {
  Poll(watch::Receiver<PollAggregate>),
  Board(watch::Receiver<Vec<PollAggregate>>),
}

struct Slot {
  generation: u64,
  observers:  usize,
  task:       JoinHandle<()>,
  state:      Arc<watch::Sender<ChannelState>>,
  view:       View,
}

#[derive(Default)]
struct Registry {
  next_generation: u64,
  slots:           HashMap<ChannelKey, Slot>,
}

type SharedRegistry = Arc<Mutex<Registry>>;

/// A poisoned lock only means another observer panicked mid-update; the map
/// itself is still consistent.
fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
  registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Detach one observer; the last one out stops the channel.
fn release(registry: &Mutex<Registry>, key: ChannelKey, generation: u64) {
  let mut reg = lock(registry);
  let Some(slot) = reg.slots.get_mut(&key) else { return };
  if slot.generation != generation {
    return;
  }
  slot.observers = slot.observers.saturating_sub(1);
  if slot.observers > 0 {
    return;
  }
  if let Some(slot) = reg.slots.remove(&key) {
    slot.task.abort();
    slot.state.send_replace(ChannelState::Closed);
    tracing::info!(channel = %key, "channel closed");
  }
}

// ─── Watch handles ───────────────────────────────────────────────────────────

/// An observer's handle on a live channel. Dropping it unsubscribes.
pub struct Watch<T> {
  key:        ChannelKey,
  generation: u64,
  view:       watch::Receiver<T>,
  state:      watch::Receiver<ChannelState>,
  registry:   SharedRegistry,
}

pub type PollWatch = Watch<PollAggregate>;
pub type BoardWatch = Watch<Vec<PollAggregate>>;

impl<T: Clone> Watch<T> {
  pub fn key(&self) -> ChannelKey { self.key }

  /// The latest value, marking it seen.
  pub fn current(&mut self) -> T { self.view.borrow_and_update().clone() }

  /// The latest value without marking it seen.
  pub fn peek(&self) -> T { self.view.borrow().clone() }

  /// Whether a value newer than the last one seen is available.
  pub fn has_changed(&self) -> bool { self.view.has_changed().unwrap_or(false) }

  /// Wait for the view to change. Returns `false` once the channel has
  /// stopped and no further values can arrive.
  pub async fn changed(&mut self) -> bool { self.view.changed().await.is_ok() }

  /// Wait until the view satisfies `f` and return that value.
  pub async fn wait_for(&mut self, mut f: impl FnMut(&T) -> bool) -> Option<T> {
    self.view.wait_for(|v| f(v)).await.ok().map(|v| v.clone())
  }

  pub fn state(&self) -> ChannelState { *self.state.borrow() }

  /// Wait until the channel's state satisfies `f`.
  pub async fn wait_state(
    &mut self,
    mut f: impl FnMut(ChannelState) -> bool,
  ) -> ChannelState {
    let reached = self.state.wait_for(|s| f(*s)).await.map(|s| *s);
    reached.unwrap_or_else(|_| *self.state.borrow())
  }
}

impl<T> Drop for Watch<T> {
  fn drop(&mut self) { release(&self.registry, self.key, self.generation); }
}

// ─── Manager ─────────────────────────────────────────────────────────────────

pub struct Subscriptions<S, F> {
  gateway:  Arc<Gateway<S>>,
  feed:     Arc<F>,
  registry: SharedRegistry,
}

impl<S, F> Clone for Subscriptions<S, F> {
  fn clone(&self) -> Self {
    Self {
      gateway:  self.gateway.clone(),
      feed:     self.feed.clone(),
      registry: self.registry.clone(),
    }
  }
}

impl<S, F> Subscriptions<S, F>
where
  S: PollStore + 'static,
  F: ChangeFeed + 'static,
{
  pub fn new(gateway: Arc<Gateway<S>>, feed: Arc<F>) -> Self {
    Self { gateway, feed, registry: SharedRegistry::default() }
  }

  pub fn gateway(&self) -> &Arc<Gateway<S>> { &self.gateway }

  /// Number of channels currently open.
  pub fn channel_count(&self) -> usize {
    lock(&self.registry).slots.len()
  }

  /// Observers attached to the channel for `key`.
  pub fn observers(&self, key: ChannelKey) -> usize {
    lock(&self.registry)
      .slots
      .get(&key)
      .map_or(0, |s| s.observers)
  }

  pub fn state(&self, key: ChannelKey) -> ChannelState {
    lock(&self.registry)
      .slots
      .get(&key)
      .map_or(ChannelState::Unsubscribed, |s| *s.state.borrow())
  }

  /// Start observing a poll, seeded with an aggregate the caller already
  /// fetched. If the poll's channel is open the seed is ignored and the
  /// handle attaches to the existing view.
  pub fn watch_poll(&self, seed: PollAggregate) -> PollWatch {
    let poll_id = seed.poll_id();
    let key = ChannelKey::Poll(poll_id);
    let gateway = self.gateway.clone();
    let feed = self.feed.clone();

    self.attach(
      key,
      seed,
      |slot| match &slot.view {
        View::Poll(rx) => Some(rx.clone()),
        View::Board(_) => None,
      },
      View::Poll,
      move |view, state| run_poll(gateway, feed, poll_id, view, state),
    )
  }

  /// Fetch a poll and start observing it. `None` if it does not exist.
  pub async fn watch_poll_id(&self, poll_id: Uuid) -> Result<Option<PollWatch>> {
    Ok(
      self
        .gateway
        .fetch_aggregate(poll_id)
        .await?
        .map(|seed| self.watch_poll(seed)),
    )
  }

  /// Start observing the board, seeded with polls the caller already
  /// fetched.
  pub fn watch_board(&self, seed: Vec<PollAggregate>) -> BoardWatch {
    let gateway = self.gateway.clone();
    let feed = self.feed.clone();

    self.attach(
      ChannelKey::Board,
      seed,
      |slot| match &slot.view {
        View::Board(rx) => Some(rx.clone()),
        View::Poll(_) => None,
      },
      View::Board,
      move |view, state| run_board(gateway, feed, view, state),
    )
  }

  /// Fetch the board and start observing it.
  pub async fn open_board(&self) -> Result<BoardWatch> {
    let seed = self.gateway.fetch_board().await?;
    Ok(self.watch_board(seed))
  }

  /// Join the live channel for `key`, or open one when there is none (or
  /// the previous one has stopped).
  fn attach<T, Fut>(
    &self,
    key: ChannelKey,
    seed: T,
    existing: impl Fn(&Slot) -> Option<watch::Receiver<T>>,
    wrap: impl FnOnce(watch::Receiver<T>) -> View,
    task: impl FnOnce(watch::Sender<T>, Arc<watch::Sender<ChannelState>>) -> Fut,
  ) -> Watch<T>
  where
    Fut: Future<Output = ()> + Send + 'static,
  {
    let mut reg = lock(&self.registry);

    let live = reg
      .slots
      .get(&key)
      .filter(|slot| !slot.task.is_finished())
      .and_then(|slot| existing(slot));
    if let (Some(view), Some(slot)) = (live, reg.slots.get_mut(&key)) {
      slot.observers += 1;
      tracing::debug!(channel = %key, observers = slot.observers, "joined channel");
      return Watch {
        key,
        generation: slot.generation,
        view,
        state: slot.state.subscribe(),
        registry: self.registry.clone(),
      };
    }

    if let Some(stale) = reg.slots.remove(&key) {
      stale.task.abort();
      stale.state.send_replace(ChannelState::Closed);
    }

    let generation = reg.next_generation;
    reg.next_generation += 1;

    let (view_tx, view_rx) = watch::channel(seed);
    let (state, _) = watch::channel(ChannelState::Subscribing);
    let state = Arc::new(state);
    let handle = tokio::spawn(task(view_tx, state.clone()));
    tracing::info!(channel = %key, "channel subscribing");

    let watch = Watch {
      key,
      generation,
      view: view_rx.clone(),
      state: state.subscribe(),
      registry: self.registry.clone(),
    };
    reg.slots.insert(key, Slot {
      generation,
      observers: 1,
      task: handle,
      state,
      view: wrap(view_rx),
    });
    watch
  }
}

// ─── Channel tasks ───────────────────────────────────────────────────────────

fn open_stream<F: ChangeFeed>(
  feed: &F,
  key: ChannelKey,
  filters: Vec<ChangeFilter>,
  state: &watch::Sender<ChannelState>,
) -> Option<ChangeStream> {
  match feed.open(filters) {
    Ok(stream) => {
      state.send_replace(ChannelState::Active);
      tracing::info!(channel = %key, "channel active");
      Some(stream)
    }
    Err(e) => {
      tracing::warn!(channel = %key, error = %e, "could not open channel");
      mark_failed(state);
      None
    }
  }
}

fn mark_failed(state: &watch::Sender<ChannelState>) {
  state.send_if_modified(|s| {
    if *s == ChannelState::Closed {
      false
    } else {
      *s = ChannelState::Error;
      true
    }
  });
}

async fn run_poll<S: PollStore, F: ChangeFeed>(
  gateway: Arc<Gateway<S>>,
  feed: Arc<F>,
  poll_id: Uuid,
  view: watch::Sender<PollAggregate>,
  state: Arc<watch::Sender<ChannelState>>,
) {
  let key = ChannelKey::Poll(poll_id);
  let filters = vec![
    ChangeFilter::new(Table::PollOptions).rows(RowFilter::PollId(poll_id)),
    ChangeFilter::new(Table::Polls).rows(RowFilter::RowId(poll_id)),
  ];
  let Some(mut stream) = open_stream(&*feed, key, filters, &state) else {
    return;
  };

  // Anything written between the seed read and the stream opening.
  refresh_options(&gateway, poll_id, &view).await;
  refresh_poll(&gateway, poll_id, &view).await;

  while let Some(notice) = stream.recv().await {
    match notice {
      Notice::Change(ev) if ev.table == Table::PollOptions => {
        refresh_options(&gateway, poll_id, &view).await;
      }
      Notice::Change(_) => refresh_poll(&gateway, poll_id, &view).await,
      Notice::Missed(n) => {
        tracing::debug!(channel = %key, missed = n, "channel lagged; re-reading");
        refresh_options(&gateway, poll_id, &view).await;
        refresh_poll(&gateway, poll_id, &view).await;
      }
    }
  }

  tracing::warn!(channel = %key, "change feed ended");
  mark_failed(&state);
}

async fn refresh_options<S: PollStore>(
  gateway: &Gateway<S>,
  poll_id: Uuid,
  view: &watch::Sender<PollAggregate>,
) {
  match gateway.list_options(Some(poll_id)).await {
    Ok(options) => {
      view.send_if_modified(|agg| {
        if agg.options == options {
          return false;
        }
        agg.options = options;
        true
      });
    }
    Err(e) => tracing::warn!(%poll_id, error = %e, "could not re-read options"),
  }
}

async fn refresh_poll<S: PollStore>(
  gateway: &Gateway<S>,
  poll_id: Uuid,
  view: &watch::Sender<PollAggregate>,
) {
  match gateway.get_poll(poll_id).await {
    Ok(Some(poll)) => {
      view.send_if_modified(|agg| {
        if agg.poll == poll {
          return false;
        }
        agg.poll = poll;
        true
      });
    }
    Ok(None) => tracing::warn!(%poll_id, "poll vanished from the store"),
    Err(e) => tracing::warn!(%poll_id, error = %e, "could not re-read poll"),
  }
}

async fn run_board<S: PollStore, F: ChangeFeed>(
  gateway: Arc<Gateway<S>>,
  feed: Arc<F>,
  view: watch::Sender<Vec<PollAggregate>>,
  state: Arc<watch::Sender<ChannelState>>,
) {
  let key = ChannelKey::Board;
  let filters = vec![ChangeFilter::new(Table::Polls).kinds(&[ChangeKind::Insert])];
  let Some(mut stream) = open_stream(&*feed, key, filters, &state) else {
    return;
  };

  refresh_board(&gateway, &view).await;
  while let Some(notice) = stream.recv().await {
    if let Notice::Missed(n) = notice {
      tracing::debug!(channel = %key, missed = n, "channel lagged; re-reading");
    }
    refresh_board(&gateway, &view).await;
  }

  tracing::warn!(channel = %key, "change feed ended");
  mark_failed(&state);
}

async fn refresh_board<S: PollStore>(
  gateway: &Gateway<S>,
  view: &watch::Sender<Vec<PollAggregate>>,
) {
  match gateway.fetch_board().await {
    Ok(board) => {
      view.send_if_modified(|current| {
        if *current == board {
          return false;
        }
        *current = board;
        true
      });
    }
    Err(e) => tracing::warn!(error = %e, "could not re-read the board"),
  }
}

#[cfg(test)]
mod tests {
  use quickpoll_core::poll::PollDraft;
  use quickpoll_store_sqlite::SqliteStore;

  use super::*;
  use crate::GatewayConfig;

  #[tokio::test]
  async fn poisoned_registry_still_closes_channels() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let gateway = Arc::new(Gateway::new(store.clone(), GatewayConfig::default()));
    let subs = Subscriptions::new(gateway.clone(), Arc::new(store.feed()));
    let agg = gateway
      .publish(PollDraft::new("Best color?", ["Red", "Blue"]))
      .await
      .unwrap();
    let key = ChannelKey::Poll(agg.poll_id());

    let first = subs.watch_poll(agg.clone());
    let second = subs.watch_poll(agg);

    let registry = subs.registry.clone();
    let _ = std::thread::spawn(move || {
      let _held = registry.lock().unwrap();
      panic!("observer panicked while holding the registry");
    })
    .join();
    assert!(subs.registry.is_poisoned());

    assert_eq!(subs.channel_count(), 1);
    assert_eq!(subs.observers(key), 2);

    drop(first);
    assert_eq!(subs.observers(key), 1);
    drop(second);
    assert_eq!(subs.channel_count(), 0);
    assert_eq!(subs.state(key), ChannelState::Unsubscribed);
  }
}
