//! Live synchronisation and voting consistency for QuickPoll.
//!
//! - [`Gateway`]: typed façade over any [`PollStore`] with request deadlines
//!   and constraint-aware error mapping.
//! - [`Subscriptions`]: one change channel per poll in view plus a global
//!   board channel; every change triggers a full re-fetch of the affected
//!   aggregate.
//! - [`Ballot`]: per (poll, session) vote and like state, reconciled with
//!   the store after any rejected mutation.
//!
//! [`PollStore`]: quickpoll_core::store::PollStore

pub mod ballot;
pub mod gateway;
pub mod subscription;

pub use ballot::{Ballot, VoteOutcome, VoterState};
pub use gateway::{Gateway, GatewayConfig};
pub use subscription::{
  BoardWatch, ChannelKey, ChannelState, PollWatch, Subscriptions, Watch,
};
