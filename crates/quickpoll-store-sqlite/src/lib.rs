//! SQLite backend for QuickPoll.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Triggers keep the vote and like
//! counters and append every row change to a change log, which the
//! [`relay`] tails and broadcasts through a [`ChangeHub`].

mod encode;
mod schema;
mod store;

pub mod error;
pub mod relay;

pub use error::{Error, Result};
pub use relay::{ChangeHub, RelayOptions};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
