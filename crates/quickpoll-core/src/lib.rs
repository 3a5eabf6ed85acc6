//! Core types and trait definitions for QuickPoll.
//!
//! This crate is free of database and transport dependencies. The SQLite
//! backend, the live-sync layer and the CLI all depend on it.

pub mod change;
pub mod error;
pub mod poll;
pub mod session;
pub mod store;
pub mod tally;

pub use error::{Error, Result, ValidationError};
pub use session::SessionId;
