//! # parley-store
//!
//! SQLite persistence for the Parley relay: the participant directory, group
//! membership records, and the message ledger.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every domain
//! record defined in `parley_shared::types`.

pub mod database;
pub mod groups;
pub mod messages;
pub mod migrations;
pub mod participants;

mod error;
mod row;

pub use database::Database;
pub use error::{Result, StoreError};
