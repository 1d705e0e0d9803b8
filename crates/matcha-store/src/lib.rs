//! # matcha-store
//!
//! SQLite persistence for the Matcha chat backend: users, sessions,
//! connection edges, and per-pair conversations with their message
//! history. The crate exposes a synchronous `Database` handle that wraps
//! a `rusqlite::Connection` and provides typed helpers for every domain
//! model; the server serializes access to it behind an async mutex.

pub mod conversations;
pub mod database;
pub mod edges;
pub mod migrations;
pub mod models;
pub mod sessions;
pub mod users;

mod error;

#[cfg(test)]
pub(crate) mod test_support;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
