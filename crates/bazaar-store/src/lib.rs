//! # bazaar-store
//!
//! Persistent storage for the Bazaar marketplace, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle with compound,
//! invariant-preserving operations for every domain model: accounts and
//! profiles, the product catalog, chat messages, purchase transactions and
//! the rating ledgers. Callers never see raw queries. Every check-then-act
//! sequence (stock decrement, status transition, rating fold) runs inside a
//! single immediate SQLite transaction.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod products;
pub mod ratings;
pub mod transactions;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
