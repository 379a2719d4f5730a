//! # bazaar-server
//!
//! Marketplace server: a long-lived TCP service where every connection is
//! bound to one authenticated user and speaks the lockstep request protocol
//! from `bazaar-shared`.
//!
//! - **Presence registry** tracking who is online and who has a chat open
//! - **Chat mailbox** with polling, history and read bookkeeping
//! - **Transaction engine** for proposals, approvals, completion and the
//!   chat CONFIRM / DENY interceptor
//! - **Dispatcher** mapping request codes to typed handlers

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod mailbox;
pub mod presence;
pub mod server;
pub mod session;
pub mod store;

pub use config::ServerConfig;
pub use dispatcher::AppState;
pub use error::ServerError;
pub use server::Server;
