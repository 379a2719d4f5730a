//! # bazaar-shared
//!
//! Wire protocol definitions shared by the marketplace server and its
//! clients: request codes and their field schemas, JSON payload types,
//! the fixed-width / length-prefixed framing codec, and the small domain
//! enums (transaction status, chat visibility) both sides agree on.

pub mod codec;
pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use protocol::Opcode;
