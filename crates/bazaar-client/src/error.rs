use std::io;

use bazaar_shared::{Opcode, ProtocolError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connection error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Authentication failed: {0}")]
    Auth(&'static str),

    #[error("Server rejected {0:?}")]
    Rejected(Opcode),
}

pub type Result<T> = std::result::Result<T, ClientError>;
