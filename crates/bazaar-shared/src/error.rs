use thiserror::Error;

/// Decoding failures for a request or response that was read in full.
///
/// None of these desynchronize a connection: the bytes of the offending
/// frame have already been consumed when the error is produced.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Field is not valid UTF-8")]
    InvalidUtf8,

    #[error("Invalid number: {0:?}")]
    InvalidNumber(String),

    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Payload of {size} bytes exceeds limit of {max}")]
    PayloadTooLarge { size: u128, max: usize },

    #[error("Value of {len} bytes does not fit in a {max}-byte field")]
    FieldTooLong { len: usize, max: usize },

    #[error("Request has no field #{0}")]
    MissingField(usize),

    #[error("Unexpected response byte: {0:#04x}")]
    UnexpectedFlag(u8),

    #[error("Malformed request: {0}")]
    Malformed(String),
}
