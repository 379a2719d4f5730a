//! Byte-level framing shared by the server and the client.
//!
//! Outgoing frames are assembled in a [`FrameBuf`] and written with a single
//! `write_all`, so a response is never interleaved with a partial one.
//! Incoming fields are read with exact-length reads; an I/O error while
//! reading is always fatal to the connection, while decoding the bytes that
//! were read (UTF-8, numbers, JSON) yields a recoverable [`ProtocolError`].

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::{BODY_FIELD_LEN, FLAG_FAIL, FLAG_OK, LENGTH_PREFIX_LEN, SHORT_FIELD_LEN};
use crate::error::ProtocolError;
use crate::protocol::FieldKind;

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Builder for one outgoing frame.
#[derive(Debug, Default)]
pub struct FrameBuf {
    buf: BytesMut,
}

impl FrameBuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flag(&mut self, ok: bool) -> &mut Self {
        self.byte(if ok { FLAG_OK } else { FLAG_FAIL })
    }

    pub fn byte(&mut self, b: u8) -> &mut Self {
        self.buf.put_u8(b);
        self
    }

    /// Append a 1024-byte null-padded text field.
    pub fn short(&mut self, text: &str) -> Result<&mut Self, ProtocolError> {
        self.padded(text.as_bytes(), SHORT_FIELD_LEN)
    }

    /// Append a 4096-byte null-padded text field.
    pub fn body(&mut self, text: &str) -> Result<&mut Self, ProtocolError> {
        self.padded(text.as_bytes(), BODY_FIELD_LEN)
    }

    /// Append a length-prefixed blob.
    pub fn blob(&mut self, data: &[u8]) -> &mut Self {
        self.buf.reserve(LENGTH_PREFIX_LEN + data.len());
        self.buf.put_u128(data.len() as u128);
        self.buf.put_slice(data);
        self
    }

    /// Append a value serialized as a JSON blob.
    pub fn json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<&mut Self, ProtocolError> {
        let encoded = serde_json::to_vec(value)?;
        Ok(self.blob(&encoded))
    }

    fn padded(&mut self, data: &[u8], width: usize) -> Result<&mut Self, ProtocolError> {
        if data.len() > width {
            return Err(ProtocolError::FieldTooLong {
                len: data.len(),
                max: width,
            });
        }
        self.buf.reserve(width);
        self.buf.put_slice(data);
        self.buf.put_bytes(0, width - data.len());
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Write a finished frame and flush it.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: Bytes) -> io::Result<()> {
    writer.write_all(&frame).await?;
    writer.flush().await
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Read a single flag byte.
pub async fn read_byte<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<u8> {
    reader.read_u8().await
}

/// Read a success / failure flag. Any other byte is a protocol violation.
pub async fn read_flag<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<bool> {
    match reader.read_u8().await? {
        FLAG_OK => Ok(true),
        FLAG_FAIL => Ok(false),
        other => Err(invalid_data(ProtocolError::UnexpectedFlag(other))),
    }
}

/// Read the raw bytes of a 1024-byte field.
pub async fn read_short<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Vec<u8>> {
    read_fixed(reader, SHORT_FIELD_LEN).await
}

/// Read the raw bytes of a 4096-byte field.
pub async fn read_body<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Vec<u8>> {
    read_fixed(reader, BODY_FIELD_LEN).await
}

/// Read a length-prefixed blob of at most `max` bytes.
///
/// An oversize prefix is reported as an I/O error: the payload cannot be
/// skipped without reading it, so the connection cannot be resynchronized.
pub async fn read_blob<R: AsyncRead + Unpin>(reader: &mut R, max: usize) -> io::Result<Vec<u8>> {
    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    reader.read_exact(&mut prefix).await?;
    let size = u128::from_be_bytes(prefix);
    if size > max as u128 {
        return Err(invalid_data(ProtocolError::PayloadTooLarge { size, max }));
    }
    read_fixed(reader, size as usize).await
}

/// Read one field of the given kind.
pub async fn read_field<R: AsyncRead + Unpin>(
    reader: &mut R,
    kind: FieldKind,
    max_blob: usize,
) -> io::Result<Vec<u8>> {
    match kind {
        FieldKind::Short => read_short(reader).await,
        FieldKind::Body => read_body(reader).await,
        FieldKind::Blob => read_blob(reader, max_blob).await,
    }
}

async fn read_fixed<R: AsyncRead + Unpin>(reader: &mut R, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

fn invalid_data(err: ProtocolError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

/// Decode a padded text field: padding NULs and surrounding whitespace are
/// stripped.
pub fn decode_text(raw: &[u8]) -> Result<String, ProtocolError> {
    let end = raw.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    let text = std::str::from_utf8(&raw[..end]).map_err(|_| ProtocolError::InvalidUtf8)?;
    Ok(text.trim_matches('\0').trim().to_string())
}

/// Decode a padded text field holding a decimal integer.
pub fn decode_int(raw: &[u8]) -> Result<i64, ProtocolError> {
    let text = decode_text(raw)?;
    text.parse::<i64>()
        .map_err(|_| ProtocolError::InvalidNumber(text))
}

/// Decode a JSON blob.
pub fn decode_json<T: DeserializeOwned>(raw: &[u8]) -> Result<T, ProtocolError> {
    Ok(serde_json::from_slice(raw)?)
}
