//! Codec for the body the upload server returns after a binary post.
//!
//! The body is not JSON; it is a fixed layout of raw bytes:
//!
//! ```text
//! | hash (HASH_LENGTH bytes) | separator (SEPARATOR_WIDTH) | decimal size | trailer (TRAILER_WIDTH) |
//! ```
//!
//! e.g. `C172C6E2FF47284FF33F348FEA7EECE532F6C051;14\r\n`.

use crate::contract::UploadReceipt;

/// Length of the hex content hash at the start of the body.
pub const HASH_LENGTH: usize = 40;
/// Width of the separator between hash and size.
pub const SEPARATOR_WIDTH: usize = 1;
/// Bytes that terminate the body (`\r\n`).
pub const TRAILER_WIDTH: usize = 2;

const SIZE_OFFSET: usize = HASH_LENGTH + SEPARATOR_WIDTH;
const MIN_LENGTH: usize = SIZE_OFFSET + 1 + TRAILER_WIDTH;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReceiptError {
    #[error("body is {len} bytes, at least {} expected", MIN_LENGTH)]
    TooShort { len: usize },
    #[error("hash is not valid UTF-8")]
    HashNotUtf8,
    #[error("size field {0:?} is not a decimal number")]
    InvalidSize(String),
}

/// Split an upload response body into hash and size.
pub fn parse_receipt(body: &[u8]) -> Result<UploadReceipt, ReceiptError> {
    if body.len() < MIN_LENGTH {
        return Err(ReceiptError::TooShort { len: body.len() });
    }

    let hash = std::str::from_utf8(&body[..HASH_LENGTH]).map_err(|_| ReceiptError::HashNotUtf8)?;

    let size_bytes = &body[SIZE_OFFSET..body.len() - TRAILER_WIDTH];
    let size_text = String::from_utf8_lossy(size_bytes);
    let size = size_text
        .trim()
        .parse::<u64>()
        .map_err(|_| ReceiptError::InvalidSize(size_text.to_string()))?;

    Ok(UploadReceipt {
        hash: hash.to_string(),
        size,
    })
}
