//! Wire codec shared by the listener and notifier
//!
//! Wire format:
//! ```text
//! [query payload (MessagePack, self-delimiting)]
//! [1 byte: prevent-activation flag (0x00 or 0x01)]
//! ```
//!
//! There is no magic number, version field, or outer length prefix; this is
//! a closed protocol between same-version instances of one application.

use std::io::{self, Cursor};

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Why a buffer could not be decoded into a message
#[derive(Debug, Error)]
pub enum DecodeError {
    /// More bytes are needed before a full message can be decoded. The
    /// caller should retry once more data has arrived.
    #[error("incomplete message")]
    Incomplete,

    /// The bytes can never form a valid message.
    #[error("malformed message: {0}")]
    Malformed(String),
}

/// Encode a query and the prevent-activation flag into a single buffer.
pub fn encode<Q: Serialize>(
    query: &Q,
    prevent_activation: bool,
) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    let mut buf = rmp_serde::to_vec(query)?;
    buf.push(u8::from(prevent_activation));
    Ok(buf)
}

/// Attempt to decode one message from the bytes read so far.
///
/// The query payload is decoded first, consuming exactly the bytes its own
/// encoding specifies, then the flag byte is read. Bytes past the flag are
/// ignored. A short buffer is reported as [`DecodeError::Incomplete`], never
/// as a hard failure, so a partial read can simply be retried later.
pub fn decode<Q: DeserializeOwned>(data: &[u8]) -> Result<(Q, bool), DecodeError> {
    let mut cursor = Cursor::new(data);
    let query: Q = rmp_serde::from_read(&mut cursor).map_err(classify)?;

    let consumed = cursor.position() as usize;
    let Some(&flag) = data.get(consumed) else {
        return Err(DecodeError::Incomplete);
    };
    let prevent_activation = match flag {
        0x00 => false,
        0x01 => true,
        other => {
            return Err(DecodeError::Malformed(format!(
                "invalid flag byte {other:#04x}"
            )));
        }
    };

    Ok((query, prevent_activation))
}

/// A payload decode that ran out of bytes is retryable; everything else is
/// a malformed message.
fn classify(err: rmp_serde::decode::Error) -> DecodeError {
    use rmp_serde::decode::Error;

    match &err {
        Error::InvalidMarkerRead(io_err) | Error::InvalidDataRead(io_err)
            if io_err.kind() == io::ErrorKind::UnexpectedEof =>
        {
            DecodeError::Incomplete
        }
        _ => DecodeError::Malformed(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestQuery {
        keyword: String,
        query: String,
    }

    fn query() -> TestQuery {
        TestQuery {
            keyword: "rust".to_string(),
            query: "async channels".to_string(),
        }
    }

    #[test]
    fn test_roundtrip() {
        for flag in [false, true] {
            let bytes = encode(&query(), flag).unwrap();
            let (decoded, prevent_activation): (TestQuery, bool) = decode(&bytes).unwrap();
            assert_eq!(decoded, query());
            assert_eq!(prevent_activation, flag);
        }
    }

    #[test]
    fn test_flag_is_one_trailing_byte() {
        let bytes = encode(&query(), true).unwrap();
        assert_eq!(bytes.last(), Some(&0x01));

        let bytes = encode(&query(), false).unwrap();
        assert_eq!(bytes.last(), Some(&0x00));
    }

    #[test]
    fn test_every_strict_prefix_is_incomplete() {
        let bytes = encode(&query(), true).unwrap();
        for len in 0..bytes.len() {
            let result = decode::<TestQuery>(&bytes[..len]);
            assert!(
                matches!(result, Err(DecodeError::Incomplete)),
                "prefix of {len} bytes should be incomplete"
            );
        }
    }

    #[test]
    fn test_garbage_is_malformed() {
        // 0xc1 is the one reserved MessagePack marker and can never start
        // a valid payload.
        let result = decode::<TestQuery>(&[0xc1, 0xff, 0x00]);
        assert!(matches!(result, Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_wrong_payload_shape_is_malformed() {
        // A bare integer where the struct expects an array.
        let result = decode::<TestQuery>(&[0x07, 0x00]);
        assert!(matches!(result, Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_bad_flag_byte_is_malformed() {
        let mut bytes = encode(&query(), false).unwrap();
        *bytes.last_mut().unwrap() = 0x07;
        let result = decode::<TestQuery>(&bytes);
        assert!(matches!(result, Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_trailing_bytes_are_ignored() {
        let mut bytes = encode(&query(), true).unwrap();
        bytes.extend_from_slice(b"leftover");
        let (decoded, prevent_activation): (TestQuery, bool) = decode(&bytes).unwrap();
        assert_eq!(decoded, query());
        assert!(prevent_activation);
    }
}
