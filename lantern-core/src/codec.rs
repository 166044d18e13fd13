//! Pluggable payload serialization.
//!
//! A [`PayloadCodec`] turns request arguments into bytes and response bytes back
//! into the type a stub expects. Each stub picks its codec when it is built, so
//! two stubs talking to the same endpoint can use different formats. The
//! envelope and the call headers never go through a payload codec.
//!
//! # Example
//!
//! ```rust
//! use lantern_core::{JsonCodec, PayloadCodec};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, Debug, PartialEq)]
//! struct Divide {
//!     lhs: i32,
//!     rhs: i32,
//! }
//!
//! let codec = JsonCodec;
//! let mut buf = b"header".to_vec();
//!
//! codec.to_bytes(&mut buf, &Divide { lhs: 20, rhs: 5 }).unwrap();
//!
//! let decoded: Divide = codec.from_bytes(&buf[6..]).unwrap();
//! assert_eq!(decoded, Divide { lhs: 20, rhs: 5 });
//! ```

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Error type for codec operations.
#[derive(Debug)]
pub enum CodecError {
    /// A value could not be turned into bytes.
    Encode(Box<dyn std::error::Error + Send + Sync>),
    /// Bytes could not be turned into the expected type.
    Decode(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Encode(e) => write!(f, "encode error: {}", e),
            CodecError::Decode(e) => write!(f, "decode error: {}", e),
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CodecError::Encode(e) => Some(e.as_ref()),
            CodecError::Decode(e) => Some(e.as_ref()),
        }
    }
}

/// Strategy for encoding request payloads and decoding response payloads.
///
/// `to_bytes` appends to a buffer that may already hold protocol headers, so
/// implementations must not clear it. `from_bytes` receives exactly the bytes
/// that follow those headers.
///
/// Codecs are cloned into every outstanding call and may be used from the
/// transport's read task, hence `Send + Sync + 'static`.
pub trait PayloadCodec: Clone + Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Append the encoded form of `value` to `buf`.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Encode` if the value cannot be represented.
    fn to_bytes<T: Serialize + ?Sized>(&self, buf: &mut Vec<u8>, value: &T)
    -> Result<(), CodecError>;

    /// Decode `buf` as a `T`.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Decode` if the bytes are not a valid `T`.
    fn from_bytes<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec backed by `serde_json`.
///
/// Besides being the default payload codec, this is the fixed codec used for
/// remote fault payloads: faults must stay readable whatever codec the caller
/// picked.
#[derive(Clone, Default, Debug, Copy)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn to_bytes<T: Serialize + ?Sized>(
        &self,
        buf: &mut Vec<u8>,
        value: &T,
    ) -> Result<(), CodecError> {
        serde_json::to_writer(buf, value).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn from_bytes<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(buf).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}
