//! Call headers carried inside envelope payloads.
//!
//! Request payload: `[name_len:2][service name][method_len:2][method][codec payload]`
//!
//! Response payload: `[flags:1][body]`, where bit 0 of `flags` marks a fault.
//! A successful body is encoded with the caller's payload codec. A fault body is
//! always a JSON [`RemoteFault`], whatever codec the caller uses, so errors raised
//! by code the client knows nothing about still decode.
//!
//! The server half (`CallRequest::decode`, [`encode_success`], [`encode_fault`])
//! lives here too so in-process hosts and test servers speak the same format.

use std::fmt;

use lantern_core::{JsonCodec, PayloadCodec};
use serde::{Deserialize, Serialize};

use crate::error::RpcError;
use crate::wire::WireError;

const FLAG_FAULTED: u8 = 0x01;

/// Codec used for fault bodies. Never configurable.
pub const FAULT_CODEC: JsonCodec = JsonCodec;

/// Service and method addressed by a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    /// Name of the target service.
    pub service_name: String,
    /// Method invoked on that service.
    pub service_method: String,
}

impl CallRequest {
    /// Create a request header.
    pub fn new(service_name: impl Into<String>, service_method: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            service_method: service_method.into(),
        }
    }

    /// Append the header to `buf`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidField` if a name is longer than `u16::MAX` bytes.
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        write_str(buf, "service_name", &self.service_name)?;
        write_str(buf, "service_method", &self.service_method)
    }

    /// Parse a header, returning it with the codec payload that follows.
    ///
    /// # Errors
    ///
    /// Returns a `WireError` for truncated or non-UTF-8 fields.
    pub fn decode(buf: &[u8]) -> Result<(Self, &[u8]), WireError> {
        let (service_name, rest) = read_str(buf, "service_name")?;
        let (service_method, rest) = read_str(rest, "service_method")?;
        Ok((
            Self {
                service_name,
                service_method,
            },
            rest,
        ))
    }
}

fn write_str(buf: &mut Vec<u8>, field: &'static str, value: &str) -> Result<(), WireError> {
    let len = u16::try_from(value.len()).map_err(|_| WireError::InvalidField {
        field,
        reason: format!("{} bytes exceeds {}", value.len(), u16::MAX),
    })?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(value.as_bytes());
    Ok(())
}

fn read_str<'a>(buf: &'a [u8], field: &'static str) -> Result<(String, &'a [u8]), WireError> {
    if buf.len() < 2 {
        return Err(WireError::InsufficientData {
            needed: 2,
            have: buf.len(),
        });
    }
    let len = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    let rest = &buf[2..];
    if rest.len() < len {
        return Err(WireError::InsufficientData {
            needed: len + 2,
            have: buf.len(),
        });
    }
    let value = std::str::from_utf8(&rest[..len]).map_err(|e| WireError::InvalidField {
        field,
        reason: e.to_string(),
    })?;
    Ok((value.to_string(), &rest[len..]))
}

/// Leading header of every response payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallResponse {
    /// The body is a [`RemoteFault`] rather than a result.
    pub is_faulted: bool,
}

impl CallResponse {
    /// Parse the response header, returning the body that follows.
    ///
    /// # Errors
    ///
    /// `InsufficientData` for an empty payload, `InvalidField` for unknown flag bits.
    pub fn decode(buf: &[u8]) -> Result<(Self, &[u8]), WireError> {
        let Some((&flags, body)) = buf.split_first() else {
            return Err(WireError::InsufficientData { needed: 1, have: 0 });
        };
        if flags & !FLAG_FAULTED != 0 {
            return Err(WireError::InvalidField {
                field: "flags",
                reason: format!("unknown bits {:#04x}", flags),
            });
        }
        Ok((
            Self {
                is_faulted: flags & FLAG_FAULTED != 0,
            },
            body,
        ))
    }

    fn flags(self) -> u8 {
        if self.is_faulted { FLAG_FAULTED } else { 0 }
    }
}

/// A failure reported by the remote service.
///
/// `causes` is non-empty when the service raised several errors at once; the
/// dispatcher turns that into an [`RpcError::Composite`] and normalizes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFault {
    /// Remote error type, informational only.
    pub kind: String,
    /// Human-readable message.
    pub message: String,
    /// Concurrently raised causes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<RemoteFault>,
}

impl RemoteFault {
    /// A fault with no inner causes.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            causes: Vec::new(),
        }
    }

    /// A fault aggregating several causes.
    pub fn composite(message: impl Into<String>, causes: Vec<RemoteFault>) -> Self {
        Self {
            kind: "Composite".to_string(),
            message: message.into(),
            causes,
        }
    }

    /// Convert into the error a caller sees, before normalization.
    pub fn into_error(self) -> RpcError {
        if self.causes.is_empty() {
            RpcError::Remote(self)
        } else {
            RpcError::Composite(self.causes.into_iter().map(Self::into_error).collect())
        }
    }
}

impl fmt::Display for RemoteFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Build a request payload: header, then `request` through `codec`.
///
/// # Errors
///
/// `RpcError::Encode` if either the header or the payload cannot be encoded.
pub fn encode_request<C, T>(
    codec: &C,
    service_name: &str,
    service_method: &str,
    request: &T,
) -> Result<Vec<u8>, RpcError>
where
    C: PayloadCodec,
    T: Serialize + ?Sized,
{
    let mut buf = Vec::with_capacity(64);
    CallRequest::new(service_name, service_method)
        .encode_into(&mut buf)
        .map_err(RpcError::encode)?;
    codec.to_bytes(&mut buf, request)?;
    Ok(buf)
}

/// Build a successful response payload.
///
/// # Errors
///
/// `RpcError::Encode` if the codec rejects `value`.
pub fn encode_success<C, T>(codec: &C, value: &T) -> Result<Vec<u8>, RpcError>
where
    C: PayloadCodec,
    T: Serialize + ?Sized,
{
    let mut buf = vec![CallResponse { is_faulted: false }.flags()];
    codec.to_bytes(&mut buf, value)?;
    Ok(buf)
}

/// Build a fault response payload.
///
/// # Errors
///
/// `RpcError::Encode` if the fault cannot be serialized.
pub fn encode_fault(fault: &RemoteFault) -> Result<Vec<u8>, RpcError> {
    let mut buf = vec![CallResponse { is_faulted: true }.flags()];
    FAULT_CODEC.to_bytes(&mut buf, fault)?;
    Ok(buf)
}
