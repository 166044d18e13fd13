//! Wire format for envelopes and frames.
//!
//! Every message on the wire is `[envelope:36][payload:N]`, where the envelope
//! layout is fixed and little-endian:
//!
//! ```text
//! offset  size  field
//!      0     4  begin magic (0x59415250)
//!      4     4  message kind (1 = request, 2 = response)
//!      8     4  payload length
//!     12     4  CRC32C of payload
//!     16     8  system id
//!     24     8  correlation id
//!     32     4  end magic (0x79617270)
//! ```
//!
//! The envelope never goes through a payload codec: a receiver has to parse it
//! before it knows anything about the payload's type.

/// Envelope size in bytes.
pub const ENVELOPE_SIZE: usize = 36;

/// Default maximum payload size (16 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

const BEGIN_MAGIC: u32 = 0x5941_5250;
const END_MAGIC: u32 = 0x7961_7270;

/// Wire format error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// Not enough data to parse.
    #[error("insufficient data: need {needed} bytes, have {have}")]
    InsufficientData {
        /// Minimum bytes required to parse.
        needed: usize,
        /// Actual bytes available.
        have: usize,
    },

    /// A magic number did not match; the stream is out of sync.
    #[error("bad magic number: expected {expected:#010x}, got {actual:#010x}")]
    BadMagic {
        /// Expected value.
        expected: u32,
        /// Value found on the wire.
        actual: u32,
    },

    /// The kind field holds an unknown value.
    #[error("unknown message kind: {kind}")]
    UnknownKind {
        /// The raw value.
        kind: u32,
    },

    /// Checksum verification failed - data was corrupted.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum carried by the envelope.
        expected: u32,
        /// Checksum computed over the payload.
        actual: u32,
    },

    /// Payload exceeds the allowed size.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Payload size in bytes.
        size: usize,
        /// Limit in force.
        max: usize,
    },

    /// A length-prefixed header field is malformed.
    #[error("invalid header field {field}: {reason}")]
    InvalidField {
        /// Which field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Whether a message is a call or the answer to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// A call from a dispatcher to a service.
    Request,
    /// The answer to a request, routed by correlation id.
    Response,
}

impl MessageKind {
    fn to_wire(self) -> u32 {
        match self {
            MessageKind::Request => 1,
            MessageKind::Response => 2,
        }
    }

    fn from_wire(kind: u32) -> Result<Self, WireError> {
        match kind {
            1 => Ok(MessageKind::Request),
            2 => Ok(MessageKind::Response),
            _ => Err(WireError::UnknownKind { kind }),
        }
    }
}

/// Fixed-layout header accompanying every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    /// Request or response.
    pub kind: MessageKind,
    /// Payload length in bytes.
    pub payload_length: u32,
    /// CRC32C of the payload. Filled in by [`serialize_frame`].
    pub checksum: u32,
    /// Dispatcher that originated the call. Echoed back on the response.
    pub system_id: u64,
    /// The call being made, or on a response the call being answered.
    pub correlation_id: u64,
}

impl Envelope {
    /// Envelope for a new request.
    pub fn request(system_id: u64, correlation_id: u64, payload_length: usize) -> Self {
        Self {
            kind: MessageKind::Request,
            payload_length: payload_length as u32,
            checksum: 0,
            system_id,
            correlation_id,
        }
    }

    /// Envelope answering this request.
    pub fn response_to(&self, payload_length: usize) -> Self {
        Self {
            kind: MessageKind::Response,
            payload_length: payload_length as u32,
            checksum: 0,
            system_id: self.system_id,
            correlation_id: self.correlation_id,
        }
    }

    /// Serialize into buffer (must be at least ENVELOPE_SIZE bytes).
    pub fn serialize_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= ENVELOPE_SIZE);
        buf[0..4].copy_from_slice(&BEGIN_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&self.kind.to_wire().to_le_bytes());
        buf[8..12].copy_from_slice(&self.payload_length.to_le_bytes());
        buf[12..16].copy_from_slice(&self.checksum.to_le_bytes());
        buf[16..24].copy_from_slice(&self.system_id.to_le_bytes());
        buf[24..32].copy_from_slice(&self.correlation_id.to_le_bytes());
        buf[32..36].copy_from_slice(&END_MAGIC.to_le_bytes());
    }

    /// Deserialize from the first ENVELOPE_SIZE bytes of `buf`.
    ///
    /// # Errors
    ///
    /// `InsufficientData` for short buffers, `BadMagic` or `UnknownKind` for
    /// bytes that are not an envelope.
    pub fn deserialize(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < ENVELOPE_SIZE {
            return Err(WireError::InsufficientData {
                needed: ENVELOPE_SIZE,
                have: buf.len(),
            });
        }

        check_magic(BEGIN_MAGIC, read_u32(buf, 0))?;
        check_magic(END_MAGIC, read_u32(buf, 32))?;

        Ok(Self {
            kind: MessageKind::from_wire(read_u32(buf, 4))?,
            payload_length: read_u32(buf, 8),
            checksum: read_u32(buf, 12),
            system_id: read_u64(buf, 16),
            correlation_id: read_u64(buf, 24),
        })
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

fn check_magic(expected: u32, actual: u32) -> Result<(), WireError> {
    if expected == actual {
        Ok(())
    } else {
        Err(WireError::BadMagic { expected, actual })
    }
}

/// Serialize one frame: the envelope (length and checksum recomputed) followed
/// by the payload.
///
/// # Errors
///
/// Returns `PayloadTooLarge` if the payload exceeds `max_payload`.
pub fn serialize_frame(
    envelope: &Envelope,
    payload: &[u8],
    max_payload: usize,
) -> Result<Vec<u8>, WireError> {
    if payload.len() > max_payload {
        return Err(WireError::PayloadTooLarge {
            size: payload.len(),
            max: max_payload,
        });
    }

    let envelope = Envelope {
        payload_length: payload.len() as u32,
        checksum: crc32c::crc32c(payload),
        ..*envelope
    };

    let mut data = vec![0u8; ENVELOPE_SIZE + payload.len()];
    envelope.serialize_into(&mut data[..ENVELOPE_SIZE]);
    data[ENVELOPE_SIZE..].copy_from_slice(payload);

    Ok(data)
}

/// Try to parse one frame from a buffer that may hold partial data.
///
/// # Returns
///
/// - `Ok(Some((envelope, payload, consumed)))` if a complete frame was parsed
/// - `Ok(None)` if more data is needed
/// - `Err` if the data is malformed; the stream cannot be resynchronised
pub fn try_deserialize_frame(
    data: &[u8],
    max_payload: usize,
) -> Result<Option<(Envelope, Vec<u8>, usize)>, WireError> {
    if data.len() < ENVELOPE_SIZE {
        return Ok(None);
    }

    let envelope = Envelope::deserialize(data)?;

    let payload_len = envelope.payload_length as usize;
    if payload_len > max_payload {
        return Err(WireError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let frame_len = ENVELOPE_SIZE + payload_len;
    if data.len() < frame_len {
        return Ok(None);
    }

    let payload = &data[ENVELOPE_SIZE..frame_len];

    let computed = crc32c::crc32c(payload);
    if computed != envelope.checksum {
        return Err(WireError::ChecksumMismatch {
            expected: envelope.checksum,
            actual: computed,
        });
    }

    Ok(Some((envelope, payload.to_vec(), frame_len)))
}
