//! Wire-format definitions for data and acknowledgement frames.
//!
//! Every datagram exchanged between two connections is either a
//! [`DataFrame`] (sender → receiver) or an [`AckFrame`] (receiver → sender).
//! This module is responsible for:
//! - Defining the on-wire binary layout.
//! - Serialising frames into a byte buffer ready for transmission.
//! - Deserialising a raw datagram back into a frame, returning errors for
//!   malformed or truncated input.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are in the **native byte order** of the host.
//! There is no network byte-order normalisation and no version field, so two
//! peers must share endianness to interoperate.
//!
//! ```text
//!  Data frame
//! +-------------------------------+---------------------------------------------------------------+
//! |       Sequence (u16)          |                    Payload Length (i32)                       |
//! +-------------------------------+---------------------------------------------------------------+
//! |                                  Payload ...                                                  |
//! +-----------------------------------------------------------------------------------------------+
//!
//!  ACK frame
//! +-------------------------------+
//! |       Sequence (u16)          |
//! +-------------------------------+
//! ```
//!
//! Data header size: [`HEADER_LEN`] = 6 bytes, ACK size: [`ACK_LEN`] = 2 bytes.

use thiserror::Error;

/// Byte length of the fixed-size data frame header.
pub const HEADER_LEN: usize = 6;

/// Byte length of an ACK frame.
pub const ACK_LEN: usize = 2;

/// Largest UDP payload carried by a single IPv4 datagram.
pub const MAX_DATAGRAM: usize = 65_507;

/// Largest application payload that fits in one data frame.
pub const MAX_PAYLOAD: usize = MAX_DATAGRAM - HEADER_LEN;

// Byte offsets of each field within the serialised header.
const OFF_SEQ: usize = 0;
const OFF_LEN: usize = 2;

/// Errors that can arise when building or parsing a frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    /// Datagram ended before the header or the declared payload was complete.
    #[error("datagram truncated: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },
    /// The length field held a negative value.
    #[error("negative payload length {0}")]
    NegativeLength(i32),
    /// The declared payload does not fit in the destination buffer.
    #[error("payload of {len} bytes does not fit in a {capacity}-byte buffer")]
    TooLarge { len: usize, capacity: usize },
    /// Outbound payload cannot be carried in a single datagram.
    #[error("payload of {0} bytes does not fit in a single frame")]
    PayloadTooLarge(usize),
}

/// A single application message tagged with its sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub sequence: u16,
    pub payload: Vec<u8>,
}

impl DataFrame {
    pub fn new(sequence: u16, payload: &[u8]) -> Self {
        Self {
            sequence,
            payload: payload.to_vec(),
        }
    }

    /// Serialise this frame into a newly allocated byte vector.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let len = self.payload.len();
        if len > MAX_PAYLOAD {
            return Err(PacketError::PayloadTooLarge(len));
        }

        let mut buf = vec![0u8; HEADER_LEN + len];
        buf[OFF_SEQ..OFF_SEQ + 2].copy_from_slice(&self.sequence.to_ne_bytes());
        // MAX_PAYLOAD is well inside i32 range.
        buf[OFF_LEN..OFF_LEN + 4].copy_from_slice(&(len as i32).to_ne_bytes());
        buf[HEADER_LEN..].copy_from_slice(&self.payload);
        Ok(buf)
    }

    /// Parse a data frame from a raw datagram.
    ///
    /// `capacity` is the size of the buffer the payload will be copied into.
    /// A declared length larger than `capacity` is reported as
    /// [`PacketError::TooLarge`] before the payload itself is inspected.
    /// Bytes past the declared payload length are ignored.
    pub fn decode(buf: &[u8], capacity: usize) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::Truncated {
                needed: HEADER_LEN,
                got: buf.len(),
            });
        }

        let sequence = u16::from_ne_bytes([buf[OFF_SEQ], buf[OFF_SEQ + 1]]);
        let declared = i32::from_ne_bytes([
            buf[OFF_LEN],
            buf[OFF_LEN + 1],
            buf[OFF_LEN + 2],
            buf[OFF_LEN + 3],
        ]);
        let len = usize::try_from(declared).map_err(|_| PacketError::NegativeLength(declared))?;

        if len > capacity {
            return Err(PacketError::TooLarge { len, capacity });
        }

        let body = &buf[HEADER_LEN..];
        if body.len() < len {
            return Err(PacketError::Truncated {
                needed: HEADER_LEN + len,
                got: buf.len(),
            });
        }

        Ok(Self {
            sequence,
            payload: body[..len].to_vec(),
        })
    }
}

/// Acknowledgement echoing the sequence number of a received data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckFrame {
    pub sequence: u16,
}

impl AckFrame {
    pub fn encode(&self) -> [u8; ACK_LEN] {
        self.sequence.to_ne_bytes()
    }

    /// Interpret the first two bytes of `buf` as an ACK.
    ///
    /// Returns `None` when the datagram is too short to hold a sequence number.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        match buf {
            [a, b, ..] => Some(Self {
                sequence: u16::from_ne_bytes([*a, *b]),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_frame_layout_is_seq_len_payload() {
        let bytes = DataFrame::new(7, b"Hello World!").encode().unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + 12);
        assert_eq!(&bytes[OFF_SEQ..OFF_SEQ + 2], &7u16.to_ne_bytes());
        assert_eq!(&bytes[OFF_LEN..OFF_LEN + 4], &12i32.to_ne_bytes());
        assert_eq!(&bytes[HEADER_LEN..], b"Hello World!");
    }

    #[test]
    fn decode_recovers_frame() {
        let frame = DataFrame::new(65_535, b"payload");
        let decoded = DataFrame::decode(&frame.encode().unwrap(), 64).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn empty_payload_is_valid() {
        let bytes = DataFrame::new(1, b"").encode().unwrap();
        assert_eq!(bytes.len(), HEADER_LEN);
        let decoded = DataFrame::decode(&bytes, 0).unwrap();
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn decode_short_header_returns_error() {
        assert_eq!(
            DataFrame::decode(&[0u8; HEADER_LEN - 1], 64),
            Err(PacketError::Truncated {
                needed: HEADER_LEN,
                got: HEADER_LEN - 1
            })
        );
    }

    #[test]
    fn decode_truncated_payload_returns_error() {
        let mut bytes = DataFrame::new(0, b"data").encode().unwrap();
        bytes.pop();
        assert_eq!(
            DataFrame::decode(&bytes, 64),
            Err(PacketError::Truncated {
                needed: HEADER_LEN + 4,
                got: HEADER_LEN + 3
            })
        );
    }

    #[test]
    fn decode_checks_capacity_before_payload() {
        // Header claims 100 bytes but only 4 follow: capacity wins.
        let mut bytes = vec![0u8; HEADER_LEN + 4];
        bytes[OFF_LEN..OFF_LEN + 4].copy_from_slice(&100i32.to_ne_bytes());
        assert_eq!(
            DataFrame::decode(&bytes, 8),
            Err(PacketError::TooLarge {
                len: 100,
                capacity: 8
            })
        );
    }

    #[test]
    fn decode_negative_length_returns_error() {
        let mut bytes = vec![0u8; HEADER_LEN];
        bytes[OFF_LEN..OFF_LEN + 4].copy_from_slice(&(-1i32).to_ne_bytes());
        assert_eq!(
            DataFrame::decode(&bytes, 8),
            Err(PacketError::NegativeLength(-1))
        );
    }

    #[test]
    fn decode_ignores_trailing_bytes() {
        let mut bytes = DataFrame::new(3, b"abc").encode().unwrap();
        bytes.extend_from_slice(b"junk");
        let decoded = DataFrame::decode(&bytes, 16).unwrap();
        assert_eq!(decoded.payload, b"abc");
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let frame = DataFrame::new(0, &vec![0u8; MAX_PAYLOAD + 1]);
        assert_eq!(
            frame.encode(),
            Err(PacketError::PayloadTooLarge(MAX_PAYLOAD + 1))
        );
    }

    #[test]
    fn ack_is_two_native_endian_bytes() {
        let ack = AckFrame { sequence: 0x0102 };
        assert_eq!(ack.encode(), 0x0102u16.to_ne_bytes());
        assert_eq!(AckFrame::decode(&ack.encode()), Some(ack));
    }

    #[test]
    fn short_ack_is_rejected() {
        assert_eq!(AckFrame::decode(&[]), None);
        assert_eq!(AckFrame::decode(&[1]), None);
    }

    #[test]
    fn ack_decode_reads_leading_bytes_only() {
        let mut bytes = AckFrame { sequence: 9 }.encode().to_vec();
        bytes.push(0xff);
        assert_eq!(AckFrame::decode(&bytes), Some(AckFrame { sequence: 9 }));
    }
}
