//! Captured Record Reassembly
//!
//! Host-side counterpart of the on-buffer wire format: an incremental
//! assembler that splits the drained byte stream back into records, and a
//! compact archival encoding for moving records off the device.

use crate::engine::HEADER_SIZE_BYTES;
use crate::error::CaptureError;
use serde::{Deserialize, Serialize};

/// One captured bus transmission.
///
/// On the wire this is `[len_hi][len_lo][payload...]` with a big-endian
/// 16-bit payload length. The payload is raw bus bytes; nothing here
/// interprets PIDs or checks CRCs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRecord {
    /// Raw payload bytes as they appeared on the bus
    pub payload: Vec<u8>,
}

impl CaptureRecord {
    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the transmission carried no bytes
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Re-encode in the buffer wire format, header included
    pub fn to_wire(&self) -> Vec<u8> {
        let len = self.payload.len() as u16;
        let mut wire = Vec::with_capacity(HEADER_SIZE_BYTES + self.payload.len());
        wire.push((len >> 8) as u8);
        wire.push((len & 0xFF) as u8);
        wire.extend_from_slice(&self.payload);
        wire
    }

    /// Compact archival encoding
    pub fn to_bytes(&self) -> Result<Vec<u8>, CaptureError> {
        Ok(postcard::to_allocvec(self)?)
    }

    /// Decode from the archival encoding
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CaptureError> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

/// Reassembly phase for the byte stream
enum Phase {
    /// Expecting the length high byte
    LenHi,
    /// Expecting the length low byte
    LenLo { hi: u8 },
    /// Collecting payload bytes
    Payload { expected: usize, buf: Vec<u8> },
}

/// Incremental record splitter for the drained byte stream.
///
/// Feed it bytes in consumer-port order; it yields a record each time a
/// length-delimited payload completes. A length field above the
/// configured bound is reported as corruption, since the engine can never
/// produce it.
pub struct RecordAssembler {
    max_payload: usize,
    phase: Phase,
}

impl RecordAssembler {
    /// Create an assembler that accepts payloads up to `max_payload` bytes
    pub fn new(max_payload: usize) -> Self {
        Self {
            max_payload,
            phase: Phase::LenHi,
        }
    }

    /// Consume one drained byte, yielding a record when one completes
    pub fn push_byte(&mut self, byte: u8) -> Result<Option<CaptureRecord>, CaptureError> {
        match std::mem::replace(&mut self.phase, Phase::LenHi) {
            Phase::LenHi => {
                self.phase = Phase::LenLo { hi: byte };
                Ok(None)
            }
            Phase::LenLo { hi } => {
                let expected = usize::from(u16::from_be_bytes([hi, byte]));
                if expected > self.max_payload {
                    return Err(CaptureError::OversizeRecord {
                        len: expected,
                        max: self.max_payload,
                    });
                }
                if expected == 0 {
                    return Ok(Some(CaptureRecord {
                        payload: Vec::new(),
                    }));
                }
                self.phase = Phase::Payload {
                    expected,
                    buf: Vec::with_capacity(expected),
                };
                Ok(None)
            }
            Phase::Payload { expected, mut buf } => {
                buf.push(byte);
                if buf.len() == expected {
                    Ok(Some(CaptureRecord { payload: buf }))
                } else {
                    self.phase = Phase::Payload { expected, buf };
                    Ok(None)
                }
            }
        }
    }

    /// Whether the assembler sits between records
    pub fn is_idle(&self) -> bool {
        matches!(self.phase, Phase::LenHi)
    }

    /// Check that the stream did not end in the middle of a record
    pub fn verify_complete(&self) -> Result<(), CaptureError> {
        if self.is_idle() {
            Ok(())
        } else {
            Err(CaptureError::TruncatedRecord)
        }
    }
}
