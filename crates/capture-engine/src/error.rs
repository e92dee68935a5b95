//! Capture Error Types

use thiserror::Error;

/// Errors reported by the capture engine and its record layers
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Ring buffer too small to hold a header and any payload
    #[error("ring buffer depth {0} cannot hold a record header and payload")]
    InvalidCapacity(usize),

    /// Configured packet bound does not fit the 16-bit length field
    #[error("max packet size {0} exceeds the 16-bit record length field")]
    MaxPacketTooLarge(usize),

    /// Buffer capacity exhausted before the consumer drained it
    #[error("buffer overrun with {occupancy} bytes unread; capture halted until reset")]
    Overrun { occupancy: usize },

    /// Packet exceeded the maximum allowable size
    #[error("babble: packet exceeded {max} bytes; capture halted until reset")]
    Babble { max: usize },

    /// Record length field larger than any packet the engine can produce
    #[error("record length {len} exceeds maximum payload of {max} bytes")]
    OversizeRecord { len: usize, max: usize },

    /// Byte stream ended in the middle of a record
    #[error("byte stream ended mid-record")]
    TruncatedRecord,

    /// Record archival encoding failed
    #[error("record encoding failed: {0}")]
    Encoding(#[from] postcard::Error),
}
