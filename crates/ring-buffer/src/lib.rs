//! Capture Ring Buffer
//!
//! Fixed-capacity byte store with independent write and read cursors and
//! an explicit occupancy counter. Backs the USB capture engine: the frame
//! builder is the sole writer, the consumer port the sole reader, and the
//! occupancy counter is the single piece of shared accounting between them.

mod buffer;

pub use buffer::{RingBuffer, DEFAULT_CAPACITY};
