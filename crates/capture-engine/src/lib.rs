//! USB Bus Capture Engine
//!
//! Captures raw USB traffic observed on a UTMI-style PHY interface and
//! streams it, framed into length-prefixed records, through a fixed
//! capacity ring buffer to a byte-at-a-time consumer port.
//!
//! The engine runs inline with a live link, so it makes an irrevocable
//! decision every clock cycle. It never drops data silently: when the
//! consumer falls behind, capture halts with a sticky overrun flag
//! rather than wrap over unread bytes.

mod engine;
mod error;
mod monitor;
mod record;
mod session;

pub use engine::{
    CaptureConfig, CaptureEngine, CycleInputs, CycleReport, FsmState, HEADER_SIZE_BYTES,
    MAX_PACKET_SIZE_BYTES,
};
pub use error::CaptureError;
pub use record::{CaptureRecord, RecordAssembler};
pub use session::{CaptureSession, CaptureStats};
