//! UTMI PHY Receive Interface
//!
//! Types for the receive half of a UTMI-style USB PHY: the per-cycle
//! signal record the transceiver presents, the [`PhySource`] abstraction
//! the capture engine is driven from, and a scripted [`MockPhy`] for
//! tests and bring-up without hardware.
//!
//! The PHY itself (ULPI wrapper, clocking, line-state decoding) is
//! external; this crate only fixes the signal contract at the boundary.

mod mock;

pub use mock::MockPhy;

use serde::{Deserialize, Serialize};

/// UTMI receive signals sampled on one clock cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtmiRx {
    /// Line activity: a transmission is in progress
    pub rx_active: bool,
    /// A received byte is present this cycle
    pub rx_valid: bool,
    /// Received data; meaningful only while `rx_valid` is asserted
    pub data: u8,
    /// PHY-reported receive error (bit stuffing, EOP, ...)
    pub rx_error: bool,
}

impl UtmiRx {
    /// Quiet bus: no activity, no data
    pub fn quiet() -> Self {
        Self::default()
    }

    /// Active line with no byte presented (turnaround / inter-byte gap)
    pub fn active() -> Self {
        Self {
            rx_active: true,
            ..Self::default()
        }
    }

    /// Active line presenting one received byte
    pub fn byte(data: u8) -> Self {
        Self {
            rx_active: true,
            rx_valid: true,
            data,
            rx_error: false,
        }
    }
}

/// A source of per-cycle UTMI receive signals.
///
/// Implementations model the PHY side of the capture clock domain: each
/// call yields the signals for exactly one cycle, in order, and `None`
/// once the source is exhausted. Real transceiver front-ends and scripted
/// mocks both sit behind this trait.
pub trait PhySource {
    /// Signals for the next clock cycle
    fn next_cycle(&mut self) -> Option<UtmiRx>;
}
