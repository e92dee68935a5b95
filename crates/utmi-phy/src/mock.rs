//! Scripted Mock PHY
//!
//! Builds a fixed cycle-by-cycle script of receive signals for driving
//! the capture engine in tests, with no hardware attached.

use crate::{PhySource, UtmiRx};
use std::collections::VecDeque;
use tracing::debug;

/// Scripted PHY source.
///
/// Cycles are queued up front with the builder methods and then replayed
/// one per `next_cycle` call. Packet timing follows the UTMI contract:
/// `rx_active` leads the first valid byte by one cycle and deasserts for
/// at least one cycle between packets (except for the back-to-back
/// variant, which keeps the line busy through the turnaround).
#[derive(Debug, Default)]
pub struct MockPhy {
    cycles: VecDeque<UtmiRx>,
}

impl MockPhy {
    /// Create an empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one packet: an activity lead-in cycle, one cycle per payload
    /// byte, and a trailing quiet cycle that ends the packet.
    pub fn burst(mut self, payload: &[u8]) -> Self {
        self.cycles.push_back(UtmiRx::active());
        for &b in payload {
            self.cycles.push_back(UtmiRx::byte(b));
        }
        self.cycles.push_back(UtmiRx::quiet());
        self
    }

    /// Append a packet with zero idle cycles after the previous one.
    ///
    /// The line stays active through the previous packet's two-cycle
    /// header turnaround, so the engine never returns to idle between the
    /// two records.
    pub fn back_to_back_burst(mut self, payload: &[u8]) -> Self {
        self.cycles.push_back(UtmiRx::active());
        self.cycles.push_back(UtmiRx::active());
        for &b in payload {
            self.cycles.push_back(UtmiRx::byte(b));
        }
        self.cycles.push_back(UtmiRx::quiet());
        self
    }

    /// Append `n` quiet cycles
    pub fn idle(mut self, n: usize) -> Self {
        for _ in 0..n {
            self.cycles.push_back(UtmiRx::quiet());
        }
        self
    }

    /// Append one raw cycle (inter-byte stalls, error injection, ...)
    pub fn cycle(mut self, rx: UtmiRx) -> Self {
        self.cycles.push_back(rx);
        self
    }

    /// Number of scripted cycles remaining
    pub fn len(&self) -> usize {
        self.cycles.len()
    }

    /// Whether the script is exhausted
    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty()
    }
}

impl PhySource for MockPhy {
    fn next_cycle(&mut self) -> Option<UtmiRx> {
        let rx = self.cycles.pop_front();
        if self.cycles.is_empty() {
            debug!("mock phy script exhausted");
        }
        rx
    }
}
