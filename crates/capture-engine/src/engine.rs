//! Capture Engine State Machine
//!
//! Observes per-cycle UTMI receive signals, frames each transmission into
//! a length-prefixed record in the ring buffer, and exposes the consumer
//! port the captured stream drains through. Every decision is made in the
//! cycle it applies to; there is no lookahead and no resynchronization.

use crate::error::CaptureError;
use crate::monitor;
use ring_buffer::{RingBuffer, DEFAULT_CAPACITY};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use utmi_phy::UtmiRx;

/// Record header size: a 16-bit payload length, written high byte first
pub const HEADER_SIZE_BYTES: usize = 2;

/// Largest meaningful payload: 1024 data bytes plus a PID and a CRC16
pub const MAX_PACKET_SIZE_BYTES: usize = 1024 + 1 + 2;

/// Capture engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Ring buffer depth in bytes
    pub mem_depth: usize,
    /// Payload bound above which a packet is treated as babble
    pub max_packet_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            mem_depth: DEFAULT_CAPACITY,
            max_packet_size: MAX_PACKET_SIZE_BYTES,
        }
    }
}

/// Frame builder state. Exactly one is active per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FsmState {
    /// Waiting for line activity
    #[default]
    Idle,
    /// Payload bytes are written as they arrive
    Capture,
    /// First header backfill cycle (length high byte)
    Eop1,
    /// Second header backfill cycle (length low byte); turnaround point
    Eop2,
    /// Packet exceeded the maximum allowable size; sticky until reset
    Babble,
    /// Buffer exhausted before the consumer drained it; sticky until reset
    Overrun,
}

/// Signals sampled by the engine on one clock cycle
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleInputs {
    /// PHY receive signals
    pub rx: UtmiRx,
    /// Consumer acknowledge strobe
    pub next: bool,
}

impl CycleInputs {
    /// Bus signals only, strobe deasserted
    pub fn rx(rx: UtmiRx) -> Self {
        Self { rx, next: false }
    }

    /// No bus activity, strobe asserted
    pub fn drain() -> Self {
        Self {
            rx: UtmiRx::quiet(),
            next: true,
        }
    }
}

/// What one cycle did
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleReport {
    /// Byte handed to the consumer, if the strobe was honored
    pub consumed: Option<u8>,
    /// A record's header was finalized this cycle
    pub record_finalized: bool,
}

/// Cycle-driven USB capture engine.
///
/// The frame builder is the sole writer into the ring buffer and the
/// consumer port its sole reader; the occupancy counter is the only
/// shared accounting between them, updated once per [`tick`](Self::tick).
///
/// Cells become readable as soon as they are claimed, which includes the
/// two header cells of a packet still being captured; those hold stale
/// bytes until the end-of-packet backfill. Readers that parse records
/// should stay [`in_flight_bytes`](Self::in_flight_bytes) behind the
/// write side.
pub struct CaptureEngine {
    buffer: RingBuffer,
    state: FsmState,
    /// Buffer index of the active packet's length header
    header_location: usize,
    /// Payload bytes captured so far for the active packet
    packet_size: u16,
    /// Cells claimed for the packet whose header is not yet finalized
    in_flight: usize,
    config: CaptureConfig,
}

impl CaptureEngine {
    /// Create an engine from a validated configuration
    pub fn new(config: CaptureConfig) -> Result<Self, CaptureError> {
        if config.mem_depth <= HEADER_SIZE_BYTES {
            return Err(CaptureError::InvalidCapacity(config.mem_depth));
        }
        if config.max_packet_size >= u16::MAX as usize {
            return Err(CaptureError::MaxPacketTooLarge(config.max_packet_size));
        }
        Ok(Self {
            buffer: RingBuffer::new(config.mem_depth),
            state: FsmState::Idle,
            header_location: 0,
            packet_size: 0,
            in_flight: 0,
            config,
        })
    }

    /// Create an engine with the default 16 KiB buffer
    pub fn with_default_config() -> Self {
        Self {
            buffer: RingBuffer::with_default_capacity(),
            state: FsmState::Idle,
            header_location: 0,
            packet_size: 0,
            in_flight: 0,
            config: CaptureConfig::default(),
        }
    }

    /// Advance the engine by one clock cycle.
    ///
    /// All state visible afterwards reflects this cycle's inputs and the
    /// state present when the cycle began. A producer write and a consumer
    /// acknowledge in the same cycle cancel in the occupancy accounting.
    pub fn tick(&mut self, inputs: CycleInputs) -> CycleReport {
        let mut report = CycleReport::default();
        let mut produced = 0;

        // Consumer port: honor the strobe only when data is available; a
        // strobe with nothing available changes no state.
        let consumed = inputs.next && self.buffer.data_available();
        if consumed {
            report.consumed = self.buffer.peek();
            self.buffer.advance_read();
        }

        match self.state {
            FsmState::Idle => {
                if inputs.rx.rx_active {
                    produced = self.start_packet();
                }
            }

            FsmState::Capture => {
                let mut next = FsmState::Capture;
                if inputs.rx.rx_valid {
                    let trips = monitor::payload_write_trips(
                        self.buffer.occupancy(),
                        self.buffer.capacity(),
                    );
                    self.buffer.push(inputs.rx.data);
                    self.buffer.advance_write(1);
                    self.packet_size += 1;
                    self.in_flight += 1;
                    produced = 1;

                    if trips {
                        warn!(
                            "buffer full with {} bytes unread, capture halted",
                            self.buffer.capacity()
                        );
                        next = FsmState::Overrun;
                    } else if usize::from(self.packet_size) > self.config.max_packet_size {
                        warn!(
                            "packet exceeded {} bytes, capture halted",
                            self.config.max_packet_size
                        );
                        next = FsmState::Babble;
                    }
                }
                // Activity dropping ends the record, whatever the fill state.
                if !inputs.rx.rx_active {
                    next = FsmState::Eop1;
                }
                self.state = next;
            }

            FsmState::Eop1 => {
                self.buffer
                    .backfill(self.header_location, (self.packet_size >> 8) as u8);
                self.state = FsmState::Eop2;
            }

            FsmState::Eop2 => {
                self.buffer
                    .backfill(self.header_location + 1, (self.packet_size & 0xFF) as u8);
                self.in_flight = 0;
                report.record_finalized = true;
                debug!("record finalized with {} payload bytes", self.packet_size);

                if inputs.rx.rx_active {
                    // Stop turnaround: the next packet starts in the same
                    // cycle this header finishes, with no idle in between.
                    produced = self.start_packet();
                } else {
                    self.state = FsmState::Idle;
                }
            }

            FsmState::Babble | FsmState::Overrun => {}
        }

        self.buffer.account(produced, consumed);
        report
    }

    /// Reserve header cells for a new packet and enter capture.
    ///
    /// Routes to the overrun state instead when the cells would land on
    /// unread data; in that case nothing is claimed.
    fn start_packet(&mut self) -> usize {
        if !monitor::reservation_fits(self.buffer.occupancy(), self.buffer.capacity()) {
            warn!(
                "no room for a record header with {} bytes unread, capture halted",
                self.buffer.occupancy()
            );
            self.state = FsmState::Overrun;
            return 0;
        }
        self.header_location = self.buffer.write_location();
        self.buffer.advance_write(HEADER_SIZE_BYTES);
        self.packet_size = 0;
        self.in_flight = HEADER_SIZE_BYTES;
        self.state = FsmState::Capture;
        HEADER_SIZE_BYTES
    }

    /// External reset: empty the buffer and return to idle.
    ///
    /// The only way out of the babble and overrun states.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = FsmState::Idle;
        self.header_location = 0;
        self.packet_size = 0;
        self.in_flight = 0;
        debug!("capture engine reset");
    }

    /// Current frame builder state
    pub fn state(&self) -> FsmState {
        self.state
    }

    /// Level signal: a packet is being captured
    pub fn capturing(&self) -> bool {
        self.state == FsmState::Capture
    }

    /// Level signal: capture halted on buffer exhaustion
    pub fn overrun(&self) -> bool {
        self.state == FsmState::Overrun
    }

    /// The sticky fault this engine halted on, if any
    pub fn fault(&self) -> Option<CaptureError> {
        match self.state {
            FsmState::Overrun => Some(CaptureError::Overrun {
                occupancy: self.buffer.occupancy(),
            }),
            FsmState::Babble => Some(CaptureError::Babble {
                max: self.config.max_packet_size,
            }),
            _ => None,
        }
    }

    /// Consumer port: at least one unread byte is resident
    pub fn data_available(&self) -> bool {
        self.buffer.data_available()
    }

    /// Consumer port: byte at the read cursor, `None` when nothing is available
    pub fn data_out(&self) -> Option<u8> {
        self.buffer.peek()
    }

    /// Count of valid unread bytes in the buffer
    pub fn occupancy(&self) -> usize {
        self.buffer.occupancy()
    }

    /// Buffer capacity in bytes
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Cells claimed for a packet whose header is not yet finalized.
    ///
    /// These trail the write cursor and hold a stale length header until
    /// the end-of-packet backfill completes; record parsers should not
    /// read into them.
    pub fn in_flight_bytes(&self) -> usize {
        self.in_flight
    }

    /// Read-only view of the backing ring buffer
    pub fn buffer(&self) -> &RingBuffer {
        &self.buffer
    }

    /// Engine configuration
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordAssembler;
    use proptest::prelude::*;
    use utmi_phy::{MockPhy, PhySource};

    /// Tick the engine through every scripted cycle, consumer idle.
    fn run_script(engine: &mut CaptureEngine, mut phy: MockPhy) -> Vec<FsmState> {
        let mut states = Vec::new();
        while let Some(rx) = phy.next_cycle() {
            engine.tick(CycleInputs::rx(rx));
            states.push(engine.state());
        }
        states
    }

    /// Drain every available byte through the consumer port.
    fn drain_all(engine: &mut CaptureEngine) -> Vec<u8> {
        let mut out = Vec::new();
        while engine.data_available() {
            let report = engine.tick(CycleInputs::drain());
            out.push(report.consumed.unwrap());
        }
        out
    }

    #[test]
    fn test_five_byte_burst_scenario() {
        let mut engine = CaptureEngine::with_default_config();
        run_script(
            &mut engine,
            MockPhy::new().burst(&[0x2D, 0x00, 0x01, 0x02, 0x03]).idle(2),
        );

        assert_eq!(engine.state(), FsmState::Idle);
        assert_eq!(engine.occupancy(), 7);

        let drained = drain_all(&mut engine);
        assert_eq!(drained, vec![0x00, 0x05, 0x2D, 0x00, 0x01, 0x02, 0x03]);
        assert_eq!(engine.occupancy(), 0);
    }

    #[test]
    fn test_round_trip_framing_long_burst() {
        let payload: Vec<u8> = (0..300).map(|i| i as u8).collect();
        let mut engine = CaptureEngine::with_default_config();
        run_script(&mut engine, MockPhy::new().burst(&payload).idle(2));

        let drained = drain_all(&mut engine);
        assert_eq!(drained.len(), payload.len() + HEADER_SIZE_BYTES);
        assert_eq!(drained[0], 0x01);
        assert_eq!(drained[1], 0x2C);
        assert_eq!(&drained[2..], &payload[..]);
    }

    #[test]
    fn test_back_to_back_packets() {
        let mut engine = CaptureEngine::with_default_config();
        let states = run_script(
            &mut engine,
            MockPhy::new()
                .burst(&[0x01, 0x02, 0x03])
                .back_to_back_burst(&[0x04, 0x05])
                .idle(2),
        );

        // The second packet starts straight out of the header turnaround.
        assert!(states
            .windows(2)
            .any(|w| w[0] == FsmState::Eop2 && w[1] == FsmState::Capture));
        assert!(!states[..states.len() - 1].contains(&FsmState::Idle));

        let drained = drain_all(&mut engine);
        assert_eq!(
            drained,
            vec![0x00, 0x03, 0x01, 0x02, 0x03, 0x00, 0x02, 0x04, 0x05]
        );
    }

    #[test]
    fn test_gap_in_valid_does_not_split_packet() {
        let mut engine = CaptureEngine::with_default_config();
        let phy = MockPhy::new()
            .cycle(UtmiRx::active())
            .cycle(UtmiRx::byte(0x11))
            .cycle(UtmiRx::active()) // byte gap, line still active
            .cycle(UtmiRx::byte(0x22))
            .cycle(UtmiRx::quiet())
            .idle(2);
        run_script(&mut engine, phy);

        assert_eq!(drain_all(&mut engine), vec![0x00, 0x02, 0x11, 0x22]);
    }

    #[test]
    fn test_overrun_trip_freezes_buffer() {
        let mut engine = CaptureEngine::new(CaptureConfig {
            mem_depth: 8,
            max_packet_size: MAX_PACKET_SIZE_BYTES,
        })
        .unwrap();

        // Header reservation claims 2 cells; the sixth payload byte sees
        // occupancy 7 of 8 and trips while still landing.
        run_script(&mut engine, MockPhy::new().burst(&[0xAB; 10]));

        assert_eq!(engine.state(), FsmState::Overrun);
        assert!(engine.overrun());
        assert!(!engine.capturing());
        assert_eq!(engine.occupancy(), 8);
        assert!(matches!(
            engine.fault(),
            Some(CaptureError::Overrun { occupancy: 8 })
        ));

        // Frozen: further traffic changes nothing.
        let write_before = engine.buffer().write_location();
        run_script(&mut engine, MockPhy::new().burst(&[0xCD; 4]).idle(2));
        assert_eq!(engine.buffer().write_location(), write_before);
        assert_eq!(engine.occupancy(), 8);
        assert_eq!(engine.state(), FsmState::Overrun);

        // Draining still works, and the state stays latched until reset.
        let drained = drain_all(&mut engine);
        assert_eq!(drained.len(), 8);
        assert_eq!(&drained[2..], &[0xAB; 6]);
        assert_eq!(engine.state(), FsmState::Overrun);

        engine.reset();
        assert_eq!(engine.state(), FsmState::Idle);
        run_script(&mut engine, MockPhy::new().burst(&[0x01]).idle(2));
        assert_eq!(drain_all(&mut engine), vec![0x00, 0x01, 0x01]);
    }

    #[test]
    fn test_reservation_refused_when_headers_cannot_fit() {
        let mut engine = CaptureEngine::new(CaptureConfig {
            mem_depth: 8,
            max_packet_size: MAX_PACKET_SIZE_BYTES,
        })
        .unwrap();

        // One finalized 5-byte record leaves occupancy 7 of 8.
        run_script(&mut engine, MockPhy::new().burst(&[0x01; 5]).idle(2));
        assert_eq!(engine.occupancy(), 7);
        assert_eq!(engine.state(), FsmState::Idle);

        let write_before = engine.buffer().write_location();
        run_script(&mut engine, MockPhy::new().burst(&[0x02]));
        assert_eq!(engine.state(), FsmState::Overrun);
        assert_eq!(engine.buffer().write_location(), write_before);
        assert_eq!(engine.occupancy(), 7);
    }

    #[test]
    fn test_babble_trips_on_oversize_packet() {
        let mut engine = CaptureEngine::new(CaptureConfig {
            mem_depth: 64,
            max_packet_size: 4,
        })
        .unwrap();

        run_script(&mut engine, MockPhy::new().burst(&[0x55; 7]));
        assert_eq!(engine.state(), FsmState::Babble);
        assert!(matches!(
            engine.fault(),
            Some(CaptureError::Babble { max: 4 })
        ));
        // Five bytes landed (the fifth tripped the bound), plus the header cells.
        assert_eq!(engine.occupancy(), 7);

        engine.reset();
        assert_eq!(engine.state(), FsmState::Idle);
        assert_eq!(engine.occupancy(), 0);
    }

    #[test]
    fn test_strobe_without_data_is_a_noop() {
        let mut engine = CaptureEngine::with_default_config();
        let report = engine.tick(CycleInputs::drain());

        assert_eq!(report.consumed, None);
        assert_eq!(engine.occupancy(), 0);
        assert_eq!(engine.buffer().read_location(), 0);
    }

    #[test]
    fn test_simultaneous_push_and_pop_keeps_occupancy() {
        let mut engine = CaptureEngine::with_default_config();
        run_script(&mut engine, MockPhy::new().cycle(UtmiRx::active()).cycle(UtmiRx::byte(0xAA)));
        assert!(engine.capturing());
        let before = engine.occupancy();

        let report = engine.tick(CycleInputs {
            rx: UtmiRx::byte(0xBB),
            next: true,
        });
        assert!(report.consumed.is_some());
        assert_eq!(engine.occupancy(), before);
    }

    #[test]
    fn test_capturing_level_signal() {
        let mut engine = CaptureEngine::with_default_config();
        assert!(!engine.capturing());

        engine.tick(CycleInputs::rx(UtmiRx::active()));
        assert!(engine.capturing());

        engine.tick(CycleInputs::rx(UtmiRx::byte(0x01)));
        assert!(engine.capturing());

        engine.tick(CycleInputs::rx(UtmiRx::quiet()));
        assert!(!engine.capturing());
        assert_eq!(engine.state(), FsmState::Eop1);

        let report = engine.tick(CycleInputs::rx(UtmiRx::quiet()));
        assert!(!report.record_finalized);
        let report = engine.tick(CycleInputs::rx(UtmiRx::quiet()));
        assert!(report.record_finalized);
        assert_eq!(engine.state(), FsmState::Idle);
    }

    #[test]
    fn test_config_validation() {
        assert!(matches!(
            CaptureEngine::new(CaptureConfig {
                mem_depth: 2,
                max_packet_size: 64,
            }),
            Err(CaptureError::InvalidCapacity(2))
        ));
        assert!(matches!(
            CaptureEngine::new(CaptureConfig {
                mem_depth: 1024,
                max_packet_size: usize::from(u16::MAX),
            }),
            Err(CaptureError::MaxPacketTooLarge(_))
        ));
    }

    #[test]
    fn test_occupancy_matches_cursor_distance_throughout() {
        let mut engine = CaptureEngine::new(CaptureConfig {
            mem_depth: 32,
            max_packet_size: MAX_PACKET_SIZE_BYTES,
        })
        .unwrap();
        let mut phy = MockPhy::new()
            .burst(&[0x01, 0x02, 0x03])
            .idle(2)
            .back_to_back_burst(&[0x04])
            .idle(4);

        while let Some(rx) = phy.next_cycle() {
            // Drain opportunistically so pushes and pops overlap.
            let next = engine.occupancy() > engine.in_flight_bytes();
            engine.tick(CycleInputs { rx, next });

            let buf = engine.buffer();
            assert!(buf.occupancy() <= buf.capacity());
            assert_eq!(
                buf.occupancy() % buf.capacity(),
                (buf.write_location() + buf.capacity() - buf.read_location()) % buf.capacity(),
            );
        }
    }

    proptest! {
        /// Arbitrary packet trains survive capture, drain, and reassembly.
        #[test]
        fn prop_packet_trains_reassemble(
            payloads in proptest::collection::vec(
                proptest::collection::vec(any::<u8>(), 0..40),
                1..8,
            )
        ) {
            let mut engine = CaptureEngine::with_default_config();
            let mut phy = MockPhy::new();
            for p in &payloads {
                phy = phy.burst(p).idle(2);
            }

            let mut assembler = RecordAssembler::new(MAX_PACKET_SIZE_BYTES);
            let mut records = Vec::new();
            let mut ingest = |byte: Option<u8>, records: &mut Vec<Vec<u8>>| {
                if let Some(b) = byte {
                    if let Some(r) = assembler.push_byte(b).unwrap() {
                        records.push(r.payload);
                    }
                }
            };

            while let Some(rx) = phy.next_cycle() {
                let next = engine.occupancy() > engine.in_flight_bytes();
                let report = engine.tick(CycleInputs { rx, next });
                ingest(report.consumed, &mut records);
            }
            while engine.data_available() {
                let report = engine.tick(CycleInputs::drain());
                ingest(report.consumed, &mut records);
            }

            prop_assert_eq!(records, payloads);
        }
    }
}
