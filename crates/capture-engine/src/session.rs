//! Capture Session
//!
//! Drives the engine over a PHY cycle source, drains the consumer port,
//! reassembles records, and forwards them to a downstream consumer over
//! an async channel without ever blocking the capture loop.

use crate::engine::{CaptureConfig, CaptureEngine, CycleInputs, FsmState};
use crate::error::CaptureError;
use crate::record::{CaptureRecord, RecordAssembler};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use utmi_phy::{PhySource, UtmiRx};

/// Counters for one capture run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureStats {
    /// Clock cycles the engine was ticked
    pub cycles: u64,
    /// Bytes drained through the consumer port
    pub bytes_drained: u64,
    /// Records delivered to the channel
    pub records_forwarded: u64,
    /// Records dropped because the channel was full or closed
    pub records_dropped: u64,
    /// Cycles on which the PHY flagged a receive error
    pub error_cycles: u64,
    /// Engine state when the run ended
    pub final_state: FsmState,
}

/// One capture run: engine, reassembler, and delivery accounting.
///
/// The session strobes the consumer port only for bytes belonging to
/// finalized records (it stays `in_flight_bytes` behind the writer), so
/// the reassembler never observes a header that has not been backfilled.
pub struct CaptureSession {
    engine: CaptureEngine,
    assembler: RecordAssembler,
    stats: CaptureStats,
}

impl CaptureSession {
    /// Create a session from an engine configuration
    pub fn new(config: CaptureConfig) -> Result<Self, CaptureError> {
        let max_payload = config.max_packet_size;
        Ok(Self {
            engine: CaptureEngine::new(config)?,
            assembler: RecordAssembler::new(max_payload),
            stats: CaptureStats::default(),
        })
    }

    /// Run until the PHY source is exhausted or the engine halts, then
    /// drain everything still buffered. Completed records are forwarded
    /// through `record_tx` with a non-blocking send; a full channel drops
    /// the record and counts it rather than stall the capture loop.
    pub async fn run<P: PhySource>(
        &mut self,
        phy: &mut P,
        record_tx: mpsc::Sender<CaptureRecord>,
    ) -> CaptureStats {
        info!("capture session started");

        while let Some(rx) = phy.next_cycle() {
            if rx.rx_error {
                self.stats.error_cycles += 1;
            }
            let next = self.engine.occupancy() > self.engine.in_flight_bytes();
            self.step(CycleInputs { rx, next }, true, &record_tx);

            if let Some(fault) = self.engine.fault() {
                warn!("capture halted: {}", fault);
                break;
            }
        }

        // Let an in-flight header finalize before the final drain.
        while matches!(self.engine.state(), FsmState::Eop1 | FsmState::Eop2) {
            let next = self.engine.occupancy() > self.engine.in_flight_bytes();
            self.step(CycleInputs { rx: UtmiRx::quiet(), next }, true, &record_tx);
        }

        // Drain what remains; bytes of a record that never finalized are
        // counted but not parsed, since their header is stale.
        let unfinalized = self.engine.in_flight_bytes();
        while self.engine.data_available() {
            let assemble = self.engine.occupancy() > unfinalized;
            self.step(CycleInputs::drain(), assemble, &record_tx);
        }
        if unfinalized > 0 {
            warn!("{} bytes of an unfinalized record discarded", unfinalized);
        }
        if let Err(e) = self.assembler.verify_complete() {
            warn!("drained stream incomplete: {}", e);
        }

        self.stats.final_state = self.engine.state();
        info!(
            "capture session finished: {} cycles, {} records, {} bytes",
            self.stats.cycles, self.stats.records_forwarded, self.stats.bytes_drained
        );
        self.stats.clone()
    }

    /// Tick once and route any drained byte through the reassembler
    fn step(&mut self, inputs: CycleInputs, assemble: bool, record_tx: &mpsc::Sender<CaptureRecord>) {
        let report = self.engine.tick(inputs);
        self.stats.cycles += 1;

        let Some(byte) = report.consumed else {
            return;
        };
        self.stats.bytes_drained += 1;
        if !assemble {
            return;
        }

        match self.assembler.push_byte(byte) {
            Ok(Some(record)) => match record_tx.try_send(record) {
                Ok(()) => self.stats.records_forwarded += 1,
                Err(_) => {
                    self.stats.records_dropped += 1;
                    warn!("record consumer not keeping up, record dropped");
                }
            },
            Ok(None) => {}
            Err(e) => {
                // Only reachable on a corrupted stream; flag it loudly.
                warn!("record reassembly failed: {}", e);
            }
        }
    }

    /// The engine driven by this session
    pub fn engine(&self) -> &CaptureEngine {
        &self.engine
    }

    /// Counters accumulated so far
    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    /// Reset the engine, reassembler, and counters for a fresh run
    pub fn reset(&mut self) {
        self.engine.reset();
        self.assembler = RecordAssembler::new(self.engine.config().max_packet_size);
        self.stats = CaptureStats::default();
    }
}
