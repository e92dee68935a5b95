//! Ring Buffer Implementation

/// Default buffer capacity (16 KiB, one block-RAM bank on the reference hardware)
pub const DEFAULT_CAPACITY: usize = 16384;

/// Fixed-capacity byte ring with explicit occupancy accounting.
///
/// Fullness is tracked with a dedicated counter rather than derived from
/// cursor comparison: `write_location == read_location` is ambiguous
/// between empty and full, and this buffer must distinguish the two so the
/// layer above can flag overrun instead of wrapping over unread data.
///
/// The buffer deliberately does not police capacity on writes. Addressing
/// is owned by the writer (the frame builder reserves header cells and
/// backfills them later), so capacity decisions live in its occupancy
/// monitor; this type only stores bytes and keeps the counts honest.
pub struct RingBuffer {
    /// Pre-allocated storage
    storage: Box<[u8]>,
    /// Capacity of the buffer
    capacity: usize,
    /// Next free write index
    write_location: usize,
    /// Next byte to hand to the consumer
    read_location: usize,
    /// Count of valid unread bytes, reserved header cells included
    occupancy: usize,
}

impl RingBuffer {
    /// Create a new ring buffer with given capacity.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            capacity,
            write_location: 0,
            read_location: 0,
            occupancy: 0,
        }
    }

    /// Create a buffer with default capacity (16 KiB)
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    /// Write a byte at the current write location without advancing it.
    ///
    /// The caller owns addressing: it advances the cursor separately with
    /// [`advance_write`](Self::advance_write) once the cell is committed.
    pub fn push(&mut self, byte: u8) {
        self.storage[self.write_location] = byte;
    }

    /// Write a byte at an absolute index, wrapping modulo capacity.
    ///
    /// Used to finalize a record header after its payload length is known.
    /// The target cells must already have been claimed by the writer.
    pub fn backfill(&mut self, index: usize, byte: u8) {
        self.storage[index % self.capacity] = byte;
    }

    /// Advance the write cursor by `n` cells, wrapping modulo capacity
    pub fn advance_write(&mut self, n: usize) {
        self.write_location = (self.write_location + n) % self.capacity;
    }

    /// Whether at least one unread byte is resident
    pub fn data_available(&self) -> bool {
        self.occupancy != 0
    }

    /// Byte at the read cursor, or `None` when nothing is available
    pub fn peek(&self) -> Option<u8> {
        if self.data_available() {
            Some(self.storage[self.read_location])
        } else {
            None
        }
    }

    /// Advance the read cursor after an acknowledged read
    pub fn advance_read(&mut self) {
        self.read_location = (self.read_location + 1) % self.capacity;
    }

    /// Apply one cycle's occupancy accounting.
    ///
    /// `produced` is the number of cells the writer claimed this cycle
    /// (one per payload byte, two for a header reservation, zero for
    /// backfill writes into already-claimed cells). `consumed` is whether
    /// the reader acknowledged a byte this cycle; the caller must only
    /// pass `true` when data was actually available.
    ///
    /// A simultaneous single-byte write and read cancel exactly, leaving
    /// occupancy unchanged.
    pub fn account(&mut self, produced: usize, consumed: bool) {
        if consumed {
            self.occupancy = self.occupancy + produced - 1;
        } else {
            self.occupancy += produced;
        }
        debug_assert!(self.occupancy <= self.capacity);
        debug_assert_eq!(
            self.occupancy % self.capacity,
            (self.write_location + self.capacity - self.read_location) % self.capacity,
        );
    }

    /// Number of valid unread bytes currently resident
    pub fn occupancy(&self) -> usize {
        self.occupancy
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.occupancy == 0
    }

    /// Check if every cell holds an unread byte
    pub fn is_full(&self) -> bool {
        self.occupancy == self.capacity
    }

    /// Get the buffer capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current write cursor
    pub fn write_location(&self) -> usize {
        self.write_location
    }

    /// Current read cursor
    pub fn read_location(&self) -> usize {
        self.read_location
    }

    /// Reset cursors and occupancy to the empty state
    pub fn clear(&mut self) {
        self.write_location = 0;
        self.read_location = 0;
        self.occupancy = 0;
    }
}
