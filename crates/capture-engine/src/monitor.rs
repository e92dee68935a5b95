//! Occupancy & Overrun Monitor
//!
//! Pure decision functions over the buffer's occupancy. Their single job
//! is to keep the frame builder from writing into cells the consumer has
//! not read yet: every path that would wrap onto unread data routes the
//! machine to its terminal overrun state instead of completing the write.

use crate::engine::HEADER_SIZE_BYTES;

/// Whether a payload write this cycle must trip the overrun state.
///
/// Fires one byte early, at `occupancy == capacity - 1`. The byte filling
/// the last free cell still lands, but capture stops there so the two
/// header backfill writes that follow can never alias unread data.
pub fn payload_write_trips(occupancy: usize, capacity: usize) -> bool {
    occupancy == capacity - 1
}

/// Whether a new packet's header cells fit without touching unread data
pub fn reservation_fits(occupancy: usize, capacity: usize) -> bool {
    occupancy + HEADER_SIZE_BYTES <= capacity
}
