//! Receive assembly buffer.
//!
//! Sampled bits are accumulated MSB-first into a small ring of bytes from
//! the sample handler. A finished byte is flagged ready and copied into the
//! frame later, from the main-loop pass, so the sample handler never writes
//! frame storage.
//!
//! # Invariants
//! - `bit_index` is always < 8
//! - the slot being filled is never one of the `ready` slots; completing a
//!   byte while `capacity - 1` bytes are still waiting is an overrun

use crate::error::LinkError;

/// Default ring size in bytes.
pub const DEFAULT_CAPACITY: usize = 5;

#[derive(Debug, Clone)]
pub struct AssemblyBuffer {
    /// Ring storage; the filling slot accumulates bits MSB-aligned
    bytes: Vec<u8>,
    /// Next bit position within the filling slot (0-7)
    bit_index: u8,
    /// Slot the sampler is filling
    fill_index: usize,
    /// Oldest completed slot
    write_index: usize,
    /// Completed slots waiting for the deferred writer
    ready: usize,
}

impl AssemblyBuffer {
    /// # Errors
    /// `LinkError::AssemblyTooSmall` if `capacity < 2`; the filling slot and
    /// one ready slot are the minimum.
    pub fn new(capacity: usize) -> Result<Self, LinkError> {
        if capacity < 2 {
            return Err(LinkError::AssemblyTooSmall { capacity });
        }
        Ok(Self::with_slots(capacity))
    }

    fn with_slots(capacity: usize) -> Self {
        Self {
            bytes: vec![0; capacity],
            bit_index: 0,
            fill_index: 0,
            write_index: 0,
            ready: 0,
        }
    }

    /// Shift one sampled bit into the filling slot.
    ///
    /// Returns `Ok(true)` when the bit completed a byte.
    ///
    /// # Errors
    /// `LinkError::AssemblyOverrun` when the completed byte has nowhere to
    /// go because every other slot is still waiting. The caller must
    /// [`reset`](Self::reset) before pushing again.
    pub fn push_bit(&mut self, bit: bool) -> Result<bool, LinkError> {
        self.bytes[self.fill_index] |= (bit as u8) << (7 - self.bit_index);
        self.bit_index += 1;
        if self.bit_index < 8 {
            return Ok(false);
        }

        self.bit_index = 0;
        self.ready += 1;
        if self.ready == self.capacity() {
            return Err(LinkError::AssemblyOverrun {
                capacity: self.capacity(),
            });
        }
        self.fill_index = (self.fill_index + 1) % self.capacity();
        Ok(true)
    }

    /// Take the oldest completed byte, clearing its slot for reuse.
    pub fn take_ready(&mut self) -> Option<u8> {
        if self.ready == 0 {
            return None;
        }
        let byte = std::mem::take(&mut self.bytes[self.write_index]);
        self.write_index = (self.write_index + 1) % self.capacity();
        self.ready -= 1;
        Some(byte)
    }

    pub fn has_ready(&self) -> bool {
        self.ready > 0
    }

    /// Number of completed bytes waiting.
    pub fn ready_len(&self) -> usize {
        self.ready
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Drop all pending bits and bytes.
    pub fn reset(&mut self) {
        self.bytes.fill(0);
        self.bit_index = 0;
        self.fill_index = 0;
        self.write_index = 0;
        self.ready = 0;
    }
}

impl Default for AssemblyBuffer {
    fn default() -> Self {
        Self::with_slots(DEFAULT_CAPACITY)
    }
}
