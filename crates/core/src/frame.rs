//! Data-link frames and the arena that owns them.
//!
//! # Frame Format
//!
//! ```text
//! +-------------------+
//! | Preamble (1 byte) |  0x7E
//! +-------------------+
//! | crc32 (4)         |  CRC-32 of payload, big-endian
//! +-------------------+
//! | length (1)        |  payload bytes, 0-255
//! +-------------------+
//! | payload           |  [dest, src, slot, kind, message...]
//! | (variable)        |
//! +-------------------+
//! ```
//!
//! Every byte goes on the wire most significant bit first.
//!
//! # Ownership
//!
//! Frames live in a [`FrameArena`] and are referenced by [`FrameId`]. A frame
//! is held by the receive side while its bytes arrive and by the send side
//! while it waits in a queue or goes out on the wire. A frame forwarded
//! cut-through is held by both at once: the receive side is the only writer,
//! and the send side may only read payload bytes that have been committed.
//! The arena drops a frame when its last holder releases it.

use crate::crc;
use crate::error::LinkError;

/// Start-of-frame marker.
pub const PREAMBLE: u8 = 0x7E;

/// CRC (4 bytes) + length (1 byte).
pub const HEADER_LEN: usize = 5;

/// Largest payload the length byte can describe.
pub const MAX_PAYLOAD: usize = u8::MAX as usize;

/// Bit `index` of `bytes`, counting from the MSB of the first byte.
pub(crate) fn msb_bit(bytes: &[u8], index: usize) -> bool {
    (bytes[index / 8] >> (7 - index % 8)) & 1 == 1
}

/// Build the 5-byte header for a payload: big-endian CRC then length.
pub fn encode_header(payload: &[u8]) -> Result<[u8; HEADER_LEN], LinkError> {
    let length = u8::try_from(payload.len()).map_err(|_| LinkError::PayloadTooLong {
        len: payload.len(),
        max: MAX_PAYLOAD,
    })?;
    let [a, b, c, d] = crc::format_bytes(crc::compute(payload));
    Ok([a, b, c, d, length])
}

/// A data-link packet under construction or ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    header: [u8; HEADER_LEN],
    payload: Vec<u8>,

    /// Payload bytes written so far. Equal to the payload length for
    /// outbound frames.
    committed: usize,

    /// Hand the frame to the network layer once it has fully arrived
    deliver: bool,

    /// The send path needed a payload byte that was not committed yet
    send_backoff: bool,

    /// Completed bytes are waiting for the deferred writer
    receive_backoff: bool,
}

impl Frame {
    /// Frame a locally originated payload.
    ///
    /// # Errors
    /// `LinkError::PayloadTooLong` if the payload exceeds 255 bytes.
    pub fn outbound(payload: Vec<u8>) -> Result<Self, LinkError> {
        let header = encode_header(&payload)?;
        Ok(Self {
            header,
            committed: payload.len(),
            payload,
            deliver: false,
            send_backoff: false,
            receive_backoff: false,
        })
    }

    /// Empty frame allocated when a preamble is detected.
    pub fn inbound() -> Self {
        Self {
            header: [0; HEADER_LEN],
            payload: Vec::new(),
            committed: 0,
            deliver: true,
            send_backoff: false,
            receive_backoff: false,
        }
    }

    pub fn header(&self) -> &[u8; HEADER_LEN] {
        &self.header
    }

    /// Payload length announced by the header.
    pub fn length(&self) -> usize {
        self.header[4] as usize
    }

    /// CRC carried in the header.
    pub fn header_crc(&self) -> u32 {
        crc::parse_bytes([self.header[0], self.header[1], self.header[2], self.header[3]])
    }

    /// Committed payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.committed]
    }

    pub fn committed(&self) -> usize {
        self.committed
    }

    pub fn deliver(&self) -> bool {
        self.deliver
    }

    pub fn set_deliver(&mut self, deliver: bool) {
        self.deliver = deliver;
    }

    pub fn send_backoff(&self) -> bool {
        self.send_backoff
    }

    pub fn receive_backoff(&self) -> bool {
        self.receive_backoff
    }

    pub(crate) fn set_send_backoff(&mut self, backoff: bool) {
        self.send_backoff = backoff;
    }

    pub(crate) fn set_receive_backoff(&mut self, backoff: bool) {
        self.receive_backoff = backoff;
    }

    /// `(destination, source)` once both address bytes are committed.
    pub fn addresses(&self) -> Option<(u8, u8)> {
        match self.payload() {
            [destination, source, ..] => Some((*destination, *source)),
            _ => None,
        }
    }

    pub(crate) fn set_header_byte(&mut self, index: usize, byte: u8) {
        self.header[index] = byte;
    }

    /// Size the payload buffer from the committed length byte.
    pub(crate) fn begin_payload(&mut self) {
        self.payload = vec![0; self.length()];
        self.committed = 0;
    }

    /// Append the next received payload byte. Returns false when the
    /// payload is already full.
    pub(crate) fn push_payload_byte(&mut self, byte: u8) -> bool {
        match self.payload.get_mut(self.committed) {
            Some(slot) => {
                *slot = byte;
                self.committed += 1;
                true
            }
            None => false,
        }
    }

    /// Mark every payload byte committed, leaving unreceived bytes zeroed.
    ///
    /// Used when reception is abandoned under a frame that is already being
    /// forwarded; the stale CRC makes the downstream receiver reject it.
    pub(crate) fn seal(&mut self) {
        self.payload.resize(self.length(), 0);
        self.committed = self.payload.len();
    }

    pub(crate) fn header_bit(&self, index: usize) -> bool {
        msb_bit(&self.header, index)
    }

    /// Payload bit `index`, or `None` while its byte is still uncommitted.
    pub(crate) fn payload_bit(&self, index: usize) -> Option<bool> {
        (index / 8 < self.committed).then(|| msb_bit(&self.payload, index))
    }

    /// Full wire image: preamble, header, committed payload.
    pub fn to_wire_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + HEADER_LEN + self.committed);
        bytes.push(PREAMBLE);
        bytes.extend_from_slice(&self.header);
        bytes.extend_from_slice(self.payload());
        bytes
    }

    /// The wire image as a bit sequence, MSB first.
    pub fn wire_bits(&self) -> Vec<bool> {
        let bytes = self.to_wire_bytes();
        (0..bytes.len() * 8).map(|i| msb_bit(&bytes, i)).collect()
    }
}

/// Handle to a frame stored in a [`FrameArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(usize);

/// Which side of the link holds a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Holder {
    Receive,
    Send,
}

#[derive(Debug)]
struct Entry {
    frame: Frame,
    receiving: bool,
    sending: bool,
}

impl Entry {
    fn flag(&mut self, holder: Holder) -> &mut bool {
        match holder {
            Holder::Receive => &mut self.receiving,
            Holder::Send => &mut self.sending,
        }
    }
}

/// Slab of frames indexed by [`FrameId`], with a free list for reuse.
#[derive(Debug, Default)]
pub struct FrameArena {
    entries: Vec<Option<Entry>>,
    free: Vec<usize>,
}

impl FrameArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a frame on behalf of `holder`.
    pub fn insert(&mut self, frame: Frame, holder: Holder) -> FrameId {
        let mut entry = Entry {
            frame,
            receiving: false,
            sending: false,
        };
        *entry.flag(holder) = true;

        match self.free.pop() {
            Some(idx) => {
                self.entries[idx] = Some(entry);
                FrameId(idx)
            }
            None => {
                self.entries.push(Some(entry));
                FrameId(self.entries.len() - 1)
            }
        }
    }

    pub fn get(&self, id: FrameId) -> Option<&Frame> {
        self.entries.get(id.0)?.as_ref().map(|e| &e.frame)
    }

    pub fn get_mut(&mut self, id: FrameId) -> Option<&mut Frame> {
        self.entries.get_mut(id.0)?.as_mut().map(|e| &mut e.frame)
    }

    /// Add `holder` to a live frame. Returns false for a stale handle.
    pub fn hold(&mut self, id: FrameId, holder: Holder) -> bool {
        match self.entries.get_mut(id.0).and_then(Option::as_mut) {
            Some(entry) => {
                *entry.flag(holder) = true;
                true
            }
            None => false,
        }
    }

    pub fn is_held_by(&self, id: FrameId, holder: Holder) -> bool {
        match self.entries.get(id.0).and_then(Option::as_ref) {
            Some(entry) => match holder {
                Holder::Receive => entry.receiving,
                Holder::Send => entry.sending,
            },
            None => false,
        }
    }

    /// Drop `holder`'s claim. When no holder remains the frame is removed
    /// and returned.
    pub fn release(&mut self, id: FrameId, holder: Holder) -> Option<Frame> {
        let slot = self.entries.get_mut(id.0)?;
        let entry = slot.as_mut()?;
        *entry.flag(holder) = false;
        if entry.receiving || entry.sending {
            return None;
        }
        self.free.push(id.0);
        slot.take().map(|e| e.frame)
    }

    /// Number of live frames.
    pub fn len(&self) -> usize {
        self.entries.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
