//! Bit-level framing engine (data-link layer).
//!
//! Turns queued frames into one transmitted bit per tick, and sampled bits
//! back into frames.
//!
//! # Send Path
//!
//! ```text
//! idle --pop--> Preamble --8 bits--> Header --40 bits--> Payload --len*8 bits--> idle
//! ```
//!
//! A tick with nothing queued still emits a `0` so the line stays clocked.
//! If the next payload bit lives in a byte the receive side has not
//! committed yet (cut-through forwarding outran the deferred writer), the
//! tick emits nothing, flags `send_backoff` on the frame, and the main-loop
//! pass retries the same bit.
//!
//! # Receive Path
//!
//! While idle, sampled bits roll through an 8-bit shift register until it
//! reads `0x7E`. After that, bits go into the [`AssemblyBuffer`]; the
//! main-loop pass ([`DataLink::commit_ready`]) copies finished bytes into
//! the frame header, sizes the payload from the length byte, fills the
//! payload, reports the two address bytes as soon as they are known, and
//! finally checks the CRC of a deliverable frame.

use tracing::{debug, trace, warn};

use crate::assembly::AssemblyBuffer;
use crate::crc;
use crate::error::LinkError;
use crate::frame::{msb_bit, Frame, FrameArena, FrameId, Holder, HEADER_LEN, PREAMBLE};
use crate::queue::{FrameQueues, Lane};
use crate::wire::BitSink;

/// Section of the frame the transmitter is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Preamble,
    Header,
    Payload,
}

/// Section of the frame the receiver is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveState {
    Header,
    Payload,
}

/// Transmitter cursor. Active while it holds a frame.
#[derive(Debug)]
pub struct SendControl {
    frame: Option<(Lane, FrameId)>,
    state: SendState,
    bit_index: usize,
}

impl SendControl {
    fn new() -> Self {
        Self {
            frame: None,
            state: SendState::Preamble,
            bit_index: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.frame.is_some()
    }

    pub fn state(&self) -> SendState {
        self.state
    }

    pub fn bit_index(&self) -> usize {
        self.bit_index
    }

    fn start(&mut self, lane: Lane, id: FrameId) {
        self.frame = Some((lane, id));
        self.state = SendState::Preamble;
        self.bit_index = 0;
    }

    /// Step past the bit just extracted. Returns true when the frame is
    /// fully sent.
    fn advance(&mut self, payload_len: usize) -> bool {
        self.bit_index += 1;
        match self.state {
            SendState::Preamble if self.bit_index == 8 => {
                self.state = SendState::Header;
                self.bit_index = 0;
            }
            SendState::Header if self.bit_index == HEADER_LEN * 8 => {
                self.state = SendState::Payload;
                self.bit_index = 0;
            }
            _ => {}
        }
        self.state == SendState::Payload && self.bit_index == payload_len * 8
    }

    fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Receiver cursor. Active while it holds a frame.
#[derive(Debug)]
pub struct ReceiveControl {
    frame: Option<FrameId>,
    state: ReceiveState,
    byte_index: usize,
    preamble_shift: u8,
}

impl ReceiveControl {
    fn new() -> Self {
        Self {
            frame: None,
            state: ReceiveState::Header,
            byte_index: 0,
            preamble_shift: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.frame.is_some()
    }

    pub fn state(&self) -> ReceiveState {
        self.state
    }

    pub fn byte_index(&self) -> usize {
        self.byte_index
    }

    fn reset(&mut self) {
        *self = Self::new();
    }
}

/// What a tick did on the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing to send; a filler `0` was emitted
    Idle,
    /// A frame bit was emitted; `finished` is set on the frame's last bit
    Sent { bit: bool, finished: Option<Lane> },
    /// The bit was not available yet; nothing was emitted
    Deferred,
}

/// A fully received frame flagged for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFrame {
    pub header: [u8; HEADER_LEN],
    pub payload: Vec<u8>,
    /// CRC recomputed over the received payload
    pub computed_crc: u32,
}

impl ReceivedFrame {
    /// CRC carried in the header.
    pub fn received_crc(&self) -> u32 {
        crc::parse_bytes([self.header[0], self.header[1], self.header[2], self.header[3]])
    }

    pub fn crc_valid(&self) -> bool {
        self.computed_crc == self.received_crc()
    }

    /// Payload length from the header.
    pub fn length(&self) -> usize {
        self.header[4] as usize
    }
}

/// Progress reported by the deferred writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Both address bytes of the frame under reception are committed. The
    /// forwarding decision must be taken before committing further.
    AddressesKnown {
        frame: FrameId,
        destination: u8,
        source: u8,
    },
    /// A deliverable frame arrived in full.
    Received(ReceivedFrame),
    /// A pass-through frame arrived in full; only the forward copy remains.
    Relayed,
}

/// Data-link layer: frame storage, send queues and both direction cursors.
#[derive(Debug)]
pub struct DataLink {
    arena: FrameArena,
    queues: FrameQueues,
    send: SendControl,
    receive: ReceiveControl,
    assembly: AssemblyBuffer,
}

impl DataLink {
    /// # Errors
    /// `LinkError::AssemblyTooSmall` if `assembly_capacity < 2`.
    pub fn new(assembly_capacity: usize) -> Result<Self, LinkError> {
        Ok(Self {
            arena: FrameArena::new(),
            queues: FrameQueues::new(),
            send: SendControl::new(),
            receive: ReceiveControl::new(),
            assembly: AssemblyBuffer::new(assembly_capacity)?,
        })
    }

    /// Frame a payload and queue it on the outbound lane.
    ///
    /// # Errors
    /// `LinkError::PayloadTooLong` if the payload exceeds 255 bytes.
    pub fn enqueue_outbound(&mut self, payload: Vec<u8>) -> Result<FrameId, LinkError> {
        let frame = Frame::outbound(payload)?;
        let length = frame.length();
        let id = self.arena.insert(frame, Holder::Send);
        self.queues.push_outbound(id);
        debug!(length, "frame queued for sending");
        Ok(id)
    }

    /// Queue the frame under reception on the forward lane.
    ///
    /// Returns false for a stale handle.
    pub fn forward(&mut self, id: FrameId, deliver: bool) -> bool {
        let Some(frame) = self.arena.get_mut(id) else {
            return false;
        };
        frame.set_deliver(deliver);
        self.arena.hold(id, Holder::Send);
        self.queues.push_forward(id);
        debug!(deliver, "frame queued for forwarding");
        true
    }

    /// Emit the next bit. Called once per tick.
    pub fn on_tick(&mut self, sink: &mut impl BitSink) -> TickOutcome {
        if !self.send.is_active() {
            match self.queues.pop_next() {
                Some((lane, id)) => {
                    debug!(?lane, "starting frame transmission");
                    self.send.start(lane, id);
                }
                None => {
                    sink.emit_bit(false);
                    return TickOutcome::Idle;
                }
            }
        }
        self.transmit(sink)
    }

    /// Main-loop retry of a bit the tick had to defer.
    pub fn retry_deferred_send(&mut self, sink: &mut impl BitSink) -> Option<TickOutcome> {
        let (_, id) = self.send.frame?;
        if !self.arena.get(id)?.send_backoff() {
            return None;
        }
        trace!("retrying deferred send bit");
        Some(self.transmit(sink))
    }

    fn transmit(&mut self, sink: &mut impl BitSink) -> TickOutcome {
        let Some((lane, id)) = self.send.frame else {
            sink.emit_bit(false);
            return TickOutcome::Idle;
        };
        let Some(frame) = self.arena.get_mut(id) else {
            warn!("send cursor pointed at a released frame");
            self.send.reset();
            sink.emit_bit(false);
            return TickOutcome::Idle;
        };

        let index = self.send.bit_index;
        let bit = match self.send.state {
            SendState::Preamble => Some(msb_bit(&[PREAMBLE], index)),
            SendState::Header => Some(frame.header_bit(index)),
            SendState::Payload => frame.payload_bit(index),
        };
        let Some(bit) = bit else {
            frame.set_send_backoff(true);
            trace!(index, "payload byte not committed yet, deferring");
            return TickOutcome::Deferred;
        };
        frame.set_send_backoff(false);

        let finished = self.send.advance(frame.length());
        sink.emit_bit(bit);
        trace!(bit, state = ?self.send.state, "bit emitted");

        if finished {
            self.arena.release(id, Holder::Send);
            self.send.reset();
            debug!(?lane, "frame transmission complete");
            return TickOutcome::Sent {
                bit,
                finished: Some(lane),
            };
        }
        TickOutcome::Sent {
            bit,
            finished: None,
        }
    }

    /// Classify one sampled bit. Called once per sample event.
    ///
    /// # Errors
    /// `LinkError::AssemblyOverrun` when the deferred writer fell too far
    /// behind; the frame under reception is abandoned and the receiver goes
    /// back to hunting for a preamble.
    pub fn on_sample(&mut self, bit: bool) -> Result<(), LinkError> {
        let Some(id) = self.receive.frame else {
            self.detect_preamble(bit);
            return Ok(());
        };

        match self.assembly.push_bit(bit) {
            Ok(true) if self.assembly.ready_len() > 1 => {
                if let Some(frame) = self.arena.get_mut(id) {
                    frame.set_receive_backoff(true);
                }
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(%err, "abandoning frame under reception");
                self.abandon_receive();
                Err(err)
            }
        }
    }

    fn detect_preamble(&mut self, bit: bool) {
        self.receive.preamble_shift = (self.receive.preamble_shift << 1) | bit as u8;
        if self.receive.preamble_shift != PREAMBLE {
            return;
        }
        let id = self.arena.insert(Frame::inbound(), Holder::Receive);
        self.receive.reset();
        self.receive.frame = Some(id);
        self.assembly.reset();
        trace!("preamble detected");
    }

    /// Whether completed bytes are waiting for [`commit_ready`](Self::commit_ready).
    pub fn has_pending_commit(&self) -> bool {
        self.assembly.has_ready()
    }

    /// Deferred writer: copy ready bytes into the frame under reception.
    ///
    /// Stops at the first event and returns it; call again until `None`.
    pub fn commit_ready(&mut self) -> Option<LinkEvent> {
        loop {
            let id = self.receive.frame?;
            let Some(frame) = self.arena.get_mut(id) else {
                self.receive.reset();
                self.assembly.reset();
                return None;
            };

            if self.receive.state == ReceiveState::Payload
                && self.receive.byte_index == frame.length()
            {
                return self.wrap_up();
            }

            let Some(byte) = self.assembly.take_ready() else {
                frame.set_receive_backoff(false);
                return None;
            };

            match self.receive.state {
                ReceiveState::Header => {
                    frame.set_header_byte(self.receive.byte_index, byte);
                    self.receive.byte_index += 1;
                    if self.receive.byte_index == HEADER_LEN {
                        frame.begin_payload();
                        self.receive.state = ReceiveState::Payload;
                        self.receive.byte_index = 0;
                        debug!(length = frame.length(), "header received");
                    }
                }
                ReceiveState::Payload => {
                    frame.push_payload_byte(byte);
                    self.receive.byte_index += 1;
                    if self.receive.byte_index == 2 {
                        if let Some((destination, source)) = frame.addresses() {
                            return Some(LinkEvent::AddressesKnown {
                                frame: id,
                                destination,
                                source,
                            });
                        }
                    }
                }
            }
        }
    }

    fn wrap_up(&mut self) -> Option<LinkEvent> {
        let id = self.receive.frame?;
        self.receive.reset();
        self.assembly.reset();

        let frame = self.arena.get(id)?;
        let event = if frame.deliver() {
            let computed_crc = crc::compute(frame.payload());
            LinkEvent::Received(ReceivedFrame {
                header: *frame.header(),
                payload: frame.payload().to_vec(),
                computed_crc,
            })
        } else {
            LinkEvent::Relayed
        };
        self.arena.release(id, Holder::Receive);
        debug!("frame reception complete");
        Some(event)
    }

    fn abandon_receive(&mut self) {
        if let Some(id) = self.receive.frame {
            if let Some(frame) = self.arena.get_mut(id) {
                frame.seal();
            }
            self.arena.release(id, Holder::Receive);
        }
        self.receive.reset();
        self.assembly.reset();
    }

    pub fn frame(&self, id: FrameId) -> Option<&Frame> {
        self.arena.get(id)
    }

    /// Frame currently on the transmitter, if any.
    pub fn sending(&self) -> Option<&Frame> {
        self.send.frame.and_then(|(_, id)| self.arena.get(id))
    }

    /// Frame currently under reception, if any.
    pub fn receiving(&self) -> Option<&Frame> {
        self.receive.frame.and_then(|id| self.arena.get(id))
    }

    pub fn queues(&self) -> &FrameQueues {
        &self.queues
    }

    pub fn send_control(&self) -> &SendControl {
        &self.send
    }

    pub fn receive_control(&self) -> &ReceiveControl {
        &self.receive
    }

    /// Live frames in the arena.
    pub fn frames_in_flight(&self) -> usize {
        self.arena.len()
    }

    /// Nothing queued, nothing on the transmitter, nothing arriving.
    pub fn is_idle(&self) -> bool {
        !self.send.is_active() && !self.receive.is_active() && self.queues.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Run the deferred writer until it has nothing left, answering every
    /// address check with "consume".
    fn drain(link: &mut DataLink) -> Vec<LinkEvent> {
        let mut events = Vec::new();
        while let Some(event) = link.commit_ready() {
            events.push(event);
        }
        events
    }

    fn feed(link: &mut DataLink, bits: &[bool]) -> Vec<LinkEvent> {
        let mut events = Vec::new();
        for &bit in bits {
            link.on_sample(bit).unwrap();
            events.extend(drain(link));
        }
        events
    }

    fn transmit_all(link: &mut DataLink) -> Vec<bool> {
        let mut bits = Vec::new();
        while !link.is_idle() {
            link.on_tick(&mut bits);
        }
        bits
    }

    #[test]
    fn test_idle_tick_emits_zero() {
        let mut link = DataLink::new(5).unwrap();
        let mut bits = Vec::new();
        assert_eq!(link.on_tick(&mut bits), TickOutcome::Idle);
        assert_eq!(bits, vec![false]);
    }

    #[test]
    fn test_send_state_transitions() {
        let mut link = DataLink::new(5).unwrap();
        link.enqueue_outbound(vec![0xFF]).unwrap();
        let mut bits = Vec::new();

        for _ in 0..8 {
            link.on_tick(&mut bits);
        }
        assert_eq!(link.send_control().state(), SendState::Header);
        assert_eq!(link.send_control().bit_index(), 0);

        for _ in 0..40 {
            link.on_tick(&mut bits);
        }
        assert_eq!(link.send_control().state(), SendState::Payload);

        for _ in 0..7 {
            link.on_tick(&mut bits);
        }
        let last = link.on_tick(&mut bits);
        assert_eq!(
            last,
            TickOutcome::Sent {
                bit: true,
                finished: Some(Lane::Outbound)
            }
        );
        assert!(!link.send_control().is_active());
        assert_eq!(link.frames_in_flight(), 0);

        let expected = Frame::outbound(vec![0xFF]).unwrap().wire_bits();
        assert_eq!(bits, expected);
    }

    #[test]
    fn test_empty_payload_retires_after_header() {
        let mut link = DataLink::new(5).unwrap();
        link.enqueue_outbound(Vec::new()).unwrap();
        let bits = transmit_all(&mut link);
        assert_eq!(bits.len(), 48);
    }

    #[test]
    fn test_round_trip() {
        let mut tx = DataLink::new(5).unwrap();
        tx.enqueue_outbound(vec![9, 5, 0, 0, b'h', b'i']).unwrap();
        let mut bits = vec![false; 5];
        bits.extend(transmit_all(&mut tx));

        let mut rx = DataLink::new(5).unwrap();
        let events = feed(&mut rx, &bits);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            LinkEvent::AddressesKnown {
                destination: 9,
                source: 5,
                ..
            }
        ));
        let LinkEvent::Received(frame) = &events[1] else {
            panic!("expected a received frame, got {:?}", events[1]);
        };
        assert!(frame.crc_valid());
        assert_eq!(frame.payload, vec![9, 5, 0, 0, b'h', b'i']);
        assert_eq!(frame.header, *Frame::outbound(frame.payload.clone()).unwrap().header());
        assert!(rx.is_idle());
        assert_eq!(rx.frames_in_flight(), 0);
    }

    #[test]
    fn test_corrupted_payload_fails_crc() {
        let mut bits = Frame::outbound(vec![1, 2, 3, 4]).unwrap().wire_bits();
        let last = bits.len() - 1;
        bits[last] = !bits[last];

        let mut rx = DataLink::new(5).unwrap();
        let events = feed(&mut rx, &bits);
        let Some(LinkEvent::Received(frame)) = events.last() else {
            panic!("expected a received frame");
        };
        assert!(!frame.crc_valid());
        assert_eq!(frame.received_crc(), crc::compute(&[1, 2, 3, 4]));
    }

    #[test]
    fn test_preamble_needs_exact_pattern() {
        let mut rx = DataLink::new(5).unwrap();
        for bit in [false, true, true, true, true, true, true, true] {
            rx.on_sample(bit).unwrap();
        }
        assert!(!rx.receive_control().is_active());
        // shift register now holds 0x7F; one more 0 gives 0xFE, still no match
        rx.on_sample(false).unwrap();
        assert!(!rx.receive_control().is_active());
    }

    #[test]
    fn test_forwarded_frame_not_delivered() {
        let bits = Frame::outbound(vec![7, 3, 0, 2, 0xAA]).unwrap().wire_bits();
        let mut rx = DataLink::new(5).unwrap();
        let mut events = Vec::new();
        for bit in bits {
            rx.on_sample(bit).unwrap();
            while let Some(event) = rx.commit_ready() {
                if let LinkEvent::AddressesKnown { frame, .. } = event {
                    assert!(rx.forward(frame, false));
                }
                events.push(event);
            }
        }
        assert_eq!(events.last(), Some(&LinkEvent::Relayed));
        assert_eq!(rx.queues().len(Lane::Forward), 1);

        let resent = transmit_all(&mut rx);
        assert_eq!(resent, Frame::outbound(vec![7, 3, 0, 2, 0xAA]).unwrap().wire_bits());
        assert_eq!(rx.frames_in_flight(), 0);
    }

    #[test]
    fn test_cut_through_defers_uncommitted_bits() {
        let payload = vec![7, 3, 0, 2, 0xAA, 0x55];
        let bits = Frame::outbound(payload.clone()).unwrap().wire_bits();
        let mut node = DataLink::new(5).unwrap();
        let mut out = Vec::new();

        // Receive through the address bytes and start forwarding.
        let upto_addresses = 8 + 40 + 16;
        let mut forwarded = false;
        for &bit in &bits[..upto_addresses] {
            node.on_sample(bit).unwrap();
            if let Some(LinkEvent::AddressesKnown { frame, .. }) = node.commit_ready() {
                forwarded = node.forward(frame, false);
            }
        }
        assert!(forwarded);
        assert_eq!(node.receiving().unwrap().committed(), 2);

        // Transmit preamble, header and the two committed payload bytes.
        for _ in 0..(8 + 40 + 16) {
            assert!(matches!(node.on_tick(&mut out), TickOutcome::Sent { .. }));
        }
        // Third payload byte has not arrived yet.
        assert_eq!(node.on_tick(&mut out), TickOutcome::Deferred);
        assert!(node.sending().unwrap().send_backoff());
        assert_eq!(node.retry_deferred_send(&mut out), Some(TickOutcome::Deferred));

        // Once it is committed, the main-loop retry emits the bit.
        for &bit in &bits[upto_addresses..upto_addresses + 8] {
            node.on_sample(bit).unwrap();
        }
        assert_eq!(node.commit_ready(), None);
        assert!(matches!(
            node.retry_deferred_send(&mut out),
            Some(TickOutcome::Sent { .. })
        ));
        assert!(!node.sending().unwrap().send_backoff());

        for &bit in &bits[upto_addresses + 8..] {
            node.on_sample(bit).unwrap();
            while node.commit_ready().is_some() {}
        }
        while !node.is_idle() {
            node.on_tick(&mut out);
        }
        assert_eq!(out, bits);
    }

    #[test]
    fn test_receive_backoff_when_writer_lags() {
        let bits = Frame::outbound(vec![1, 2, 3]).unwrap().wire_bits();
        let mut rx = DataLink::new(5).unwrap();
        for &bit in &bits[..8 + 16] {
            rx.on_sample(bit).unwrap();
        }
        assert!(rx.receiving().unwrap().receive_backoff());
        assert!(rx.has_pending_commit());
        assert_eq!(rx.commit_ready(), None);
        assert!(!rx.receiving().unwrap().receive_backoff());
        assert_eq!(rx.receive_control().byte_index(), 2);
    }

    #[test]
    fn test_overrun_abandons_frame() {
        let bits = Frame::outbound(vec![0; 10]).unwrap().wire_bits();
        let mut rx = DataLink::new(5).unwrap();
        let mut result = Ok(());
        for &bit in &bits {
            result = rx.on_sample(bit);
            if result.is_err() {
                break;
            }
        }
        assert_eq!(result, Err(LinkError::AssemblyOverrun { capacity: 5 }));
        assert!(!rx.receive_control().is_active());
        assert_eq!(rx.frames_in_flight(), 0);
    }

    #[test]
    fn test_undersized_assembly_rejected() {
        assert!(matches!(
            DataLink::new(1),
            Err(LinkError::AssemblyTooSmall { capacity: 1 })
        ));
    }
}
