//! Transport layer: slot-tagged messages with ACK-driven retransmission.
//!
//! Every segment starts with `[slot, kind]`. Unicast messages whose kind
//! requires acknowledgment are kept in a 256-entry slot table until the
//! destination ACKs them; a periodic sweep resends anything that has waited
//! at least `retransmit_after` ticks. Retries are unbounded: a message stays
//! pending until it is acknowledged or bounces back as undeliverable.
//!
//! Slot ids are handed out by linear probing from a rotating cursor. A send
//! that needs a slot while all 256 are pending fails with
//! [`TransportError::SlotTableFull`].

use std::fmt;

use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::network::{Downlink, BROADCAST};
use crate::notice::Notice;

/// Number of slot ids (one byte).
pub const SLOT_COUNT: usize = 256;

/// Default ticks to wait for an ACK before resending.
pub const DEFAULT_RETRANSMIT_AFTER: u32 = 2048 * 2 * 2;

/// Transport message kind, byte 1 of every segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Acknowledgment required
    Default,
    Ack,
    /// Fire and forget
    Datagram,
    /// Reserved for future use; handled like `Default`
    Reserved,
    /// Any other byte; handled like `Default`
    Other(u8),
}

impl MessageKind {
    pub const fn to_byte(self) -> u8 {
        match self {
            MessageKind::Default => 0,
            MessageKind::Ack => 1,
            MessageKind::Datagram => 2,
            MessageKind::Reserved => 0xFC,
            MessageKind::Other(byte) => byte,
        }
    }

    pub const fn requires_ack(self) -> bool {
        !matches!(self, MessageKind::Ack | MessageKind::Datagram)
    }
}

impl From<u8> for MessageKind {
    fn from(byte: u8) -> Self {
        match byte {
            0 => MessageKind::Default,
            1 => MessageKind::Ack,
            2 => MessageKind::Datagram,
            0xFC => MessageKind::Reserved,
            other => MessageKind::Other(other),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Default => f.write_str("default"),
            MessageKind::Ack => f.write_str("ack"),
            MessageKind::Datagram => f.write_str("datagram"),
            MessageKind::Reserved => f.write_str("reserved"),
            MessageKind::Other(byte) => write!(f, "kind {byte:#04x}"),
        }
    }
}

/// An unacknowledged message held for retransmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub destination: u8,
    pub kind: MessageKind,
    /// Full segment, `[slot, kind] + body`, resent byte for byte
    pub segment: Vec<u8>,
    /// Tick of the latest (re)transmission
    pub sent_at: u32,
}

impl PendingMessage {
    /// The application bytes after the transport header.
    pub fn body(&self) -> &[u8] {
        self.segment.get(2..).unwrap_or_default()
    }
}

/// Ticks between `sent_at` and `now` on a wrapping 32-bit tick counter.
pub fn ticks_elapsed(now: u32, sent_at: u32) -> u32 {
    now.wrapping_sub(sent_at)
}

#[derive(Debug)]
pub struct SlotTable {
    slots: Vec<Option<PendingMessage>>,
    cursor: u8,
}

impl SlotTable {
    pub fn new() -> Self {
        Self {
            slots: vec![None; SLOT_COUNT],
            cursor: 0,
        }
    }

    /// Where the next probe starts.
    pub fn cursor(&self) -> u8 {
        self.cursor
    }

    pub fn get(&self, slot: u8) -> Option<&PendingMessage> {
        self.slots[slot as usize].as_ref()
    }

    pub fn is_free(&self, slot: u8) -> bool {
        self.slots[slot as usize].is_none()
    }

    /// Number of pending messages.
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// First free slot at or after the cursor, wrapping once around.
    pub fn probe_free(&self) -> Option<u8> {
        (0..=u8::MAX)
            .map(|offset| self.cursor.wrapping_add(offset))
            .find(|&slot| self.is_free(slot))
    }

    fn insert(&mut self, slot: u8, message: PendingMessage) {
        self.slots[slot as usize] = Some(message);
        self.cursor = slot.wrapping_add(1);
    }

    fn remove(&mut self, slot: u8) -> Option<PendingMessage> {
        self.slots[slot as usize].take()
    }

    fn pending_mut(&mut self) -> impl Iterator<Item = (u8, &mut PendingMessage)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(slot, entry)| entry.as_mut().map(|m| (slot as u8, m)))
    }
}

impl Default for SlotTable {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct Transport {
    slots: SlotTable,
    retransmit_after: u32,
}

impl Transport {
    pub fn new(retransmit_after: u32) -> Self {
        Self {
            slots: SlotTable::new(),
            retransmit_after,
        }
    }

    pub fn slots(&self) -> &SlotTable {
        &self.slots
    }

    pub fn retransmit_after(&self) -> u32 {
        self.retransmit_after
    }

    /// Send `body` to `destination`, returning the slot id embedded in the
    /// segment.
    ///
    /// Only unicast messages that require an ACK occupy their slot; the id is
    /// embedded either way.
    ///
    /// # Errors
    /// - `TransportError::SlotTableFull` if the message needs a slot and none
    ///   is free
    /// - `LinkError::PayloadTooLong` if the segment does not fit a frame;
    ///   nothing is stored
    pub fn send(
        &mut self,
        now: u32,
        destination: u8,
        kind: MessageKind,
        body: &[u8],
        net: &mut impl Downlink,
    ) -> Result<u8> {
        let stored = kind.requires_ack() && destination != BROADCAST;
        let slot = match self.slots.probe_free() {
            Some(slot) => slot,
            None if stored => {
                warn!(destination, "no free transport slot");
                return Err(TransportError::SlotTableFull {
                    capacity: SLOT_COUNT,
                }
                .into());
            }
            None => self.slots.cursor(),
        };

        let mut segment = Vec::with_capacity(body.len() + 2);
        segment.push(slot);
        segment.push(kind.to_byte());
        segment.extend_from_slice(body);

        net.prepare_send(destination, segment.clone())?;
        if stored {
            self.slots.insert(
                slot,
                PendingMessage {
                    destination,
                    kind,
                    segment,
                    sent_at: now,
                },
            );
        }
        debug!(slot, destination, %kind, stored, "transport send");
        Ok(slot)
    }

    /// Resend every pending message that has waited at least the threshold.
    pub fn on_tick_timeout_sweep(
        &mut self,
        now: u32,
        net: &mut impl Downlink,
    ) -> Result<Vec<Notice>> {
        let threshold = self.retransmit_after;
        let mut notices = Vec::new();
        for (slot, pending) in self.slots.pending_mut() {
            if ticks_elapsed(now, pending.sent_at) < threshold {
                continue;
            }
            net.prepare_send(pending.destination, pending.segment.clone())?;
            pending.sent_at = now;
            info!(slot, destination = pending.destination, "retransmitting unacknowledged message");
            notices.push(Notice::Retransmitted {
                destination: pending.destination,
                slot,
            });
        }
        Ok(notices)
    }

    /// Handle a delivered segment from `source`.
    ///
    /// Broadcasts are shown and never acknowledged. Unicast ACKs release
    /// their slot; datagrams are shown; every other kind is shown and
    /// acknowledged.
    pub fn on_receive(
        &mut self,
        source: u8,
        destination: u8,
        data: &[u8],
        net: &mut impl Downlink,
    ) -> Result<Notice> {
        let [slot, kind, body @ ..] = data else {
            warn!(source, length = data.len(), "segment too short for a transport header");
            return Ok(Notice::Malformed { length: data.len() });
        };
        let (slot, kind) = (*slot, MessageKind::from(*kind));

        if destination == BROADCAST {
            return Ok(Notice::Broadcast {
                source,
                text: body.to_vec(),
            });
        }

        match kind {
            MessageKind::Ack => {
                let pending_for_source =
                    self.slots.get(slot).is_some_and(|p| p.destination == source);
                if !pending_for_source {
                    debug!(slot, source, "acknowledgment for a slot not pending on that node");
                    return Ok(Notice::StaleAck { source, slot });
                }
                let text = self
                    .slots
                    .remove(slot)
                    .map(|pending| pending.body().to_vec())
                    .unwrap_or_default();
                info!(slot, source, "delivery confirmed");
                Ok(Notice::Acknowledged { source, slot, text })
            }
            MessageKind::Datagram => Ok(Notice::Message {
                source,
                kind,
                text: body.to_vec(),
            }),
            _ => {
                self.send_ack(source, slot, net)?;
                Ok(Notice::Message {
                    source,
                    kind,
                    text: body.to_vec(),
                })
            }
        }
    }

    /// Acknowledge `slot` to `destination`. ACKs are never stored.
    pub fn send_ack(&mut self, destination: u8, slot: u8, net: &mut impl Downlink) -> Result<()> {
        net.prepare_send(destination, vec![slot, MessageKind::Ack.to_byte(), 0])?;
        debug!(slot, destination, "ack queued");
        Ok(())
    }

    /// A unicast to `bad_destination` came back around the ring.
    pub fn on_send_failed(&mut self, slot: u8, bad_destination: u8) -> Notice {
        let pending_here = self
            .slots
            .get(slot)
            .is_some_and(|p| p.destination == bad_destination && p.kind.requires_ack());
        if pending_here {
            self.slots.remove(slot);
        }
        warn!(slot, destination = bad_destination, "send failed, destination does not exist");
        Notice::SendFailed {
            destination: bad_destination,
            slot,
        }
    }

    /// A broadcast from this node made it around the ring.
    pub fn on_broadcast_confirmed(&self, data: &[u8]) -> Notice {
        info!(length = data.len(), "broadcast completed the ring");
        Notice::BroadcastLooped {
            text: data.get(2..).unwrap_or_default().to_vec(),
        }
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new(DEFAULT_RETRANSMIT_AFTER)
    }
}
