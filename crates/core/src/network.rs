//! Network layer: addressing and ring routing.
//!
//! Every payload starts with `[destination, source]`. Destination `0` is
//! broadcast. Nodes sit on a unidirectional ring, so a frame that is not
//! consumed keeps travelling until it returns to its originator:
//!
//! | payload prefix    | partial check (2 bytes known) | full frame          |
//! |-------------------|-------------------------------|---------------------|
//! | `[self, x]`       | consume                       | deliver             |
//! | `[0, x]`, x≠self  | forward, still deliver        | deliver             |
//! | `[0, self]`       | consume                       | broadcast looped    |
//! | `[y, self]`, y≠0  | consume                       | bounced (no such y) |
//! | `[y, x]`, neither | forward, do not deliver       | (not delivered)     |
//!
//! The routing decisions are returned as values; the caller ([`crate::stack`])
//! hands them to the framing engine or the transport layer.

use tracing::{debug, warn};

use crate::error::Result;
use crate::framing::{DataLink, ReceivedFrame};
use crate::frame::FrameId;

/// Broadcast destination address.
pub const BROADCAST: u8 = 0;

/// What to do with a frame whose address bytes just arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardDecision {
    /// Keep receiving; the frame ends here
    Consume,
    /// Queue on the forward lane now, cut-through
    Forward { deliver: bool },
}

/// Outcome of routing a fully received frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Addressed to this node, or a broadcast from another node.
    /// `data` is the transport segment (payload minus the address prefix).
    Deliver {
        source: u8,
        destination: u8,
        data: Vec<u8>,
    },
    /// A unicast this node sent came back: `destination` does not exist.
    Bounced { destination: u8, data: Vec<u8> },
    /// A broadcast this node sent completed the loop.
    BroadcastReturned { data: Vec<u8> },
    /// CRC mismatch; the frame is discarded.
    Rejected { computed: u32, received: u32 },
    /// Too short to carry an address prefix.
    Malformed { length: usize },
    /// Not for this node.
    Ignored,
}

/// Entry point the transport layer sends through.
pub trait Downlink {
    /// Prepend the address prefix and queue the frame for sending.
    fn prepare_send(&mut self, destination: u8, payload: Vec<u8>) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct Network {
    address: u8,
}

impl Network {
    pub fn new(address: u8) -> Self {
        Self { address }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Frame `payload` for `destination` and queue it on the outbound lane.
    pub fn prepare_send(
        &self,
        link: &mut DataLink,
        destination: u8,
        payload: Vec<u8>,
    ) -> Result<FrameId> {
        let mut framed = Vec::with_capacity(payload.len() + 2);
        framed.push(destination);
        framed.push(self.address);
        framed.extend(payload);
        let id = link.enqueue_outbound(framed)?;
        debug!(destination, source = self.address, "network prepared send");
        Ok(id)
    }

    /// Forwarding check, run as soon as both address bytes are committed.
    pub fn on_partial_receive_addresses(&self, destination: u8, source: u8) -> ForwardDecision {
        if source == self.address {
            return ForwardDecision::Consume;
        }
        match destination {
            BROADCAST => ForwardDecision::Forward { deliver: true },
            d if d == self.address => ForwardDecision::Consume,
            _ => ForwardDecision::Forward { deliver: false },
        }
    }

    /// Route a fully received, deliverable frame.
    pub fn on_frame_received(&self, frame: ReceivedFrame) -> Inbound {
        if !frame.crc_valid() {
            let received = frame.received_crc();
            warn!(
                computed = frame.computed_crc,
                received, "crc mismatch, frame discarded"
            );
            return Inbound::Rejected {
                computed: frame.computed_crc,
                received,
            };
        }

        let mut payload = frame.payload;
        if payload.len() < 2 {
            warn!(length = payload.len(), "frame too short for an address prefix");
            return Inbound::Malformed {
                length: payload.len(),
            };
        }
        let data = payload.split_off(2);
        let (destination, source) = (payload[0], payload[1]);

        if source == self.address && destination != BROADCAST {
            warn!(destination, "unicast returned to sender, destination does not exist");
            Inbound::Bounced { destination, data }
        } else if destination == self.address
            || (destination == BROADCAST && source != self.address)
        {
            debug!(source, destination, len = data.len(), "frame delivered");
            Inbound::Deliver {
                source,
                destination,
                data,
            }
        } else if source == self.address {
            debug!("own broadcast completed the ring");
            Inbound::BroadcastReturned { data }
        } else {
            Inbound::Ignored
        }
    }
}

/// A [`Network`] bound to the link it sends on.
pub struct NetworkPort<'a> {
    pub network: &'a Network,
    pub link: &'a mut DataLink,
}

impl Downlink for NetworkPort<'_> {
    fn prepare_send(&mut self, destination: u8, payload: Vec<u8>) -> Result<()> {
        self.network.prepare_send(self.link, destination, payload)?;
        Ok(())
    }
}

/// Records sends instead of framing them.
impl Downlink for Vec<(u8, Vec<u8>)> {
    fn prepare_send(&mut self, destination: u8, payload: Vec<u8>) -> Result<()> {
        self.push((destination, payload));
        Ok(())
    }
}
