//! One node: the protocol layers wired together.
//!
//! [`ProtocolStack`] owns every piece of per-node state (frames, queues,
//! slot table, console, counters) and exposes the three entry points a
//! host drives:
//!
//! - [`on_tick`](ProtocolStack::on_tick): the periodic timer. Advances the
//!   tick counter and emits exactly one bit (or defers it).
//! - [`on_sample`](ProtocolStack::on_sample): the line sampler. Classifies
//!   one received bit.
//! - [`poll`](ProtocolStack::poll): the cooperative main loop. Retries a
//!   deferred send bit, commits received bytes, routes completed frames and
//!   runs the retransmission sweep once per tick advance.
//!
//! The tick and sample paths never route or allocate slots; all layer work
//! above the bit level happens in `poll`.

use tracing::{debug, info, warn};

use crate::config::StackConfig;
use crate::console::{ConsoleCommand, LineConsole};
use crate::error::{LinkError, Result};
use crate::framing::{DataLink, LinkEvent, TickOutcome};
use crate::metrics::StackStats;
use crate::network::{ForwardDecision, Inbound, Network, NetworkPort};
use crate::notice::Notice;
use crate::transport::{MessageKind, Transport};
use crate::wire::BitSink;

#[derive(Debug)]
pub struct ProtocolStack {
    config: StackConfig,
    link: DataLink,
    network: Network,
    transport: Transport,
    console: LineConsole,
    notices: Vec<Notice>,
    stats: StackStats,

    /// Tick counter, wraps
    now: u32,
    /// Tick the last retransmission sweep ran at
    swept_at: u32,
}

impl ProtocolStack {
    /// # Errors
    /// `Error::Config` if the configuration does not validate.
    pub fn new(config: StackConfig) -> Result<Self> {
        config.validate()?;
        info!(address = config.address, "node started");
        Ok(Self {
            link: DataLink::new(config.assembly_capacity)?,
            network: Network::new(config.address),
            transport: Transport::new(config.retransmit_after),
            console: LineConsole::new(),
            notices: Vec::new(),
            stats: StackStats::new(),
            now: 0,
            swept_at: 0,
            config,
        })
    }

    pub fn address(&self) -> u8 {
        self.config.address
    }

    /// Current tick count.
    pub fn now(&self) -> u32 {
        self.now
    }

    /// Tick handler.
    pub fn on_tick(&mut self, sink: &mut impl BitSink) {
        self.now = self.now.wrapping_add(1);
        self.stats.ticks += 1;
        match self.link.on_tick(sink) {
            TickOutcome::Deferred => self.stats.send_backoffs += 1,
            outcome => self.record_emitted(outcome),
        }
    }

    /// Sample handler.
    pub fn on_sample(&mut self, bit: bool) {
        match self.link.on_sample(bit) {
            Ok(()) => {}
            Err(LinkError::AssemblyOverrun { capacity }) => {
                self.notify(Notice::Overrun { capacity });
            }
            Err(err) => warn!(%err, "sampled bit rejected"),
        }
    }

    /// Main-loop pass. Call as often as possible; at least once per tick.
    pub fn poll(&mut self, sink: &mut impl BitSink) -> Result<()> {
        if let Some(outcome) = self.link.retry_deferred_send(sink) {
            self.record_emitted(outcome);
        }

        while let Some(event) = self.link.commit_ready() {
            self.dispatch(event)?;
        }

        if self.now != self.swept_at {
            self.swept_at = self.now;
            let mut port = NetworkPort {
                network: &self.network,
                link: &mut self.link,
            };
            let notices = self.transport.on_tick_timeout_sweep(self.now, &mut port)?;
            for notice in notices {
                self.notify(notice);
            }
        }
        Ok(())
    }

    fn record_emitted(&mut self, outcome: TickOutcome) {
        match outcome {
            TickOutcome::Idle => {
                self.stats.bits_emitted += 1;
                self.stats.idle_bits += 1;
            }
            TickOutcome::Sent { finished, .. } => {
                self.stats.bits_emitted += 1;
                if let Some(lane) = finished {
                    self.stats.record_frame_done(lane);
                }
            }
            TickOutcome::Deferred => {}
        }
    }

    fn dispatch(&mut self, event: LinkEvent) -> Result<()> {
        match event {
            LinkEvent::AddressesKnown {
                frame,
                destination,
                source,
            } => match self.network.on_partial_receive_addresses(destination, source) {
                ForwardDecision::Consume => {}
                ForwardDecision::Forward { deliver } => {
                    debug!(destination, source, deliver, "forwarding");
                    self.link.forward(frame, deliver);
                }
            },
            LinkEvent::Relayed => {}
            LinkEvent::Received(frame) => {
                self.stats.frames_received += 1;
                let inbound = self.network.on_frame_received(frame);
                self.route(inbound)?;
            }
        }
        Ok(())
    }

    fn route(&mut self, inbound: Inbound) -> Result<()> {
        let mut port = NetworkPort {
            network: &self.network,
            link: &mut self.link,
        };
        let notice = match inbound {
            Inbound::Deliver {
                source,
                destination,
                data,
            } => {
                let notice = self.transport.on_receive(source, destination, &data, &mut port)?;
                if matches!(notice, Notice::Message { kind, .. } if kind.requires_ack()) {
                    self.stats.acks_sent += 1;
                }
                notice
            }
            Inbound::Bounced { destination, data } => match data.first() {
                Some(&slot) => self.transport.on_send_failed(slot, destination),
                None => Notice::Malformed { length: 2 },
            },
            Inbound::BroadcastReturned { data } => self.transport.on_broadcast_confirmed(&data),
            Inbound::Rejected { computed, received } => Notice::CrcMismatch { computed, received },
            Inbound::Malformed { length } => Notice::Malformed { length },
            Inbound::Ignored => return Ok(()),
        };
        self.notify(notice);
        Ok(())
    }

    /// Send `text` to `address` through the transport layer. Returns the
    /// slot id carried by the message.
    ///
    /// # Errors
    /// - `TransportError::SlotTableFull` when the message needs a slot and
    ///   none is free
    /// - `LinkError::PayloadTooLong` when `text` does not fit a frame
    pub fn submit_console_message(
        &mut self,
        address: u8,
        kind: MessageKind,
        text: &[u8],
    ) -> Result<u8> {
        let mut port = NetworkPort {
            network: &self.network,
            link: &mut self.link,
        };
        let slot = self.transport.send(self.now, address, kind, text, &mut port)?;
        self.notify(Notice::Sent {
            slot,
            destination: address,
            kind,
        });
        Ok(slot)
    }

    pub fn submit_command(&mut self, command: &ConsoleCommand) -> Result<u8> {
        self.submit_console_message(command.address, command.kind, &command.text)
    }

    /// Feed one operator keystroke into this node's line console. A
    /// completed command is sent; rejected input becomes a notice.
    pub fn on_console_char(&mut self, ch: char) {
        let outcome = match self.console.feed(ch) {
            None => return,
            Some(Ok(command)) => self.submit_command(&command).map(|_| ()),
            Some(Err(err)) => Err(err.into()),
        };
        if let Err(err) = outcome {
            warn!(%err, "console command rejected");
            self.notify(Notice::InputError(err.to_string()));
        }
    }

    pub fn console(&self) -> &LineConsole {
        &self.console
    }

    fn notify(&mut self, notice: Notice) {
        self.stats.record(&notice);
        self.notices.push(notice);
    }

    /// Take every notice queued since the last call.
    pub fn drain_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    pub fn stats(&self) -> &StackStats {
        &self.stats
    }

    pub fn link(&self) -> &DataLink {
        &self.link
    }

    /// Messages still waiting for an ACK.
    pub fn pending_messages(&self) -> usize {
        self.transport.slots().occupied()
    }

    /// No frame queued, on the line, or being received.
    pub fn is_idle(&self) -> bool {
        self.link.is_idle() && !self.link.has_pending_commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::frame::Frame;

    fn node(address: u8) -> ProtocolStack {
        ProtocolStack::new(StackConfig::new(address)).unwrap()
    }

    /// Tick `tx` until idle, feeding every bit into `rx`.
    fn transfer(tx: &mut ProtocolStack, rx: &mut ProtocolStack) {
        let mut line = Vec::new();
        let mut discard = Vec::new();
        let mut guard = 0;
        while !tx.is_idle() {
            tx.on_tick(&mut line);
            tx.poll(&mut line).unwrap();
            for bit in line.drain(..) {
                rx.on_sample(bit);
            }
            rx.poll(&mut discard).unwrap();
            guard += 1;
            assert!(guard < 10_000, "transfer did not finish");
        }
    }

    #[test]
    fn test_rejects_broadcast_address() {
        assert!(matches!(
            ProtocolStack::new(StackConfig::new(0)),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_tick_counts_idle_bits() {
        let mut a = node(5);
        let mut line = Vec::new();
        for _ in 0..3 {
            a.on_tick(&mut line);
        }
        assert_eq!(line, vec![false; 3]);
        assert_eq!(a.now(), 3);
        assert_eq!(a.stats().idle_bits, 3);
    }

    #[test]
    fn test_message_and_ack() {
        let mut a = node(5);
        let mut b = node(9);

        let slot = a.submit_console_message(9, MessageKind::Default, b"hi").unwrap();
        assert_eq!(a.pending_messages(), 1);
        transfer(&mut a, &mut b);

        let notices = b.drain_notices();
        assert_eq!(
            notices,
            vec![Notice::Message {
                source: 5,
                kind: MessageKind::Default,
                text: b"hi".to_vec()
            }]
        );
        assert_eq!(b.stats().acks_sent, 1);

        transfer(&mut b, &mut a);
        let notices = a.drain_notices();
        assert!(notices.contains(&Notice::Acknowledged {
            source: 9,
            slot,
            text: b"hi".to_vec()
        }));
        assert_eq!(a.pending_messages(), 0);
    }

    #[test]
    fn test_foreign_unicast_forwarded() {
        let mut relay = node(7);
        let mut line = Vec::new();
        let bits = Frame::outbound(vec![9, 5, 0, 2, b'x']).unwrap().wire_bits();
        for bit in bits.iter().copied() {
            relay.on_sample(bit);
            relay.poll(&mut line).unwrap();
        }
        assert!(relay.drain_notices().is_empty());

        while !relay.is_idle() {
            relay.on_tick(&mut line);
        }
        assert_eq!(line, bits);
        assert_eq!(relay.stats().frames_forwarded, 1);
        assert_eq!(relay.stats().frames_received, 0);
    }

    #[test]
    fn test_console_keystrokes_send() {
        let mut a = node(5);
        for ch in "9\r2\rping\r".chars() {
            a.on_console_char(ch);
        }
        assert_eq!(
            a.drain_notices(),
            vec![Notice::Sent {
                slot: 0,
                destination: 9,
                kind: MessageKind::Datagram
            }]
        );
        assert!(!a.is_idle());
        assert_eq!(a.pending_messages(), 0);
    }

    #[test]
    fn test_console_error_notice() {
        let mut a = node(5);
        for ch in "nine\r".chars() {
            a.on_console_char(ch);
        }
        let notices = a.drain_notices();
        assert!(matches!(&notices[..], [Notice::InputError(_)]));
    }

    #[test]
    fn test_sweep_retransmits_once_per_tick() {
        let mut a = ProtocolStack::new(StackConfig::new(5).with_retransmit_after(100)).unwrap();
        let mut line = Vec::new();
        a.submit_console_message(9, MessageKind::Default, b"hi").unwrap();
        for _ in 0..99 {
            a.on_tick(&mut line);
            a.poll(&mut line).unwrap();
        }
        assert_eq!(a.stats().retransmissions, 0);

        a.on_tick(&mut line);
        a.poll(&mut line).unwrap();
        a.poll(&mut line).unwrap();
        assert_eq!(a.stats().retransmissions, 1);
        assert_eq!(a.link().queues().len(crate::queue::Lane::Outbound), 1);
    }
}
