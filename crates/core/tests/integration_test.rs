//! Integration tests for whole rings of nodes.
//!
//! These tests drive every node bit by bit through the shared clock and
//! check what each node reports: delivery and acknowledgment, forwarding,
//! broadcasts travelling the loop, undeliverable messages, and
//! retransmission when an ACK is late or the line corrupts a frame.

use proptest::prelude::*;
use wirenet_core::{
    error::{Error, TransportError},
    frame::Frame,
    framing::{DataLink, LinkEvent},
    queue::Lane,
    MessageKind, Notice, ProtocolStack, Ring, StackConfig, WireConfig,
};

const MAX_TICKS: u64 = 20_000;

fn notices_of(notices: &[(u8, Notice)], address: u8) -> Vec<Notice> {
    notices
        .iter()
        .filter(|(from, _)| *from == address)
        .map(|(_, n)| n.clone())
        .collect()
}

/// Node 5 sends "hi" to node 9; 9 acknowledges; 5 stops retransmitting.
#[test]
fn test_message_acknowledged_end_to_end() {
    let mut ring = Ring::with_addresses(&[5, 9]).unwrap();
    let slot = ring
        .node_by_address_mut(5)
        .unwrap()
        .submit_console_message(9, MessageKind::Default, b"hi")
        .unwrap();

    assert!(ring.run_until_idle(MAX_TICKS).unwrap(), "ring did not settle");
    let notices = ring.drain_notices();

    assert_eq!(
        notices_of(&notices, 9),
        vec![Notice::Message {
            source: 5,
            kind: MessageKind::Default,
            text: b"hi".to_vec()
        }]
    );
    assert!(notices_of(&notices, 5).contains(&Notice::Acknowledged {
        source: 9,
        slot,
        text: b"hi".to_vec()
    }));
    assert_eq!(ring.node_by_address(5).unwrap().pending_messages(), 0);

    // Well past the retransmission threshold: nothing is resent.
    ring.run(9_000).unwrap();
    assert!(ring.drain_notices().is_empty());
    assert_eq!(ring.node_by_address(5).unwrap().stats().retransmissions, 0);
}

#[test]
fn test_message_forwarded_through_middle_node() {
    let mut ring = Ring::with_addresses(&[5, 7, 9]).unwrap();
    ring.node_by_address_mut(5)
        .unwrap()
        .submit_console_message(9, MessageKind::Default, b"via seven")
        .unwrap();

    assert!(ring.run_until_idle(MAX_TICKS).unwrap());
    let notices = ring.drain_notices();

    assert!(notices_of(&notices, 7).is_empty());
    assert!(matches!(
        &notices_of(&notices, 9)[..],
        [Notice::Message { source: 5, .. }]
    ));
    assert!(notices_of(&notices, 5)
        .iter()
        .any(|n| matches!(n, Notice::Acknowledged { source: 9, .. })));

    let relay = ring.node_by_address(7).unwrap().stats();
    assert_eq!(relay.frames_forwarded, 1);
    assert_eq!(relay.frames_received, 0);
    assert_eq!(relay.frames_sent, 0);
}

#[test]
fn test_broadcast_travels_the_loop() {
    let mut ring = Ring::with_addresses(&[5, 7, 9]).unwrap();
    ring.node_by_address_mut(5)
        .unwrap()
        .submit_console_message(0, MessageKind::Default, b"yo")
        .unwrap();

    assert!(ring.run_until_idle(MAX_TICKS).unwrap());
    let notices = ring.drain_notices();

    for address in [7, 9] {
        assert_eq!(
            notices_of(&notices, address),
            vec![Notice::Broadcast {
                source: 5,
                text: b"yo".to_vec()
            }]
        );
        let stats = ring.node_by_address(address).unwrap().stats();
        assert_eq!(stats.acks_sent, 0);
        assert_eq!(stats.frames_forwarded, 1);
    }
    assert!(notices_of(&notices, 5).contains(&Notice::BroadcastLooped {
        text: b"yo".to_vec()
    }));
    assert_eq!(ring.node_by_address(5).unwrap().pending_messages(), 0);
}

#[test]
fn test_unknown_destination_bounces() {
    let mut ring = Ring::with_addresses(&[5, 7, 9]).unwrap();
    let slot = ring
        .node_by_address_mut(5)
        .unwrap()
        .submit_console_message(77, MessageKind::Default, b"anyone?")
        .unwrap();
    assert_eq!(ring.node_by_address(5).unwrap().pending_messages(), 1);

    assert!(ring.run_until_idle(MAX_TICKS).unwrap());
    let notices = ring.drain_notices();

    assert!(notices_of(&notices, 5).contains(&Notice::SendFailed {
        destination: 77,
        slot
    }));
    assert!(notices_of(&notices, 7).is_empty());
    assert!(notices_of(&notices, 9).is_empty());
    assert_eq!(ring.node_by_address(5).unwrap().pending_messages(), 0);
}

/// The ACK round trip (about 185 ticks) outlasts a 150-tick threshold, so
/// the message goes out twice and the second ACK finds its slot free.
#[test]
fn test_late_ack_triggers_one_retransmission() {
    let configs = [
        StackConfig::new(5).with_retransmit_after(150),
        StackConfig::new(9),
    ];
    let mut ring = Ring::new(configs, WireConfig::perfect(7)).unwrap();
    ring.node_mut(0)
        .unwrap()
        .submit_console_message(9, MessageKind::Default, b"hi")
        .unwrap();

    ring.run(1_000).unwrap();
    assert!(ring.is_idle());
    let notices = ring.drain_notices();

    let sender = notices_of(&notices, 5);
    let count = |pred: fn(&Notice) -> bool| sender.iter().filter(|n| pred(*n)).count();
    assert_eq!(count(|n| matches!(n, Notice::Retransmitted { .. })), 1);
    assert_eq!(count(|n| matches!(n, Notice::Acknowledged { .. })), 1);
    assert_eq!(count(|n| matches!(n, Notice::StaleAck { .. })), 1);

    let receiver = notices_of(&notices, 9);
    assert_eq!(receiver.len(), 2);
    assert!(receiver
        .iter()
        .all(|n| matches!(n, Notice::Message { source: 5, .. })));
    assert_eq!(ring.node(1).unwrap().stats().acks_sent, 2);
}

#[test]
fn test_corrupted_frame_rejected_then_clean_copy_accepted() {
    let mut node = ProtocolStack::new(StackConfig::new(9)).unwrap();
    let mut line = Vec::new();
    let payload = vec![9, 5, 3, 0, b'o', b'k'];
    let clean = Frame::outbound(payload).unwrap().wire_bits();

    let mut corrupted = clean.clone();
    let last = corrupted.len() - 1;
    corrupted[last] = !corrupted[last];

    for bit in corrupted {
        node.on_sample(bit);
        node.poll(&mut line).unwrap();
    }
    let notices = node.drain_notices();
    assert!(matches!(&notices[..], [Notice::CrcMismatch { .. }]));
    assert!(node.is_idle(), "a rejected frame must not be acknowledged");

    for bit in clean {
        node.on_sample(bit);
        node.poll(&mut line).unwrap();
    }
    let notices = node.drain_notices();
    assert!(matches!(&notices[..], [Notice::Message { source: 5, .. }]));
    assert_eq!(node.stats().crc_failures, 1);
    assert_eq!(node.stats().acks_sent, 1);
}

/// A noisy line corrupts frames in both directions; every message still
/// gets through once the sender resends it.
#[test]
fn test_noisy_line_recovered_by_retransmission() {
    let configs = [5, 7, 9].map(|a| StackConfig::new(a).with_retransmit_after(2_000));
    let mut ring = Ring::new(configs, WireConfig::noisy(0.004, 3)).unwrap();
    let slots: Vec<u8> = (0..10)
        .map(|_| {
            ring.node_by_address_mut(5)
                .unwrap()
                .submit_console_message(9, MessageKind::Default, b"noisy")
                .unwrap()
        })
        .collect();

    ring.run(200_000).unwrap();
    let notices = ring.drain_notices();

    let flipped: u64 = (0..ring.len())
        .filter_map(|i| ring.wire_stats(i))
        .map(|w| w.bits_flipped)
        .sum();
    assert!(flipped > 0);
    assert!(notices
        .iter()
        .any(|(_, n)| matches!(n, Notice::CrcMismatch { .. })));

    let sender = notices_of(&notices, 5);
    assert!(sender
        .iter()
        .any(|n| matches!(n, Notice::Retransmitted { destination: 9, .. })));
    for slot in slots {
        assert!(
            sender.iter().any(|n| matches!(
                n,
                Notice::Acknowledged { source: 9, slot: s, .. } if *s == slot
            )),
            "slot {slot} never acknowledged"
        );
    }
    assert_eq!(ring.node_by_address(5).unwrap().pending_messages(), 0);
    assert!(ring.node_by_address(5).unwrap().stats().retransmissions > 0);
}

#[test]
fn test_forwarding_goes_before_own_traffic() {
    let mut relay = ProtocolStack::new(StackConfig::new(7)).unwrap();
    let mut line = Vec::new();
    relay
        .submit_console_message(9, MessageKind::Datagram, b"mine")
        .unwrap();

    let foreign = Frame::outbound(vec![9, 5, 0, 2, b'x']).unwrap().wire_bits();
    for &bit in &foreign {
        relay.on_sample(bit);
        relay.poll(&mut line).unwrap();
    }
    assert_eq!(relay.link().queues().len(Lane::Forward), 1);
    assert_eq!(relay.link().queues().len(Lane::Outbound), 1);

    while !relay.is_idle() {
        relay.on_tick(&mut line);
    }
    let own = Frame::outbound(vec![9, 7, 0, 2, b'm', b'i', b'n', b'e'])
        .unwrap()
        .wire_bits();
    assert_eq!(&line[..foreign.len()], &foreign[..]);
    assert_eq!(&line[foreign.len()..], &own[..]);
}

#[test]
fn test_slot_exhaustion_reported() {
    let mut node = ProtocolStack::new(StackConfig::new(5)).unwrap();
    for _ in 0..256 {
        node.submit_console_message(9, MessageKind::Default, b"x").unwrap();
    }
    let err = node
        .submit_console_message(9, MessageKind::Default, b"x")
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Transport(TransportError::SlotTableFull { capacity: 256 })
    ));
    // Broadcasts and datagrams need no slot.
    assert!(node.submit_console_message(0, MessageKind::Default, b"x").is_ok());
    assert!(node.submit_console_message(9, MessageKind::Datagram, b"x").is_ok());
}

fn receive_all(link: &mut DataLink, bits: &[bool]) -> Vec<LinkEvent> {
    let mut events = Vec::new();
    for &bit in bits {
        link.on_sample(bit).unwrap();
        while let Some(event) = link.commit_ready() {
            events.push(event);
        }
    }
    events
}

proptest! {
    #[test]
    fn prop_framing_round_trip(
        payload in prop::collection::vec(any::<u8>(), 0..=255),
        idle in 0usize..24,
    ) {
        let frame = Frame::outbound(payload.clone()).unwrap();
        let mut bits = vec![false; idle];
        bits.extend(frame.wire_bits());

        let mut link = DataLink::new(5).unwrap();
        let events = receive_all(&mut link, &bits);

        let received = events.iter().find_map(|e| match e {
            LinkEvent::Received(r) => Some(r),
            _ => None,
        });
        let received = received.expect("frame not received");
        prop_assert_eq!(&received.header, frame.header());
        prop_assert_eq!(&received.payload, &payload);
        prop_assert!(received.crc_valid());
        prop_assert!(link.is_idle());
    }
}
