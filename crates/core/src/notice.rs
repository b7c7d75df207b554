//! Operator-facing notices.
//!
//! The stack queues one [`Notice`] per event the operator should see on the
//! line console. They are separate from `tracing` output: logging is for
//! diagnosing the stack, notices are the console's output.

use std::borrow::Cow;
use std::fmt;

use crate::crc;
use crate::transport::MessageKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A console or API message was handed to the network layer
    Sent {
        slot: u8,
        destination: u8,
        kind: MessageKind,
    },
    /// A unicast message addressed to this node
    Message { source: u8, kind: MessageKind, text: Vec<u8> },
    /// A broadcast from another node
    Broadcast { source: u8, text: Vec<u8> },
    /// `source` acknowledged the message held in `slot`
    Acknowledged { source: u8, slot: u8, text: Vec<u8> },
    /// An ACK for a slot that is free or pending for another node
    StaleAck { source: u8, slot: u8 },
    /// A broadcast from this node travelled the whole ring
    BroadcastLooped { text: Vec<u8> },
    /// A unicast came back: nobody on the ring has `destination`
    SendFailed { destination: u8, slot: u8 },
    /// No ACK within the threshold; the segment was sent again
    Retransmitted { destination: u8, slot: u8 },
    CrcMismatch { computed: u32, received: u32 },
    /// A frame or segment too short to route
    Malformed { length: usize },
    /// The receiver dropped a frame because bytes were not committed in time
    Overrun { capacity: usize },
    /// Console input was rejected and the command aborted
    InputError(String),
}

/// Message bytes as the console prints them: up to the first NUL.
pub fn printable(bytes: &[u8]) -> Cow<'_, str> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end])
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Sent {
                slot,
                destination,
                kind,
            } => write!(f, "Sent {kind} message to {destination} (slot {slot})"),
            Notice::Message { source, text, .. } => {
                write!(f, "From {source} received message: {}", printable(text))
            }
            Notice::Broadcast { source, text } => {
                write!(f, "Received broadcast message from {source}: {}", printable(text))
            }
            Notice::Acknowledged { source, text, .. } => {
                write!(f, "Node {source} received message: {}", printable(text))
            }
            Notice::StaleAck { source, slot } => {
                write!(f, "Ignored acknowledgment from {source} for slot {slot}")
            }
            Notice::BroadcastLooped { text } => write!(
                f,
                "Message: {}\nAbove message is successfully broadcasted",
                printable(text)
            ),
            Notice::SendFailed { destination, .. } => {
                write!(f, "Send failed: {destination} does not exist")
            }
            Notice::Retransmitted { destination, slot } => {
                write!(f, "Resent slot {slot} to {destination}: no acknowledgment yet")
            }
            Notice::CrcMismatch { computed, received } => write!(
                f,
                "CRC not matched: computed {} received {}",
                crc::format_hex(*computed),
                crc::format_hex(*received)
            ),
            Notice::Malformed { length } => write!(f, "Dropped malformed {length}-byte packet"),
            Notice::Overrun { capacity } => {
                write!(f, "Receive overrun ({capacity} bytes pending), frame dropped")
            }
            Notice::InputError(reason) => write!(f, "Input error: {reason}"),
        }
    }
}
