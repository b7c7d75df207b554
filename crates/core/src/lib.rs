//! wirenet-core: a layered protocol stack for nodes on a bit-serial ring
//!
//! Each node sends one bit per clock tick to its downstream neighbour and
//! samples one bit per tick from its upstream neighbour. On top of that
//! line the library provides:
//! - A CRC-protected frame format with cut-through forwarding
//! - Addressing with broadcast and undeliverable-message detection
//! - Slot-tagged messages with ACKs and timeout retransmission
//! - A line console for composing messages keystroke by keystroke
//! - A deterministic ring simulator with optional line noise
//!
//! # Architecture
//!
//! The system is designed around clear module boundaries:
//! - `crc`: CRC-32 over frame payloads
//! - `frame`, `assembly`, `queue`, `framing`: the data-link layer
//! - `network`: address-based routing on the ring
//! - `transport`: slot table, ACKs, retransmission
//! - `stack`: one node, all layers wired together
//! - `console`, `notice`: operator input and output
//! - `wire`, `ring`: the simulated physical layer
//! - `metrics`: per-node counters
//!
//! # Design Principles
//!
//! - **No panics**: All errors are structured and recoverable
//! - **No globals**: Each node's state lives in its own [`ProtocolStack`]
//! - **Deterministic**: Seeded line noise makes runs reproducible
//! - **Observable**: Counters and `tracing` events for every layer

pub mod assembly;
pub mod config;
pub mod console;
pub mod crc;
pub mod error;
pub mod frame;
pub mod framing;
pub mod metrics;
pub mod network;
pub mod notice;
pub mod queue;
pub mod ring;
pub mod stack;
pub mod transport;
pub mod wire;

// Re-export commonly used types
pub use config::{LineSpeed, StackConfig};
pub use error::{Error, Result};
pub use notice::Notice;
pub use ring::Ring;
pub use stack::ProtocolStack;
pub use transport::MessageKind;
pub use wire::{BitSink, Wire, WireConfig};
