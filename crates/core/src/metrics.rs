//! Per-node counters.
//!
//! Tracks what a node did on the line and at each layer:
//! - Line activity (bits emitted, idle filler bits, deferred bits)
//! - Frame-level statistics (sent, forwarded, received, CRC failures)
//! - Transport outcomes (ACKs, retransmissions, bounces, broadcast loops)
//!
//! # Design
//!
//! Counters are plain integers updated by the owning [`ProtocolStack`] from
//! its tick and main-loop paths. Layer-level outcomes are folded in from
//! the [`Notice`] values the stack already produces.
//!
//! [`ProtocolStack`]: crate::stack::ProtocolStack

use std::time::{Duration, Instant};

use crate::notice::Notice;
use crate::queue::Lane;

#[derive(Debug, Clone)]
pub struct StackStats {
    /// When the node was created
    pub start_time: Instant,

    // === Line ===
    /// Ticks handled
    pub ticks: u64,

    /// Bits put on the line, filler included
    pub bits_emitted: u64,

    /// Filler `0` bits sent while nothing was queued
    pub idle_bits: u64,

    /// Ticks that could not emit because a forwarded byte was not committed
    pub send_backoffs: u64,

    // === Frames ===
    /// Own frames fully transmitted
    pub frames_sent: u64,

    /// Frames relayed for other nodes
    pub frames_forwarded: u64,

    /// Deliverable frames fully received
    pub frames_received: u64,

    /// Deliverable frames that failed the CRC check
    pub crc_failures: u64,

    /// Frames abandoned because the deferred writer fell behind
    pub assembly_overruns: u64,

    /// Frames or segments too short to route
    pub malformed: u64,

    // === Transport ===
    pub messages_sent: u64,
    pub messages_received: u64,
    pub acks_sent: u64,
    pub acks_received: u64,
    pub stale_acks: u64,
    pub retransmissions: u64,
    pub bounced_sends: u64,
    pub broadcasts_looped: u64,
}

impl StackStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            ticks: 0,
            bits_emitted: 0,
            idle_bits: 0,
            send_backoffs: 0,
            frames_sent: 0,
            frames_forwarded: 0,
            frames_received: 0,
            crc_failures: 0,
            assembly_overruns: 0,
            malformed: 0,
            messages_sent: 0,
            messages_received: 0,
            acks_sent: 0,
            acks_received: 0,
            stale_acks: 0,
            retransmissions: 0,
            bounced_sends: 0,
            broadcasts_looped: 0,
        }
    }

    pub fn duration(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Count a frame that left the transmitter.
    pub fn record_frame_done(&mut self, lane: Lane) {
        match lane {
            Lane::Forward => self.frames_forwarded += 1,
            Lane::Outbound => self.frames_sent += 1,
        }
    }

    /// Fold an operator notice into the counters.
    pub fn record(&mut self, notice: &Notice) {
        match notice {
            Notice::Sent { .. } => self.messages_sent += 1,
            Notice::Message { .. } | Notice::Broadcast { .. } => self.messages_received += 1,
            Notice::Acknowledged { .. } => self.acks_received += 1,
            Notice::StaleAck { .. } => self.stale_acks += 1,
            Notice::BroadcastLooped { .. } => self.broadcasts_looped += 1,
            Notice::SendFailed { .. } => self.bounced_sends += 1,
            Notice::Retransmitted { .. } => self.retransmissions += 1,
            Notice::CrcMismatch { .. } => self.crc_failures += 1,
            Notice::Malformed { .. } => self.malformed += 1,
            Notice::Overrun { .. } => self.assembly_overruns += 1,
            Notice::InputError(_) => {}
        }
    }

    /// Fraction of line time spent sending filler.
    pub fn idle_ratio(&self) -> f64 {
        if self.bits_emitted == 0 {
            0.0
        } else {
            self.idle_bits as f64 / self.bits_emitted as f64
        }
    }

    /// Print a human-readable summary to stdout.
    pub fn print_summary(&self, address: u8) {
        println!("\n=== Node {address} ===");
        println!("Ticks: {} ({} ms)", self.ticks, self.duration().as_millis());
        println!(
            "Bits emitted: {} ({:.1}% idle), deferred: {}",
            self.bits_emitted,
            self.idle_ratio() * 100.0,
            self.send_backoffs
        );
        println!(
            "Frames sent: {}, forwarded: {}, received: {}",
            self.frames_sent, self.frames_forwarded, self.frames_received
        );
        println!(
            "CRC failures: {}, overruns: {}, malformed: {}",
            self.crc_failures, self.assembly_overruns, self.malformed
        );
        println!(
            "Messages sent: {}, received: {}, acks sent/received: {}/{}",
            self.messages_sent, self.messages_received, self.acks_sent, self.acks_received
        );
        println!(
            "Retransmissions: {}, bounced: {}, broadcasts looped: {}",
            self.retransmissions, self.bounced_sends, self.broadcasts_looped
        );
    }

    /// Export counters as `key=value` lines (for parsing/testing).
    pub fn export_text(&self) -> String {
        format!(
            "ticks={}\n\
             bits_emitted={}\n\
             idle_bits={}\n\
             send_backoffs={}\n\
             frames_sent={}\n\
             frames_forwarded={}\n\
             frames_received={}\n\
             crc_failures={}\n\
             assembly_overruns={}\n\
             malformed={}\n\
             messages_sent={}\n\
             messages_received={}\n\
             acks_sent={}\n\
             acks_received={}\n\
             stale_acks={}\n\
             retransmissions={}\n\
             bounced_sends={}\n\
             broadcasts_looped={}\n",
            self.ticks,
            self.bits_emitted,
            self.idle_bits,
            self.send_backoffs,
            self.frames_sent,
            self.frames_forwarded,
            self.frames_received,
            self.crc_failures,
            self.assembly_overruns,
            self.malformed,
            self.messages_sent,
            self.messages_received,
            self.acks_sent,
            self.acks_received,
            self.stale_acks,
            self.retransmissions,
            self.bounced_sends,
            self.broadcasts_looped,
        )
    }
}

impl Default for StackStats {
    fn default() -> Self {
        Self::new()
    }
}
