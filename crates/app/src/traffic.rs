//! Generated demo traffic.
//!
//! With `--auto N`, the simulator injects N messages as if operators on
//! random nodes had typed them. The mix exercises every path through the
//! stack:
//! - Mostly acknowledged unicast between ring members
//! - Some datagrams (no ACK)
//! - Some broadcasts (travel the whole loop)
//! - The occasional unicast to an address nobody has (bounces)
//!
//! Everything is drawn from a seeded RNG, so a seed reproduces the run.

use std::collections::VecDeque;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use wirenet_core::{console::ConsoleCommand, MessageKind};

/// A message to inject at a given tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledMessage {
    pub at_tick: u64,
    /// Index of the sending node
    pub origin: usize,
    pub command: ConsoleCommand,
}

const WORDS: &[&str] = &[
    "hello", "ping", "status", "ok", "ring", "token", "bit", "frame", "ack", "wire", "node",
];

/// Build a schedule of `count` messages among the nodes at `addresses`.
///
/// Messages are spaced a few hundred ticks apart.
pub fn generate_schedule(seed: u64, count: usize, addresses: &[u8]) -> VecDeque<ScheduledMessage> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut schedule = VecDeque::with_capacity(count);
    if addresses.is_empty() {
        return schedule;
    }

    let mut tick = 0u64;
    for _ in 0..count {
        tick += rng.gen_range(200..=800);
        let origin = rng.gen_range(0..addresses.len());

        // Choose message type randomly
        let roll: u8 = rng.gen_range(0..20);
        let (address, kind) = match roll {
            // 10% broadcast
            0..=1 => (0, MessageKind::Default),
            // 5% unknown destination
            2 => {
                let address = unused_address(&mut rng, addresses)
                    .unwrap_or_else(|| pick_peer(&mut rng, addresses, origin));
                (address, MessageKind::Default)
            }
            // 20% datagram
            3..=6 => (pick_peer(&mut rng, addresses, origin), MessageKind::Datagram),
            // 65% acknowledged unicast
            _ => (pick_peer(&mut rng, addresses, origin), MessageKind::Default),
        };

        schedule.push_back(ScheduledMessage {
            at_tick: tick,
            origin,
            command: ConsoleCommand {
                address,
                kind,
                text: generate_text(&mut rng),
            },
        });
    }
    schedule
}

/// Any other ring member, or the origin itself in a one-node ring.
fn pick_peer(rng: &mut ChaCha8Rng, addresses: &[u8], origin: usize) -> u8 {
    if addresses.len() == 1 {
        return addresses[0];
    }
    let offset = rng.gen_range(1..addresses.len());
    addresses[(origin + offset) % addresses.len()]
}

fn unused_address(rng: &mut ChaCha8Rng, addresses: &[u8]) -> Option<u8> {
    let free: Vec<u8> = (1..=u8::MAX).filter(|a| !addresses.contains(a)).collect();
    if free.is_empty() {
        return None;
    }
    Some(free[rng.gen_range(0..free.len())])
}

fn generate_text(rng: &mut ChaCha8Rng) -> Vec<u8> {
    let words = rng.gen_range(1..=4);
    let text: Vec<&str> = (0..words)
        .map(|_| WORDS[rng.gen_range(0..WORDS.len())])
        .collect();
    text.join(" ").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_size_and_order() {
        let schedule = generate_schedule(42, 50, &[5, 9, 15]);
        assert_eq!(schedule.len(), 50);
        assert!(schedule
            .iter()
            .zip(schedule.iter().skip(1))
            .all(|(a, b)| a.at_tick < b.at_tick));
    }

    #[test]
    fn test_determinism() {
        let a = generate_schedule(12345, 20, &[5, 9]);
        let b = generate_schedule(12345, 20, &[5, 9]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_never_sends_to_self() {
        let addresses = [5, 9, 15];
        for message in generate_schedule(7, 200, &addresses) {
            assert_ne!(message.command.address, addresses[message.origin]);
            assert!(!message.command.text.is_empty());
        }
    }

    #[test]
    fn test_empty_ring() {
        assert!(generate_schedule(1, 10, &[]).is_empty());
    }
}
