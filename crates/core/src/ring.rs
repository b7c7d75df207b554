//! Ring simulation: N nodes joined by N one-way wires.
//!
//! Node `i` drives wire `i`; node `i + 1` (mod N) samples it. One
//! [`step`](Ring::step) is one tick of a shared clock:
//!
//! 1. every node ticks (emits a bit onto its wire) and runs a main-loop pass
//! 2. every node samples its upstream wire
//! 3. every node runs a main-loop pass again
//!
//! A bit emitted on tick `t` is therefore sampled downstream on tick `t`.

use std::collections::HashSet;

use tracing::debug;

use crate::config::StackConfig;
use crate::error::{Error, Result};
use crate::notice::Notice;
use crate::stack::ProtocolStack;
use crate::wire::{Wire, WireConfig, WireStats};

pub struct Ring {
    nodes: Vec<ProtocolStack>,
    wires: Vec<Wire>,
    ticks: u64,
}

impl Ring {
    /// Build a ring in the order given. Wire `i` is seeded with
    /// `wire.seed + i`, so noisy runs are reproducible.
    ///
    /// # Errors
    /// `Error::Config` for an empty ring, duplicate addresses, or an invalid
    /// node configuration.
    pub fn new(configs: impl IntoIterator<Item = StackConfig>, wire: WireConfig) -> Result<Self> {
        let nodes = configs
            .into_iter()
            .map(ProtocolStack::new)
            .collect::<Result<Vec<_>>>()?;
        if nodes.is_empty() {
            return Err(Error::Config("a ring needs at least one node".to_string()));
        }

        let mut seen = HashSet::new();
        for node in &nodes {
            if !seen.insert(node.address()) {
                return Err(Error::Config(format!(
                    "address {} appears twice in the ring",
                    node.address()
                )));
            }
        }

        if !(0.0..=1.0).contains(&wire.flip_rate) {
            return Err(Error::Config(format!(
                "flip rate must be within [0, 1], got {}",
                wire.flip_rate
            )));
        }

        let wires = (0..nodes.len())
            .map(|i| {
                Wire::new(WireConfig {
                    seed: wire.seed.wrapping_add(i as u64),
                    ..wire
                })
            })
            .collect();

        debug!(nodes = nodes.len(), flip_rate = wire.flip_rate, "ring built");
        Ok(Self {
            nodes,
            wires,
            ticks: 0,
        })
    }

    /// Build a clean ring of nodes with default settings.
    pub fn with_addresses(addresses: &[u8]) -> Result<Self> {
        Self::new(addresses.iter().copied().map(StackConfig::new), WireConfig::perfect(0))
    }

    /// Advance every node by one tick.
    pub fn step(&mut self) -> Result<()> {
        for (node, wire) in self.nodes.iter_mut().zip(self.wires.iter_mut()) {
            node.on_tick(wire);
            node.poll(wire)?;
        }

        let n = self.nodes.len();
        for i in 0..n {
            let upstream = (i + n - 1) % n;
            let bit = self.wires[upstream].sample();
            self.nodes[i].on_sample(bit);
        }

        for (node, wire) in self.nodes.iter_mut().zip(self.wires.iter_mut()) {
            node.poll(wire)?;
        }
        self.ticks += 1;
        Ok(())
    }

    pub fn run(&mut self, ticks: u64) -> Result<()> {
        for _ in 0..ticks {
            self.step()?;
        }
        Ok(())
    }

    /// Step until every node is idle, at most `max_ticks` times. Returns
    /// whether the ring went idle.
    ///
    /// Messages waiting for an ACK do not keep the ring busy; only frames
    /// queued, on the line or under reception do.
    pub fn run_until_idle(&mut self, max_ticks: u64) -> Result<bool> {
        for _ in 0..max_ticks {
            self.step()?;
            if self.is_idle() {
                return Ok(true);
            }
        }
        Ok(self.is_idle())
    }

    pub fn is_idle(&self) -> bool {
        self.nodes.iter().all(ProtocolStack::is_idle)
    }

    /// Ticks stepped so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[ProtocolStack] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&ProtocolStack> {
        self.nodes.get(index)
    }

    pub fn node_mut(&mut self, index: usize) -> Option<&mut ProtocolStack> {
        self.nodes.get_mut(index)
    }

    pub fn index_of(&self, address: u8) -> Option<usize> {
        self.nodes.iter().position(|n| n.address() == address)
    }

    pub fn node_by_address(&self, address: u8) -> Option<&ProtocolStack> {
        self.nodes.iter().find(|n| n.address() == address)
    }

    pub fn node_by_address_mut(&mut self, address: u8) -> Option<&mut ProtocolStack> {
        self.nodes.iter_mut().find(|n| n.address() == address)
    }

    /// Statistics of the wire driven by node `index`.
    pub fn wire_stats(&self, index: usize) -> Option<WireStats> {
        self.wires.get(index).map(Wire::stats)
    }

    /// Notices from every node, tagged with the node's address.
    pub fn drain_notices(&mut self) -> Vec<(u8, Notice)> {
        self.nodes
            .iter_mut()
            .flat_map(|node| {
                let address = node.address();
                node.drain_notices().into_iter().map(move |n| (address, n))
            })
            .collect()
    }
}
