//! Configuration for the wirenet ring simulator.
//!
//! Handles parsing command-line arguments and resolving defaults.
//!
//! # Philosophy
//!
//! The tool should work with ZERO arguments: a three-node ring at a
//! moderate line speed with a clean line. The seed is time-based unless
//! given, and it is printed so noisy runs are reproducible.

use anyhow::{bail, Result};
use clap::Parser;
use wirenet_core::{transport::DEFAULT_RETRANSMIT_AFTER, LineSpeed, StackConfig, WireConfig};

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "wirenet")]
#[command(about = "Ring of bit-serial nodes with an operator console", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Node addresses around the ring, in order
    #[arg(long, value_delimiter = ',', default_value = "5,9,15")]
    pub nodes: Vec<u8>,

    /// Index (into --nodes) of the node the operator types into
    #[arg(long, default_value_t = 0)]
    pub console_node: usize,

    /// Line speed, 1 (slowest) to 5
    #[arg(long, default_value = "3")]
    pub speed: LineSpeed,

    /// Ticks to wait for an ACK before resending
    #[arg(long, default_value_t = DEFAULT_RETRANSMIT_AFTER)]
    pub retransmit_after: u32,

    /// Probability that a sampled bit is flipped, 0.0-1.0
    #[arg(long, default_value_t = 0.0)]
    pub flip_rate: f64,

    /// Random seed for line noise and generated traffic
    #[arg(long)]
    pub seed: Option<u64>,

    /// Stop after this many ticks (0 = run until input ends and the ring settles)
    #[arg(long, default_value_t = 0)]
    pub ticks: u64,

    /// Generate this many random messages between nodes
    #[arg(long, default_value_t = 0)]
    pub auto: usize,

    /// Run ticks back to back instead of at the line speed
    #[arg(long)]
    pub no_pacing: bool,

    /// Log filter, e.g. `info` or `wirenet_core::transport=debug`
    #[arg(long)]
    pub log: Option<String>,

    /// Print the resolved configuration
    #[arg(long)]
    pub print_config: bool,

    /// Don't print per-node statistics at exit
    #[arg(long)]
    pub no_stats: bool,
}

/// Complete configuration for a simulator run.
#[derive(Debug, Clone)]
pub struct Config {
    // === Ring ===
    pub nodes: Vec<StackConfig>,
    pub console_node: usize,

    // === Line ===
    pub speed: LineSpeed,
    pub wire: WireConfig,
    pub pacing: bool,

    // === Run ===
    pub ticks: u64,
    pub auto_messages: usize,

    // === Behavior ===
    pub print_config: bool,
    pub print_stats: bool,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        if cli.nodes.is_empty() {
            bail!("--nodes needs at least one address");
        }
        if cli.console_node >= cli.nodes.len() {
            bail!(
                "--console-node {} is out of range for {} nodes",
                cli.console_node,
                cli.nodes.len()
            );
        }
        if !(0.0..=1.0).contains(&cli.flip_rate) {
            bail!("--flip-rate must be within 0.0-1.0, got {}", cli.flip_rate);
        }

        let nodes: Vec<StackConfig> = cli
            .nodes
            .iter()
            .map(|&address| StackConfig::new(address).with_retransmit_after(cli.retransmit_after))
            .collect();
        for node in &nodes {
            node.validate()?;
        }

        // Determine seed (explicit or time-based)
        let seed = cli.seed.unwrap_or_else(|| {
            use std::time::{SystemTime, UNIX_EPOCH};
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default()
        });

        Ok(Self {
            nodes,
            console_node: cli.console_node,
            speed: cli.speed,
            wire: WireConfig::noisy(cli.flip_rate, seed),
            pacing: !cli.no_pacing,
            ticks: cli.ticks,
            auto_messages: cli.auto,
            print_config: cli.print_config,
            print_stats: !cli.no_stats,
        })
    }

    pub fn seed(&self) -> u64 {
        self.wire.seed
    }

    pub fn console_address(&self) -> u8 {
        self.nodes[self.console_node].address
    }

    /// Print the configuration in human-readable form.
    pub fn print(&self) {
        let addresses: Vec<String> = self.nodes.iter().map(|n| n.address.to_string()).collect();
        println!("=== Configuration ===");
        println!("Ring: {}", addresses.join(" -> "));
        println!("Console node: {}", self.console_address());
        println!("Line speed: {}", self.speed);
        if let Some(node) = self.nodes.first() {
            println!("Retransmit after: {} ticks", node.retransmit_after);
        }
        println!();
        println!("=== Line Simulation ===");
        println!("Seed: {}", self.seed());
        println!("Bit flip rate: {:.4}%", self.wire.flip_rate * 100.0);
        println!("Pacing: {}", if self.pacing { "real time" } else { "off" });
        if self.ticks > 0 {
            println!("Stop after: {} ticks", self.ticks);
        }
        if self.auto_messages > 0 {
            println!("Generated messages: {}", self.auto_messages);
        }
        println!();
    }
}
