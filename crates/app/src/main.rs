//! wirenet: ring simulator with an operator console.
//!
//! Builds a ring of nodes, clocks it at the configured line speed and
//! feeds keystrokes from stdin into one node's line console. Console
//! notices from every node are printed as they happen.

mod config;
mod traffic;

use std::io::{BufRead, Write};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use wirenet_core::{console::Prompt, Ring};

use crate::config::{Cli, Config};

/// Keystrokes buffered between the stdin reader and the tick loop
const KEY_CHANNEL_CAPACITY: usize = 1024;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.log.as_deref() {
        Some(directives) => EnvFilter::try_new(directives).context("invalid --log filter")?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_cli(cli)?;
    if config.print_config {
        config.print();
    } else {
        println!("Seed: {}", config.seed());
    }

    let mut ring = Ring::new(config.nodes.clone(), config.wire)?;
    let addresses: Vec<u8> = ring.nodes().iter().map(|n| n.address()).collect();
    let mut schedule = traffic::generate_schedule(config.seed(), config.auto_messages, &addresses);

    let keys = spawn_stdin_reader();
    let mut stdin_open = true;
    let mut prompt = None;

    info!(nodes = ring.len(), speed = config.speed.level(), "ring running");
    loop {
        // Operator input
        while stdin_open {
            match keys.try_recv() {
                Ok(ch) => {
                    if let Some(node) = ring.node_mut(config.console_node) {
                        node.on_console_char(ch);
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("stdin closed");
                    stdin_open = false;
                }
            }
        }

        // Generated traffic
        while schedule.front().is_some_and(|m| m.at_tick <= ring.ticks()) {
            let Some(message) = schedule.pop_front() else {
                break;
            };
            if let Some(node) = ring.node_mut(message.origin) {
                if let Err(err) = node.submit_command(&message.command) {
                    println!("[{}] Send rejected: {err}", node.address());
                }
            }
        }

        ring.step()?;

        for (address, notice) in ring.drain_notices() {
            println!("[{address}] {notice}");
        }

        if stdin_open {
            if let Some(node) = ring.node(config.console_node) {
                let current = node.console().prompt();
                if prompt != Some(current) {
                    prompt = Some(current);
                    print_prompt(node.address(), current)?;
                }
            }
        }

        if config.ticks > 0 {
            if ring.ticks() >= config.ticks {
                break;
            }
        } else if !stdin_open && schedule.is_empty() && settled(&ring) {
            break;
        }

        if config.pacing {
            thread::sleep(config.speed.tick_period());
        }
    }

    info!(ticks = ring.ticks(), "ring stopped");
    if config.print_stats {
        for (index, node) in ring.nodes().iter().enumerate() {
            node.stats().print_summary(node.address());
            if let Some(wire) = ring.wire_stats(index) {
                println!(
                    "Line out: {} bits, {} flipped ({:.3}%)",
                    wire.bits_emitted,
                    wire.bits_flipped,
                    wire.error_rate() * 100.0
                );
            }
        }
    }
    Ok(())
}

/// Nothing moving and nothing waiting for an ACK.
fn settled(ring: &Ring) -> bool {
    ring.is_idle() && ring.nodes().iter().all(|n| n.pending_messages() == 0)
}

fn print_prompt(address: u8, prompt: Prompt) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    write!(stdout, "node {address} {}> ", prompt.label())?;
    stdout.flush()?;
    Ok(())
}

/// Read stdin line by line on a separate thread and forward characters,
/// ending each line with `\r` as a terminal would.
fn spawn_stdin_reader() -> Receiver<char> {
    let (tx, rx) = mpsc::sync_channel(KEY_CHANNEL_CAPACITY);
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            for ch in line.chars().chain(std::iter::once('\r')) {
                if tx.send(ch).is_err() {
                    return;
                }
            }
        }
    });
    rx
}
