//! Node configuration.
//!
//! A node needs its own address and two tuning knobs; everything else is
//! fixed by the wire format. [`LineSpeed`] maps the operator's 1-5 speed
//! choice to a tick period for hosts that pace ticks in real time.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::assembly;
use crate::error::{Error, Result};
use crate::network::BROADCAST;
use crate::transport::DEFAULT_RETRANSMIT_AFTER;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackConfig {
    /// This node's address, 1-255
    pub address: u8,

    /// Ticks to wait for an ACK before resending
    pub retransmit_after: u32,

    /// Receive assembly ring size in bytes
    pub assembly_capacity: usize,
}

impl StackConfig {
    /// Defaults for a node at `address`.
    pub fn new(address: u8) -> Self {
        Self {
            address,
            retransmit_after: DEFAULT_RETRANSMIT_AFTER,
            assembly_capacity: assembly::DEFAULT_CAPACITY,
        }
    }

    pub fn with_retransmit_after(mut self, ticks: u32) -> Self {
        self.retransmit_after = ticks;
        self
    }

    pub fn with_assembly_capacity(mut self, capacity: usize) -> Self {
        self.assembly_capacity = capacity;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.address == BROADCAST {
            return Err(Error::Config(
                "address 0 is the broadcast address".to_string(),
            ));
        }
        if self.retransmit_after == 0 {
            return Err(Error::Config(
                "retransmit threshold must be at least one tick".to_string(),
            ));
        }
        if self.assembly_capacity < 2 {
            return Err(Error::Config(format!(
                "assembly buffer needs at least 2 bytes, got {}",
                self.assembly_capacity
            )));
        }
        Ok(())
    }
}

/// Line speed setting, 1 (slowest) to 5 (fastest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LineSpeed(u8);

impl LineSpeed {
    pub const SLOWEST: LineSpeed = LineSpeed(1);
    pub const FASTEST: LineSpeed = LineSpeed(5);

    pub fn new(level: u8) -> Result<Self> {
        if (Self::SLOWEST.0..=Self::FASTEST.0).contains(&level) {
            Ok(Self(level))
        } else {
            Err(Error::Config(format!("line speed must be 1-5, got {level}")))
        }
    }

    pub fn level(self) -> u8 {
        self.0
    }

    /// Time between ticks, i.e. the duration of one bit on the line.
    pub fn tick_period(self) -> Duration {
        let millis = match self.0 {
            1 => 200,
            2 => 40,
            3 => 20,
            4 => 10,
            _ => 5,
        };
        Duration::from_millis(millis)
    }
}

impl Default for LineSpeed {
    fn default() -> Self {
        LineSpeed(3)
    }
}

impl FromStr for LineSpeed {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let level = s
            .trim()
            .parse::<u8>()
            .map_err(|_| Error::Config(format!("line speed must be 1-5, got {s:?}")))?;
        Self::new(level)
    }
}

impl fmt::Display for LineSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} ms/bit)", self.0, self.tick_period().as_millis())
    }
}
