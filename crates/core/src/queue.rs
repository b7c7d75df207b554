//! Send queues.
//!
//! Two FIFO lanes of frame handles wait for the transmitter. Frames being
//! forwarded for other nodes always go out before frames this node
//! originated; within a lane, insertion order is preserved.

use std::collections::VecDeque;

use crate::frame::FrameId;

/// Which queue a frame was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// Store-and-forward traffic for other nodes
    Forward,
    /// Frames originated by this node
    Outbound,
}

#[derive(Debug, Default)]
pub struct FrameQueues {
    forward: VecDeque<FrameId>,
    outbound: VecDeque<FrameId>,
}

impl FrameQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_outbound(&mut self, id: FrameId) {
        self.outbound.push_back(id);
    }

    pub fn push_forward(&mut self, id: FrameId) {
        self.forward.push_back(id);
    }

    /// Next frame to transmit: the forward lane first, then the outbound lane.
    pub fn pop_next(&mut self) -> Option<(Lane, FrameId)> {
        if let Some(id) = self.forward.pop_front() {
            return Some((Lane::Forward, id));
        }
        self.outbound.pop_front().map(|id| (Lane::Outbound, id))
    }

    pub fn len(&self, lane: Lane) -> usize {
        match lane {
            Lane::Forward => self.forward.len(),
            Lane::Outbound => self.outbound.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty() && self.outbound.is_empty()
    }
}
