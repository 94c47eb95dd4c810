//! Per-sender reassembly of fragment series.
//!
//! Fragments are accepted only in strict sequence starting at 1; a gap
//! drops the stray fragment on the floor and the stop-and-wait sender
//! retransmits it anyway. Completing a series delivers the concatenated
//! payload unless its nonce matches the previously delivered series from
//! the same sender, which marks a duplicate. Both outcomes reset the
//! slot for the next series.

use std::collections::HashMap;

use log::{debug, trace};

use crate::NodeId;
use crate::wire::{DataFrame, MAX_PAYLOAD};

/// A fully reassembled message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub from: NodeId,
    pub payload: Vec<u8>,
}

#[derive(Default)]
struct Slot {
    expected: u8,
    total: u8,
    buf: Vec<u8>,
    last_nonce: Option<(u8, u8)>,
}

/// Reassembly state, one slot per sender.
#[derive(Default)]
pub struct Reassembler {
    slots: HashMap<NodeId, Slot>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a fragment addressed to us; returns the finished message
    /// once its series completes.
    pub fn accept(&mut self, frame: &DataFrame) -> Option<Delivery> {
        if frame.fragments == 0 {
            return None;
        }
        let slot = self.slots.entry(frame.source).or_default();

        if frame.seq != slot.expected + 1 {
            trace!(
                "out-of-sequence fragment {} from {} (expected {})",
                frame.seq,
                frame.source,
                slot.expected + 1
            );
            return None;
        }

        if frame.seq == 1 {
            slot.total = frame.fragments;
            slot.buf = Vec::with_capacity(MAX_PAYLOAD * frame.fragments as usize);
        }
        slot.buf.extend_from_slice(&frame.payload);
        slot.expected = frame.seq;

        if frame.seq < slot.total {
            return None;
        }

        // Series complete; either way the slot restarts.
        slot.expected = 0;
        let duplicate = slot.last_nonce == Some(frame.nonce);
        slot.last_nonce = Some(frame.nonce);
        let payload = std::mem::take(&mut slot.buf);
        if duplicate {
            debug!("suppressing duplicate series from {}", frame.source);
            return None;
        }
        Some(Delivery {
            from: frame.source,
            payload,
        })
    }
}
