//! Splits user payloads into fragment series.
//!
//! A series carries one message to one destination: fragments of at most
//! 23 payload bytes, sequence numbers `1..=N`, one random nonce pair
//! shared by the whole series. Broadcast is a separate series per
//! currently reachable destination, each with its own nonce.

use log::warn;
use rand::Rng;
use thiserror::Error;

use crate::reliability::Reliability;
use crate::routing::Routing;
use crate::wire::{DataFrame, MAX_FRAGMENTS, MAX_PAYLOAD};
use crate::{Identity, NODE_UNASSIGNED, NodeId};

/// Why a message could not be queued.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum SendError {
    /// We have no identifier yet; nothing can carry a source id.
    #[error("node has no identifier yet")]
    Unaddressed,
    /// The destination is not in the routing table.
    #[error("we don't have destination {0} in our table, please try again")]
    NoRoute(NodeId),
    /// The payload needs more fragments than a series can number.
    #[error("message needs {0} fragments, the limit is {max}", max = MAX_FRAGMENTS)]
    TooLong(usize),
}

/// Builds fragment series and hands them to the reliability queue.
#[derive(Clone)]
pub struct Chunker {
    identity: Identity,
    routing: Routing,
    reliability: Reliability,
}

impl Chunker {
    pub fn new(identity: Identity, routing: Routing, reliability: Reliability) -> Self {
        Self {
            identity,
            routing,
            reliability,
        }
    }

    /// Queue a unicast message for `dest`.
    pub fn whisper(&self, dest: NodeId, payload: &[u8]) -> Result<(), SendError> {
        let own = self.identity.assigned().ok_or(SendError::Unaddressed)?;
        self.send_series(own, dest, payload)
    }

    /// Queue one series per currently reachable destination. Unroutable
    /// destinations lose their series without affecting the others.
    pub fn broadcast(&self, payload: &[u8]) -> Result<(), SendError> {
        let own = self.identity.assigned().ok_or(SendError::Unaddressed)?;
        for dest in self.routing.reachable() {
            if let Err(e) = self.send_series(own, dest, payload) {
                warn!("broadcast series for {dest} aborted: {e}");
            }
        }
        Ok(())
    }

    fn send_series(&self, own: NodeId, dest: NodeId, payload: &[u8]) -> Result<(), SendError> {
        let chunks: Vec<&[u8]> = payload.chunks(MAX_PAYLOAD).collect();
        if chunks.is_empty() {
            return Ok(());
        }
        if chunks.len() > MAX_FRAGMENTS as usize {
            return Err(SendError::TooLong(chunks.len()));
        }

        let total = chunks.len() as u8;
        let nonce = (rand::rng().random::<u8>(), rand::rng().random::<u8>());
        for (index, chunk) in chunks.iter().enumerate() {
            // The route can disappear mid-series; the remainder is
            // abandoned since the receiver cannot use a gap anyway.
            let next_hop = self.routing.next_hop(dest);
            if next_hop == NODE_UNASSIGNED {
                if index > 0 {
                    warn!("route to {dest} lost after fragment {index}, series abandoned");
                }
                return Err(SendError::NoRoute(dest));
            }
            self.reliability.enqueue(DataFrame {
                fragments: total,
                next_hop,
                source: own,
                dest,
                seq: (index + 1) as u8,
                prev_hop: own,
                nonce,
                payload: chunk.to_vec(),
            });
        }
        Ok(())
    }
}
