//! Stop-and-wait reliability and multi-hop forwarding.
//!
//! Outbound fragments queue here and trickle into the MAC one at a time;
//! the opening fragment of a series arms the MAC's send-grant. Fragments
//! received for other destinations are forwarded: the next-hop and
//! previous-hop header bytes are rewritten and the fragment re-enters
//! the queue, guarded by the last-forwarded nonce pair so a flood or a
//! routing loop cannot bounce the same series around.

use std::sync::{Arc, Mutex};

use log::{debug, warn};
use tokio::sync::mpsc;

use crate::mac::Mac;
use crate::routing::Routing;
use crate::wire::DataFrame;
use crate::{Identity, NODE_UNASSIGNED, NodeId};

struct Shared {
    identity: Identity,
    mac: Mac,
    routing: Routing,
    queue_tx: mpsc::UnboundedSender<DataFrame>,
    last_forwarded: Mutex<Option<(u8, u8)>>,
}

/// Handle to the reliability queue and forwarding state.
#[derive(Clone)]
pub struct Reliability {
    shared: Arc<Shared>,
}

impl Reliability {
    /// Spawn the queue pump feeding the MAC normal sender.
    pub fn new(identity: Identity, mac: Mac, routing: Routing) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            identity,
            mac,
            routing,
            queue_tx,
            last_forwarded: Mutex::new(None),
        });
        tokio::spawn(pump(shared.clone(), queue_rx));
        Self { shared }
    }

    /// Queue an outbound fragment behind whatever is already in flight.
    pub fn enqueue(&self, frame: DataFrame) {
        let _ = self.shared.queue_tx.send(frame);
    }

    /// An ACK was heard; release the MAC if it names us.
    pub fn on_ack(&self, id: NodeId) {
        if Some(id) == self.shared.identity.assigned() {
            self.shared.mac.ack_received();
        }
    }

    /// Forward a fragment destined elsewhere. Returns whether it was
    /// queued for retransmission.
    pub fn forward(&self, frame: DataFrame) -> bool {
        let mut last = self.shared.last_forwarded.lock().unwrap();
        if *last == Some(frame.nonce) {
            debug!(
                "suppressing duplicate fragment from {} for {}",
                frame.source, frame.dest
            );
            return false;
        }

        let next_hop = self.shared.routing.next_hop(frame.dest);
        if next_hop == NODE_UNASSIGNED {
            warn!("dropping fragment for unroutable {}", frame.dest);
            return false;
        }

        *last = Some(frame.nonce);
        let mut frame = frame;
        frame.next_hop = next_hop;
        frame.prev_hop = self.shared.identity.get();
        debug!(
            "relaying fragment {}/{} from {} toward {} via {next_hop}",
            frame.seq, frame.fragments, frame.source, frame.dest
        );
        self.enqueue(frame);
        true
    }
}

async fn pump(shared: Arc<Shared>, mut queue_rx: mpsc::UnboundedReceiver<DataFrame>) {
    while let Some(frame) = queue_rx.recv().await {
        if frame.seq == 1 {
            shared.mac.arm_first();
        }
        if shared.mac.enqueue_normal(frame).await.is_err() {
            return;
        }
    }
}
