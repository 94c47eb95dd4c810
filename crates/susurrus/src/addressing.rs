//! Distributed self-assignment of node identifiers.
//!
//! A booting node broadcasts an exploration frame and listens for about
//! eight seconds. Assigned nodes answer explorations with non-final
//! gossip carrying their known-address set, and every addressing frame
//! heard during the listen window merges into the local set. Hearing a
//! reply (a peer announcing a freshly claimed identifier) makes the
//! listener pick an identifier outside the merged set and announce it
//! with a reply of its own; a node that hears no reply assumes it is
//! alone at the timeout and picks uniformly at random.
//!
//! Collisions are avoided, not excluded: the random fallback, two nodes
//! exploring at the same instant, or a partitioned network healing later
//! can all end up sharing an identifier, and nothing detects it.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use rand::Rng;
use tokio::time::{Duration, sleep};

use crate::mac::Mac;
use crate::medium::Transmission;
use crate::wire::{AddressingFlag, AddressingFrame};
use crate::{Identity, MAX_NODE_ID, NODE_UNASSIGNED, NodeId};

/// Listen phase granularity.
const LISTEN_TICK: Duration = Duration::from_millis(1600);
/// Listen phase length, about eight seconds.
const LISTEN_TICKS: u32 = 5;

#[derive(Default)]
struct AddrState {
    known: BTreeSet<NodeId>,
    /// A reply frame was heard since boot.
    got_reply: bool,
}

struct Shared {
    identity: Identity,
    mac: Mac,
    state: Mutex<AddrState>,
}

/// Handle to the address-acquisition state.
#[derive(Clone)]
pub struct Addressing {
    shared: Arc<Shared>,
}

impl Addressing {
    pub fn new(identity: Identity, mac: Mac) -> Self {
        Self {
            shared: Arc::new(Shared {
                identity,
                mac,
                state: Mutex::new(AddrState::default()),
            }),
        }
    }

    /// Ids observed as claimed, our own included once assigned.
    pub fn known(&self) -> Vec<NodeId> {
        self.shared.state.lock().unwrap().known.iter().copied().collect()
    }

    /// Handle an addressing frame overheard on the medium.
    pub fn on_frame(&self, frame: &AddressingFrame) {
        if frame.source == NODE_UNASSIGNED {
            // A newcomer exploring. Gossip it everything we know.
            if self.shared.identity.assigned().is_some() {
                debug!("answering exploration request");
                self.send_known(AddressingFlag::Gossip);
            }
            return;
        }

        let mut state = self.shared.state.lock().unwrap();
        state.known.extend(frame.known.iter().copied());
        if frame.flag == AddressingFlag::Reply {
            // A peer announced a claim. Merging is all an assigned node
            // does with it; an unassigned one picks at its next tick.
            state.got_reply = true;
        }
    }

    /// Acquire an identifier: explore, listen, claim one outside the
    /// known set once a reply is heard, fall back to a uniform random
    /// pick when nobody answers. Resolves to the assigned id.
    pub(crate) async fn run(self) -> NodeId {
        self.send_exploration();
        for _ in 0..LISTEN_TICKS {
            sleep(LISTEN_TICK).await;
            if let Some(id) = self.shared.identity.assigned() {
                return id;
            }
            if self.shared.state.lock().unwrap().got_reply {
                return self.claim();
            }
        }

        // Nobody out there; any identifier will do.
        let id = rand::rng().random_range(1..=MAX_NODE_ID);
        self.shared.state.lock().unwrap().known.insert(id);
        self.shared.identity.assign(id);
        info!("no peers answered, claimed identifier {id}");
        id
    }

    /// Pick an identifier outside the merged known set and announce it.
    fn claim(&self) -> NodeId {
        let id = {
            let mut state = self.shared.state.lock().unwrap();
            let id = pick_free(&state.known);
            state.known.insert(id);
            id
        };
        self.shared.identity.assign(id);
        info!("claimed identifier {id}");
        self.send_known(AddressingFlag::Reply);
        id
    }

    fn send_exploration(&self) {
        let frame = AddressingFrame {
            flag: AddressingFlag::Gossip,
            source: NODE_UNASSIGNED,
            known: Vec::new(),
        };
        self.shared
            .mac
            .enqueue_background(Transmission::Data(frame.encode().to_vec()));
    }

    fn send_known(&self, flag: AddressingFlag) {
        let Some(own) = self.shared.identity.assigned() else {
            return;
        };
        let known = {
            let state = self.shared.state.lock().unwrap();
            state.known.iter().copied().collect()
        };
        let frame = AddressingFrame {
            flag,
            source: own,
            known,
        };
        self.shared
            .mac
            .enqueue_background(Transmission::Data(frame.encode().to_vec()));
    }
}

fn pick_free(known: &BTreeSet<NodeId>) -> NodeId {
    let free: Vec<NodeId> = (1..=MAX_NODE_ID).filter(|id| !known.contains(id)).collect();
    if free.is_empty() {
        // Address space exhausted; a collision is unavoidable.
        warn!("all {MAX_NODE_ID} identifiers already claimed");
        return rand::rng().random_range(1..=MAX_NODE_ID);
    }
    let pick = rand::rng().random_range(0..free.len());
    free[pick]
}
