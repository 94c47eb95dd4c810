//! Distance-vector routing with keep-alive neighbor liveness.
//!
//! Every node periodically advertises its reachable destinations and
//! their hop costs in a link-state frame, and asserts its own liveness
//! with short keep-alives. Receiving either refreshes the sender's
//! miss-counter; a neighbor that stays silent for five keep-alive ticks
//! is dropped together with every destination routed through it.
//!
//! The table maps destinations to `(cost, next hop)`. The local node is
//! never an entry, costs start at 1, and a next hop is always a node we
//! have heard directly (via keep-alive or link-state).

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::{Arc, Mutex};

use log::{debug, trace, warn};
use rand::Rng;
use tokio::time::{Duration, sleep};

use crate::mac::Mac;
use crate::medium::Transmission;
use crate::wire::{LinkStateFrame, MAX_LINK_STATE_ENTRIES, ShortFrame};
use crate::{Identity, NODE_UNASSIGNED, NodeId};

/// A neighbor is dropped once its miss-counter exceeds this.
const NEIGHBOR_MISS_LIMIT: u8 = 4;
/// No-change rebroadcasts left after the last table change, so the final
/// update still fans out.
const QUIET_PERIOD: u8 = 3;
const KEEP_ALIVE_STARTUP_MS: Range<u64> = 2000..4000;
const KEEP_ALIVE_PERIOD_MS: Range<u64> = 40_000..60_000;
const ADVERTISE_PERIOD_MS: Range<u64> = 80_000..100_000;

/// One routing-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// Hop count to the destination.
    pub cost: u8,
    /// Direct neighbor the destination is reached through.
    pub next_hop: NodeId,
}

struct RoutingState {
    table: BTreeMap<NodeId, Route>,
    /// Neighbor id to keep-alive miss-counter.
    neighbors: BTreeMap<NodeId, u8>,
    quiet: u8,
}

struct Shared {
    identity: Identity,
    mac: Mac,
    state: Mutex<RoutingState>,
}

/// Handle to the routing table and its advertisement machinery.
#[derive(Clone)]
pub struct Routing {
    shared: Arc<Shared>,
}

impl Routing {
    pub fn new(identity: Identity, mac: Mac) -> Self {
        Self {
            shared: Arc::new(Shared {
                identity,
                mac,
                state: Mutex::new(RoutingState {
                    table: BTreeMap::new(),
                    neighbors: BTreeMap::new(),
                    quiet: QUIET_PERIOD,
                }),
            }),
        }
    }

    /// Next hop toward `dest`, [`NODE_UNASSIGNED`] when unroutable.
    pub fn next_hop(&self, dest: NodeId) -> NodeId {
        let state = self.shared.state.lock().unwrap();
        match state.table.get(&dest) {
            Some(route) => route.next_hop,
            None => {
                warn!("no route toward {dest}");
                NODE_UNASSIGNED
            }
        }
    }

    /// Every currently routed destination, in ascending id order.
    pub fn reachable(&self) -> Vec<NodeId> {
        self.shared.state.lock().unwrap().table.keys().copied().collect()
    }

    /// Full entry for `dest`, if routed.
    pub fn route(&self, dest: NodeId) -> Option<Route> {
        self.shared.state.lock().unwrap().table.get(&dest).copied()
    }

    pub(crate) fn table_len(&self) -> usize {
        self.shared.state.lock().unwrap().table.len()
    }

    /// A keep-alive was heard from `sender`.
    pub fn on_keep_alive(&self, sender: NodeId) {
        if self.shared.identity.assigned().is_none() {
            return;
        }
        let mut state = self.shared.state.lock().unwrap();
        state.neighbors.insert(sender, 0);
        if !state.table.contains_key(&sender) {
            debug!("new neighbor {sender}");
            state.table.insert(
                sender,
                Route {
                    cost: 1,
                    next_hop: sender,
                },
            );
            self.advertise_locked(&state);
        }
    }

    /// A link-state advertisement was heard.
    pub fn on_link_state(&self, frame: &LinkStateFrame) {
        let Some(own) = self.shared.identity.assigned() else {
            return;
        };
        let sender = frame.source;
        if sender == own {
            return;
        }

        let mut state = self.shared.state.lock().unwrap();
        let mut updated = false;

        // Destinations we routed through the sender that it no longer
        // advertises are gone.
        let advertised: Vec<NodeId> = frame.entries.iter().map(|(d, _)| *d).collect();
        let before = state.table.len();
        state
            .table
            .retain(|dest, route| route.next_hop != sender || advertised.contains(dest));
        updated |= state.table.len() != before;

        state.neighbors.insert(sender, 0);

        if !state.table.contains_key(&sender) {
            state.table.insert(
                sender,
                Route {
                    cost: 1,
                    next_hop: sender,
                },
            );
            updated = true;
        }

        for &(dest, cost) in &frame.entries {
            if dest == own {
                continue;
            }
            let via = Route {
                cost: cost.saturating_add(1),
                next_hop: sender,
            };
            // Strictly cheaper routes replace; equal cost keeps the
            // incumbent for stability.
            let install = match state.table.get(&dest) {
                None => true,
                Some(current) => via.cost < current.cost,
            };
            if install {
                state.table.insert(dest, via);
                updated = true;
            }
        }

        if updated {
            trace!("table updated from {sender}: {:?}", state.table);
            state.quiet = QUIET_PERIOD;
            self.advertise_locked(&state);
        } else if state.quiet > 0 {
            state.quiet -= 1;
            self.advertise_locked(&state);
        }
    }

    /// Broadcast the current table unconditionally.
    pub fn advertise(&self) {
        let state = self.shared.state.lock().unwrap();
        self.advertise_locked(&state);
    }

    fn advertise_locked(&self, state: &RoutingState) {
        let Some(own) = self.shared.identity.assigned() else {
            return;
        };
        let mut entries = Vec::with_capacity(state.table.len() + 1);
        entries.push((own, 0));
        entries.extend(state.table.iter().map(|(dest, route)| (*dest, route.cost)));
        if entries.len() > MAX_LINK_STATE_ENTRIES {
            warn!(
                "advertisement truncated to {MAX_LINK_STATE_ENTRIES} of {} entries",
                entries.len()
            );
            entries.truncate(MAX_LINK_STATE_ENTRIES);
        }
        let frame = LinkStateFrame {
            source: own,
            entries,
        };
        self.shared
            .mac
            .enqueue_background(Transmission::Data(frame.encode().to_vec()));
    }

    fn emit_keep_alive(&self) {
        let Some(own) = self.shared.identity.assigned() else {
            return;
        };
        let short = ShortFrame::KeepAlive(own).encode();
        self.shared
            .mac
            .enqueue_background(Transmission::DataShort(short));
    }

    /// One keep-alive period elapsed: assert our own liveness, age every
    /// neighbor, and drop the ones that stayed silent too long together
    /// with everything routed through them.
    pub(crate) fn keep_alive_tick(&self) {
        self.emit_keep_alive();

        let mut state = self.shared.state.lock().unwrap();
        for counter in state.neighbors.values_mut() {
            *counter = counter.saturating_add(1);
        }
        let dead: Vec<NodeId> = state
            .neighbors
            .iter()
            .filter(|&(_, counter)| *counter > NEIGHBOR_MISS_LIMIT)
            .map(|(id, _)| *id)
            .collect();
        if dead.is_empty() {
            return;
        }
        for id in &dead {
            state.neighbors.remove(id);
        }
        state
            .table
            .retain(|dest, route| !dead.contains(dest) && !dead.contains(&route.next_hop));
        warn!(
            "neighbors {dead:?} went silent, {} destinations remain",
            state.table.len()
        );
        self.advertise_locked(&state);
    }

    /// Keep-alive ticker: one early emission, then a fixed period drawn
    /// once.
    pub(crate) async fn keep_alive_task(self) {
        let startup = rand::rng().random_range(KEEP_ALIVE_STARTUP_MS);
        sleep(Duration::from_millis(startup)).await;
        self.emit_keep_alive();

        let period = Duration::from_millis(rand::rng().random_range(KEEP_ALIVE_PERIOD_MS));
        loop {
            sleep(period).await;
            self.keep_alive_tick();
        }
    }

    /// Unconditional periodic advertiser.
    pub(crate) async fn advertise_task(self) {
        loop {
            self.advertise();
            let wait = rand::rng().random_range(ADVERTISE_PERIOD_MS);
            sleep(Duration::from_millis(wait)).await;
        }
    }

    #[cfg(test)]
    fn direct_neighbors(&self) -> Vec<NodeId> {
        let state = self.shared.state.lock().unwrap();
        state.neighbors.keys().copied().collect()
    }
}
