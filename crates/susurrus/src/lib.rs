#![doc = include_str!("../README.md")]

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

pub mod addressing;
pub mod chunker;
pub mod console;
pub mod mac;
pub mod medium;
pub mod reassembly;
pub mod reliability;
pub mod routing;
pub mod stack;
pub mod wire;

pub use chunker::SendError;
pub use stack::{ChatEvent, ChatStack, Lifecycle, StackError, StackHandle};

/// A node identifier on the shared medium.
///
/// Assigned identifiers occupy `1..=MAX_NODE_ID` and fit in the low five
/// bits of a byte; [`NODE_UNASSIGNED`] is the sentinel carried by nodes
/// still in the exploration phase, and doubles as "no route" in next-hop
/// lookups.
pub type NodeId = u8;

/// Sentinel for "no address yet" / "no route".
pub const NODE_UNASSIGNED: NodeId = 0;

/// Largest assignable node identifier (5-bit address space).
pub const MAX_NODE_ID: NodeId = 31;

/// Shared handle to the node's self-assigned identifier.
///
/// The addressing subsystem writes the identifier exactly once; every
/// other subsystem reads it through a clone of this handle.
#[derive(Clone, Debug, Default)]
pub struct Identity(Arc<AtomicU8>);

impl Identity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current identifier, [`NODE_UNASSIGNED`] while unassigned.
    #[inline]
    pub fn get(&self) -> NodeId {
        self.0.load(Ordering::Relaxed)
    }

    /// Identifier once assigned.
    #[inline]
    pub fn assigned(&self) -> Option<NodeId> {
        match self.get() {
            NODE_UNASSIGNED => None,
            id => Some(id),
        }
    }

    pub(crate) fn assign(&self, id: NodeId) {
        debug_assert!((1..=MAX_NODE_ID).contains(&id));
        self.0.store(id, Ordering::Relaxed);
    }
}
