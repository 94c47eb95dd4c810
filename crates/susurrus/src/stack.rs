//! The chat stack.
//!
//! [`ChatStack`] is the core of susurrus: it owns one medium attachment
//! and wires the subsystems together, MAC arbitration at the bottom,
//! addressing and routing beside it, reliability and chunking above. Its
//! [`run`] future is the receive dispatcher, demultiplexing medium
//! events to the subsystems until the framing server says END (clean
//! shutdown) or disappears (an error).
//!
//! A [`StackHandle`] is the front-end surface: queue a whisper or a
//! broadcast, list reachable nodes, watch the lifecycle. Received
//! messages and milestones arrive as [`ChatEvent`]s on the channel
//! injected at construction.
//!
//! [`run`]: ChatStack::run

use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, sleep};

use crate::addressing::Addressing;
use crate::chunker::{Chunker, SendError};
use crate::mac::Mac;
use crate::medium::{MediumEvent, MediumHandle};
use crate::reassembly::Reassembler;
use crate::reliability::Reliability;
use crate::routing::Routing;
use crate::wire::{Frame, ShortFrame, de_frame};
use crate::{Identity, NodeId};

/// The routing bootstrap keeps advertising at this period until the
/// table is big enough to chat.
const BOOTSTRAP_PERIOD: Duration = Duration::from_secs(15);
/// Table size at which the network counts as stabilized.
const BOOTSTRAP_TARGET: usize = 3;

/// Startup progression. User input is consumed only in `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Lifecycle {
    /// No identifier yet; the addressing exchange is running.
    AddressPending,
    /// Identifier assigned; waiting for the routing table to fill.
    RoutingBootstrapping,
    /// Stabilized; the chat loop may run.
    Ready,
}

/// Milestones and deliveries for the front-end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// We claimed an identifier.
    AddressAssigned(NodeId),
    /// The routing table stabilized; chatting may start.
    Ready { reachable: Vec<NodeId> },
    /// A chunked message finished reassembly.
    Message { from: NodeId, text: Vec<u8> },
}

/// Why the stack stopped.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum StackError {
    /// The framing server went away without saying END.
    #[error("connection to the framing server was lost")]
    MediumClosed,
}

/// The wired-up protocol stack. Construct with [`ChatStack::new`], keep
/// a [`StackHandle`], then drive [`ChatStack::run`] to completion.
pub struct ChatStack {
    identity: Identity,
    mac: Mac,
    routing: Routing,
    addressing: Addressing,
    reliability: Reliability,
    chunker: Chunker,
    reassembler: Reassembler,
    events: mpsc::Receiver<MediumEvent>,
    chat_tx: mpsc::Sender<ChatEvent>,
    lifecycle: watch::Receiver<Lifecycle>,
}

/// Cloneable front-end surface of a running [`ChatStack`].
#[derive(Clone)]
pub struct StackHandle {
    identity: Identity,
    routing: Routing,
    chunker: Chunker,
    lifecycle: watch::Receiver<Lifecycle>,
}

impl ChatStack {
    /// Wire the subsystems over a medium attachment. Spawns the MAC
    /// senders, the reliability pump, and the startup supervisor;
    /// received chat traffic surfaces on `chat_tx`.
    pub fn new(
        medium: MediumHandle,
        events: mpsc::Receiver<MediumEvent>,
        chat_tx: mpsc::Sender<ChatEvent>,
    ) -> Self {
        let identity = Identity::new();
        let mac = Mac::new(medium);
        let routing = Routing::new(identity.clone(), mac.clone());
        let addressing = Addressing::new(identity.clone(), mac.clone());
        let reliability = Reliability::new(identity.clone(), mac.clone(), routing.clone());
        let chunker = Chunker::new(identity.clone(), routing.clone(), reliability.clone());

        let (lifecycle_tx, lifecycle) = watch::channel(Lifecycle::AddressPending);
        tokio::spawn(supervisor(
            addressing.clone(),
            routing.clone(),
            chat_tx.clone(),
            lifecycle_tx,
        ));

        Self {
            identity,
            mac,
            routing,
            addressing,
            reliability,
            chunker,
            reassembler: Reassembler::new(),
            events,
            chat_tx,
            lifecycle,
        }
    }

    /// Front-end surface for console loops and tests.
    pub fn handle(&self) -> StackHandle {
        StackHandle {
            identity: self.identity.clone(),
            routing: self.routing.clone(),
            chunker: self.chunker.clone(),
            lifecycle: self.lifecycle.clone(),
        }
    }

    /// The receive dispatcher. Resolves `Ok` on a clean END from the
    /// server, `Err` when the attachment dies underneath us.
    pub async fn run(mut self) -> Result<(), StackError> {
        while let Some(event) = self.events.recv().await {
            match event {
                MediumEvent::Busy => self.mac.set_channel(false),
                MediumEvent::Free => self.mac.set_channel(true),
                MediumEvent::Data(bytes) => self.on_data(&bytes).await,
                MediumEvent::DataShort(bytes) => match ShortFrame::decode(&bytes) {
                    Some(ShortFrame::Ack(id)) => self.reliability.on_ack(id),
                    Some(ShortFrame::KeepAlive(id)) => self.routing.on_keep_alive(id),
                    None => warn!("undecodable short frame ({} bytes)", bytes.len()),
                },
                MediumEvent::End => {
                    info!("framing server said END, shutting down");
                    return Ok(());
                }
                MediumEvent::Hello
                | MediumEvent::Sending
                | MediumEvent::DoneSending
                | MediumEvent::TokenAccepted
                | MediumEvent::TokenRejected => {
                    debug!("medium event {event:?}");
                }
            }
        }
        Err(StackError::MediumClosed)
    }

    async fn on_data(&mut self, bytes: &[u8]) {
        match de_frame(bytes) {
            Some(Frame::Data(frame)) => {
                let own = self.identity.get();
                if frame.next_hop != own || own == crate::NODE_UNASSIGNED {
                    // Overheard traffic between other nodes.
                    return;
                }
                // Hop-by-hop: acknowledge our upstream no matter where
                // the fragment is ultimately headed.
                self.mac.enqueue_ack(frame.prev_hop);
                if frame.dest == own {
                    if let Some(delivery) = self.reassembler.accept(&frame) {
                        let event = ChatEvent::Message {
                            from: delivery.from,
                            text: delivery.payload,
                        };
                        if self.chat_tx.send(event).await.is_err() {
                            warn!("no front-end attached, dropping delivery");
                        }
                    }
                } else {
                    self.reliability.forward(frame);
                }
            }
            Some(Frame::LinkState(frame)) => self.routing.on_link_state(&frame),
            Some(Frame::Addressing(frame)) => self.addressing.on_frame(&frame),
            None => warn!("undecodable DATA frame ({} bytes)", bytes.len()),
        }
    }
}

impl StackHandle {
    /// Our identifier, once assigned.
    pub fn local_id(&self) -> Option<NodeId> {
        self.identity.assigned()
    }

    /// Everyone we can currently route to.
    pub fn reachable(&self) -> Vec<NodeId> {
        self.routing.reachable()
    }

    /// Queue a unicast message.
    pub fn whisper(&self, dest: NodeId, text: &[u8]) -> Result<(), SendError> {
        self.chunker.whisper(dest, text)
    }

    /// Queue a broadcast, one series per reachable node.
    pub fn broadcast(&self, text: &[u8]) -> Result<(), SendError> {
        self.chunker.broadcast(text)
    }

    /// Watch the startup progression.
    pub fn lifecycle(&self) -> watch::Receiver<Lifecycle> {
        self.lifecycle.clone()
    }
}

/// Startup sequencing: acquire an identifier, run the keep-alive ticker,
/// advertise until the table stabilizes, then hand the medium cadence to
/// the long-period advertiser.
async fn supervisor(
    addressing: Addressing,
    routing: Routing,
    chat_tx: mpsc::Sender<ChatEvent>,
    lifecycle_tx: watch::Sender<Lifecycle>,
) {
    let id = addressing.run().await;
    let _ = chat_tx.send(ChatEvent::AddressAssigned(id)).await;
    lifecycle_tx.send_replace(Lifecycle::RoutingBootstrapping);

    tokio::spawn(routing.clone().keep_alive_task());

    loop {
        if routing.table_len() >= BOOTSTRAP_TARGET {
            break;
        }
        routing.advertise();
        sleep(BOOTSTRAP_PERIOD).await;
    }

    let _ = chat_tx
        .send(ChatEvent::Ready {
            reachable: routing.reachable(),
        })
        .await;
    lifecycle_tx.send_replace(Lifecycle::Ready);

    routing.advertise_task().await;
}
