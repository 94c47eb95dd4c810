//! The medium attachment.
//!
//! Nodes do not own the radio. They attach to an external framing server
//! that models the shared half-duplex medium: it signals channel
//! busy/free and transports opaque DATA / DATA_SHORT frames between
//! every node tuned to the same frequency. This module covers only that
//! contract: [`codec`] is the pure tag-stream byte protocol, [`client`]
//! the TCP attachment running it.
//!
//! The rest of the stack talks to the medium through a [`MediumHandle`]
//! (outbound transmissions) and a channel of [`MediumEvent`]s (inbound),
//! which is also the seam the integration tests replace with an
//! in-memory hub.

use tokio::sync::mpsc;

pub mod client;
pub mod codec;

/// Events delivered by the framing server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediumEvent {
    Hello,
    /// The channel went free; transmissions may proceed.
    Free,
    /// The channel is occupied by another transmission.
    Busy,
    /// A full-size frame overheard on the medium.
    Data(Vec<u8>),
    Sending,
    DoneSending,
    /// A 2-byte frame overheard on the medium.
    DataShort(Vec<u8>),
    /// The server is terminating the session.
    End,
    TokenAccepted,
    TokenRejected,
}

/// Outbound transmissions handed to the framing server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transmission {
    Data(Vec<u8>),
    DataShort([u8; 2]),
}

/// Cloneable sending half of a medium attachment.
#[derive(Debug, Clone)]
pub struct MediumHandle {
    tx: mpsc::Sender<Transmission>,
}

#[allow(clippy::result_unit_err)]
impl MediumHandle {
    /// Wrap the sending side of an attachment. [`client::connect`]
    /// produces one for the real server; tests build their own around an
    /// in-memory hub.
    pub fn new(tx: mpsc::Sender<Transmission>) -> Self {
        Self { tx }
    }

    /// Commit a frame to the medium. Fails only once the attachment is
    /// gone.
    pub async fn transmit(&self, t: Transmission) -> Result<(), ()> {
        self.tx.send(t).await.map_err(drop)
    }
}
