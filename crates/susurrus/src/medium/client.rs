//! TCP attachment to the framing server.
//!
//! [`connect`] opens the socket, performs the CONNECT + TOKEN session
//! handshake, and leaves two workers behind: a reader feeding the tag
//! decoder and a writer draining the transmission queue. The attachment
//! ends when either side of the socket does; the stack observes that as
//! its event channel closing.

use std::io;

use log::{error, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;

use super::codec::{self, Decoder};
use super::{MediumEvent, MediumHandle, Transmission};

const EVENT_QUEUE: usize = 256;
const TRANSMIT_QUEUE: usize = 32;

/// Attach to the framing server at `addr`, tuning to `frequency` and
/// presenting `token`.
pub async fn connect(
    addr: &str,
    frequency: u32,
    token: &str,
) -> io::Result<(MediumHandle, mpsc::Receiver<MediumEvent>)> {
    let mut sock = TcpStream::connect(addr).await?;
    sock.write_all(&codec::encode_connect(frequency)).await?;
    sock.write_all(&codec::encode_token(token)).await?;
    info!("attached to framing server at {addr}, frequency {frequency}");

    let (rx_half, tx_half) = sock.into_split();
    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);
    let (cmd_tx, cmd_rx) = mpsc::channel(TRANSMIT_QUEUE);

    tokio::spawn(rx_worker(rx_half, event_tx));
    tokio::spawn(tx_worker(tx_half, cmd_rx));

    Ok((MediumHandle::new(cmd_tx), event_rx))
}

async fn rx_worker(mut sock: OwnedReadHalf, events: mpsc::Sender<MediumEvent>) {
    let mut decoder = Decoder::new();
    let mut raw = [0u8; 1024];
    let mut out = Vec::new();
    loop {
        let ct = match sock.read(&mut raw).await {
            Ok(0) => {
                warn!("framing server closed the connection");
                return;
            }
            Ok(ct) => ct,
            Err(e) => {
                error!("socket error from framing server: {e}");
                return;
            }
        };
        decoder.feed(&raw[..ct], &mut out);
        for event in out.drain(..) {
            if events.send(event).await.is_err() {
                // Stack is gone; nothing left to deliver to.
                return;
            }
        }
    }
}

async fn tx_worker(mut sock: OwnedWriteHalf, mut cmds: mpsc::Receiver<Transmission>) {
    while let Some(t) = cmds.recv().await {
        let bytes = match t {
            Transmission::Data(payload) => codec::encode_data(&payload),
            Transmission::DataShort(payload) => codec::encode_data_short(payload),
        };
        if let Err(e) = sock.write_all(&bytes).await {
            error!("failed to write to framing server: {e}");
            return;
        }
    }
    warn!("closing medium attachment");
}
