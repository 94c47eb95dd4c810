//! MAC arbitration for the shared half-duplex medium.
//!
//! Three senders share the egress, in descending urgency: an ACK sender,
//! a normal sender implementing stop-and-wait for user-data fragments,
//! and a background sender for link-state, addressing, and keep-alive
//! traffic. All of them defer to the channel busy/free signal relayed by
//! the receive dispatcher; the normal sender additionally holds a
//! send-grant that is consumed by each transmission and restored by an
//! incoming ACK.
//!
//! The MAC never reports failure upward. A lost fragment shows up as an
//! ACK timeout and is retransmitted indefinitely; the reliability queue
//! blocks behind it.

use std::ops::Range;
use std::sync::{Arc, Mutex};

use log::{debug, trace};
use rand::Rng;
use tokio::sync::{Notify, mpsc, watch};
use tokio::time::{Duration, sleep};

use crate::NodeId;
use crate::medium::{MediumHandle, Transmission};
use crate::wire::{DataFrame, ShortFrame};

/// Initial exponential-backoff window.
const BACKOFF_START_MS: u64 = 3000;
/// Window growth per retry.
const BACKOFF_STEP_MS: u64 = 1000;
/// Window ceiling.
const BACKOFF_CAP_MS: u64 = 15_000;
/// ACK wait after a fresh (grant-held) transmission.
const FRESH_ACK_WAIT_MS: Range<u64> = 4000..12_000;
/// ACK wait after a retransmission.
const RETRY_ACK_WAIT_MS: Range<u64> = 6000..15_000;
/// Jitter before committing background frames, spreading simultaneous
/// advertisements apart.
const BACKGROUND_JITTER_MS: Range<u64> = 150..300;
/// Grace before emitting an ACK, leaving the original sender time to
/// listen.
const ACK_DELAY_MS: u64 = 5000;

struct Grant {
    can_send: bool,
    max_backoff_ms: u64,
}

struct Shared {
    channel: watch::Sender<bool>,
    grant: Mutex<Grant>,
    acked: Notify,
    normal_tx: mpsc::Sender<DataFrame>,
    ack_tx: mpsc::UnboundedSender<NodeId>,
    background_tx: mpsc::UnboundedSender<Transmission>,
}

/// Handle to the MAC senders.
#[derive(Clone)]
pub struct Mac {
    shared: Arc<Shared>,
}

#[allow(clippy::result_unit_err)]
impl Mac {
    /// Spawn the three sender tasks over the given medium attachment.
    pub fn new(medium: MediumHandle) -> Self {
        let (channel, _) = watch::channel(true);
        // Capacity 1: one fragment in flight, one waiting. The sender
        // task only takes the next fragment once the current one is
        // acknowledged, which is what makes the series stop-and-wait.
        let (normal_tx, normal_rx) = mpsc::channel(1);
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        let (background_tx, background_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            channel,
            grant: Mutex::new(Grant {
                can_send: false,
                max_backoff_ms: BACKOFF_START_MS,
            }),
            acked: Notify::new(),
            normal_tx,
            ack_tx,
            background_tx,
        });

        let free = shared.channel.subscribe();
        tokio::spawn(normal_sender(
            shared.clone(),
            medium.clone(),
            normal_rx,
            free,
        ));
        let free = shared.channel.subscribe();
        tokio::spawn(background_sender(medium.clone(), background_rx, free));
        tokio::spawn(ack_sender(medium, ack_rx));

        Self { shared }
    }

    /// Record the channel state relayed by the receive dispatcher.
    pub fn set_channel(&self, free: bool) {
        self.shared.channel.send_replace(free);
    }

    /// Hand the next in-flight fragment to the normal sender. Blocks
    /// while a fragment is already in flight and another is waiting.
    pub async fn enqueue_normal(&self, frame: DataFrame) -> Result<(), ()> {
        self.shared.normal_tx.send(frame).await.map_err(drop)
    }

    /// Queue an ACK for the named node's transmission.
    pub fn enqueue_ack(&self, to: NodeId) {
        let _ = self.shared.ack_tx.send(to);
    }

    /// Queue a routing/addressing/keep-alive frame.
    pub fn enqueue_background(&self, t: Transmission) {
        let _ = self.shared.background_tx.send(t);
    }

    /// The next normal fragment opens a new series: hold the send-grant
    /// and clear backoff state.
    pub fn arm_first(&self) {
        let mut grant = self.shared.grant.lock().unwrap();
        grant.can_send = true;
        grant.max_backoff_ms = BACKOFF_START_MS;
    }

    /// The in-flight fragment was acknowledged: restore the grant, reset
    /// backoff, and release the normal sender.
    pub fn ack_received(&self) {
        {
            let mut grant = self.shared.grant.lock().unwrap();
            grant.can_send = true;
            grant.max_backoff_ms = BACKOFF_START_MS;
        }
        self.shared.acked.notify_waiters();
    }
}

async fn wait_channel_free(free: &mut watch::Receiver<bool>) {
    loop {
        if *free.borrow_and_update() {
            return;
        }
        if free.changed().await.is_err() {
            return;
        }
    }
}

async fn normal_sender(
    shared: Arc<Shared>,
    medium: MediumHandle,
    mut rx: mpsc::Receiver<DataFrame>,
    mut free: watch::Receiver<bool>,
) {
    while let Some(frame) = rx.recv().await {
        let bytes = frame.encode();
        loop {
            wait_channel_free(&mut free).await;

            // A held grant marks a fresh attempt: back off inside the
            // current window before claiming the channel, and widen the
            // window for the next retry.
            let window = {
                let mut grant = shared.grant.lock().unwrap();
                if grant.can_send {
                    let w = grant.max_backoff_ms;
                    if grant.max_backoff_ms < BACKOFF_CAP_MS {
                        grant.max_backoff_ms += BACKOFF_STEP_MS;
                    }
                    Some(w)
                } else {
                    None
                }
            };
            if let Some(w) = window {
                let pause = rand::rng().random_range(0..w);
                sleep(Duration::from_millis(pause)).await;
            }

            let ack_wait = if window.is_some() {
                shared.grant.lock().unwrap().can_send = false;
                rand::rng().random_range(FRESH_ACK_WAIT_MS)
            } else {
                rand::rng().random_range(RETRY_ACK_WAIT_MS)
            };

            // Register for the ACK before the frame can possibly be
            // answered.
            let acked = shared.acked.notified();
            tokio::pin!(acked);
            acked.as_mut().enable();

            if medium
                .transmit(Transmission::Data(bytes.clone()))
                .await
                .is_err()
            {
                return;
            }

            tokio::select! {
                _ = &mut acked => {
                    trace!(
                        "fragment {}/{} for {} acked",
                        frame.seq, frame.fragments, frame.dest
                    );
                    break;
                }
                _ = sleep(Duration::from_millis(ack_wait)) => {
                    debug!(
                        "no ACK for fragment {}/{} for {}, retransmitting",
                        frame.seq, frame.fragments, frame.dest
                    );
                }
            }
        }
    }
}

async fn background_sender(
    medium: MediumHandle,
    mut rx: mpsc::UnboundedReceiver<Transmission>,
    mut free: watch::Receiver<bool>,
) {
    while let Some(t) = rx.recv().await {
        wait_channel_free(&mut free).await;
        let jitter = rand::rng().random_range(BACKGROUND_JITTER_MS);
        sleep(Duration::from_millis(jitter)).await;
        if medium.transmit(t).await.is_err() {
            return;
        }
    }
}

async fn ack_sender(medium: MediumHandle, mut rx: mpsc::UnboundedReceiver<NodeId>) {
    while let Some(to) = rx.recv().await {
        sleep(Duration::from_millis(ACK_DELAY_MS)).await;
        trace!("acknowledging transmission of {to}");
        let short = ShortFrame::Ack(to).encode();
        if medium.transmit(Transmission::DataShort(short)).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio::time::{Instant, timeout};

    fn rig() -> (Mac, mpsc::Receiver<Transmission>) {
        let (tx, rx) = mpsc::channel(64);
        (Mac::new(MediumHandle::new(tx)), rx)
    }

    fn fragment(seq: u8) -> DataFrame {
        DataFrame {
            fragments: 2,
            next_hop: 7,
            source: 5,
            dest: 7,
            seq,
            prev_hop: 5,
            nonce: (0x11, 0x22),
            payload: vec![b'x'; 4],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ack_sender_waits_before_emitting() {
        let (mac, mut medium) = rig();
        let start = Instant::now();
        mac.enqueue_ack(5);
        let t = medium.recv().await.unwrap();
        assert_eq!(t, Transmission::DataShort([0x00, 5]));
        assert!(start.elapsed() >= Duration::from_millis(ACK_DELAY_MS));
    }

    #[tokio::test(start_paused = true)]
    async fn normal_sender_is_stop_and_wait() {
        let (mac, mut medium) = rig();
        let f1 = fragment(1);
        let f2 = fragment(2);
        mac.arm_first();
        mac.enqueue_normal(f1.clone()).await.unwrap();
        mac.enqueue_normal(f2.clone()).await.unwrap();

        // The first fragment goes out and, while unacknowledged, is only
        // ever retransmitted; the second stays queued.
        let t1 = medium.recv().await.unwrap();
        assert_eq!(t1, Transmission::Data(f1.encode()));
        let t2 = medium.recv().await.unwrap();
        assert_eq!(t2, Transmission::Data(f1.encode()));

        mac.ack_received();
        loop {
            let t = medium.recv().await.unwrap();
            if t == Transmission::Data(f2.encode()) {
                break;
            }
            assert_eq!(t, Transmission::Data(f1.encode()));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn busy_channel_blocks_background_sends() {
        let (mac, mut medium) = rig();
        mac.set_channel(false);
        mac.enqueue_background(Transmission::DataShort([0xC0, 3]));
        assert!(
            timeout(Duration::from_secs(60), medium.recv())
                .await
                .is_err()
        );
        mac.set_channel(true);
        let t = medium.recv().await.unwrap();
        assert_eq!(t, Transmission::DataShort([0xC0, 3]));
    }
}
