//! Multi-node scenarios over an in-memory medium hub.
//!
//! The hub honors the framing-server contract the stack is written
//! against: every committed transmission is surrounded by BUSY/FREE at
//! all other attached nodes, and only nodes sharing a link hear each
//! other. Attachment is lazy, like powering a radio on: a node hears
//! nothing transmitted before it attached. Tests run under a paused
//! clock, so the stack's multi-second protocol timers elapse instantly
//! and in a deterministic order.
//!
//! One extra attachment acts as a scripted seeder: while a node is in
//! its listen window the seeder transmits reply frames advertising
//! every identifier except the one the scenario assigns, so the node
//! claims that identifier through the ordinary reply path and the
//! scenarios stay deterministic. Later joiners get identifiers above
//! 28, outside the truncated gossip answers of already-assigned nodes.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::time::{Duration, sleep, timeout};

use susurrus::medium::{MediumEvent, MediumHandle, Transmission};
use susurrus::wire::{
    AddressingFlag, AddressingFrame, Frame, MAX_KNOWN_ADDRESSES, de_frame,
};
use susurrus::{ChatEvent, ChatStack, MAX_NODE_ID, NodeId, StackHandle};

/// One attachment as handed to a node.
type Attachment = (MediumHandle, mpsc::Receiver<MediumEvent>);

struct TestHub {
    taps: Arc<Mutex<HashMap<usize, mpsc::Sender<MediumEvent>>>>,
    agg_tx: mpsc::Sender<(usize, Transmission)>,
}

/// Build a hub whose audibility graph is `links`. Returns the hub plus
/// an observer log of every transmission, tagged with the index of the
/// node that committed it.
fn hub(links: &[(usize, usize)]) -> (TestHub, mpsc::UnboundedReceiver<(usize, Transmission)>) {
    let links: HashSet<(usize, usize)> = links
        .iter()
        .flat_map(|&(a, b)| [(a, b), (b, a)])
        .collect();
    let taps: Arc<Mutex<HashMap<usize, mpsc::Sender<MediumEvent>>>> =
        Arc::new(Mutex::new(HashMap::new()));
    let (observer_tx, observer_rx) = mpsc::unbounded_channel();
    let (agg_tx, mut agg_rx) = mpsc::channel::<(usize, Transmission)>(64);

    let hub_taps = taps.clone();
    tokio::spawn(async move {
        while let Some((from, t)) = agg_rx.recv().await {
            let _ = observer_tx.send((from, t.clone()));
            let audible: Vec<mpsc::Sender<MediumEvent>> = {
                let taps = hub_taps.lock().unwrap();
                taps.iter()
                    .filter(|(i, _)| **i != from && links.contains(&(from, **i)))
                    .map(|(_, tap)| tap.clone())
                    .collect()
            };
            for tap in audible {
                let event = match &t {
                    Transmission::Data(bytes) => MediumEvent::Data(bytes.clone()),
                    Transmission::DataShort(bytes) => MediumEvent::DataShort(bytes.to_vec()),
                };
                let _ = tap.send(MediumEvent::Busy).await;
                let _ = tap.send(event).await;
                let _ = tap.send(MediumEvent::Free).await;
            }
        }
    });

    (TestHub { taps, agg_tx }, observer_rx)
}

impl TestHub {
    /// Power on node `i`: from here on it hears the linked medium.
    fn attach(&self, i: usize) -> Attachment {
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<Transmission>(16);
        let agg = self.agg_tx.clone();
        tokio::spawn(async move {
            while let Some(t) = cmd_rx.recv().await {
                if agg.send((i, t)).await.is_err() {
                    return;
                }
            }
        });
        let (event_tx, event_rx) = mpsc::channel(1024);
        self.taps.lock().unwrap().insert(i, event_tx);
        (MediumHandle::new(cmd_tx), event_rx)
    }
}

fn spawn_node(attachment: Attachment) -> (StackHandle, mpsc::Receiver<ChatEvent>) {
    let (medium, events) = attachment;
    let (chat_tx, chat_rx) = mpsc::channel(64);
    let stack = ChatStack::new(medium, events, chat_tx);
    let handle = stack.handle();
    tokio::spawn(stack.run());
    (handle, chat_rx)
}

/// Advertise every identifier except `id` as already claimed, leaving
/// the listening node exactly one to pick. The set does not fit one
/// envelope, so it goes out in chunks.
async fn seed_identity(seeder: &MediumHandle, id: NodeId) {
    let known: Vec<NodeId> = (1..=MAX_NODE_ID).filter(|&n| n != id).collect();
    for chunk in known.chunks(MAX_KNOWN_ADDRESSES) {
        let frame = AddressingFrame {
            flag: AddressingFlag::Reply,
            source: chunk[0],
            known: chunk.to_vec(),
        };
        let _ = seeder
            .transmit(Transmission::Data(frame.encode().to_vec()))
            .await;
    }
}

async fn wait_for(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..600 {
        if cond() {
            return;
        }
        sleep(Duration::from_secs(1)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn wait_message(chat_rx: &mut mpsc::Receiver<ChatEvent>) -> (NodeId, Vec<u8>) {
    timeout(Duration::from_secs(600), async {
        loop {
            match chat_rx.recv().await {
                Some(ChatEvent::Message { from, text }) => return (from, text),
                Some(_) => {}
                None => panic!("chat event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for a delivery")
}

#[tokio::test(start_paused = true)]
async fn two_node_whisper() {
    const ID_A: NodeId = 5;
    const ID_B: NodeId = 29;

    // Nodes 0 and 1, seeder 2 audible to both.
    let (hub, mut observer) = hub(&[(0, 1), (2, 0), (2, 1)]);
    let (seeder, seeder_events) = hub.attach(2);
    drop(seeder_events);

    let (a, _a_chat) = spawn_node(hub.attach(0));
    seed_identity(&seeder, ID_A).await;
    wait_for("first node's identifier", || a.local_id() == Some(ID_A)).await;
    let (b, mut b_chat) = spawn_node(hub.attach(1));
    seed_identity(&seeder, ID_B).await;
    wait_for("second node's identifier", || b.local_id() == Some(ID_B)).await;

    wait_for("route toward the second node", || {
        a.reachable().contains(&ID_B)
    })
    .await;

    a.whisper(ID_B, b"hello world").unwrap();
    let (from, text) = wait_message(&mut b_chat).await;
    assert_eq!(from, ID_A);
    assert_eq!(text, b"hello world");

    // A two-fragment message: 29 bytes splits 23 + 6.
    let long = b"hello again, this is longer!!";
    a.whisper(ID_B, long).unwrap();
    let (from, text) = wait_message(&mut b_chat).await;
    assert_eq!(from, ID_A);
    assert_eq!(text, long);

    // Replay the medium log.
    let mut log = Vec::new();
    while let Ok(entry) = observer.try_recv() {
        log.push(entry);
    }

    // The first fragment node A committed carries the headers of a
    // fresh single-fragment series.
    let first = log
        .iter()
        .find_map(|(from, t)| match t {
            Transmission::Data(bytes) if *from == 0 => match de_frame(bytes) {
                Some(Frame::Data(f)) => Some((bytes.clone(), f)),
                _ => None,
            },
            _ => None,
        })
        .expect("node A committed a fragment");
    let (bytes, fragment) = first;
    assert_eq!(bytes[0], 0x81);
    assert_eq!(bytes[1] as usize, bytes.len());
    assert_eq!(fragment.next_hop, ID_B);
    assert_eq!(fragment.source, ID_A);
    assert_eq!(fragment.dest, ID_B);
    assert_eq!(fragment.seq, 1);
    assert_eq!(fragment.prev_hop, ID_A);
    assert_eq!(fragment.payload, b"hello world");

    // B acknowledged A's transmissions with `00 <id A>`.
    assert!(
        log.iter()
            .any(|(from, t)| *from == 1 && *t == Transmission::DataShort([0x00, ID_A])),
        "expected an ACK naming node A"
    );

    // Stop-and-wait: the second fragment of the long message only hits
    // the medium after ACKs for both preceding fragments.
    let pos_seq2 = log
        .iter()
        .position(|(from, t)| {
            *from == 0
                && matches!(
                    t,
                    Transmission::Data(bytes)
                        if matches!(de_frame(bytes), Some(Frame::Data(f)) if f.seq == 2)
                )
        })
        .expect("second fragment was transmitted");
    let acks_before = log[..pos_seq2]
        .iter()
        .filter(|(from, t)| *from == 1 && *t == Transmission::DataShort([0x00, ID_A]))
        .count();
    assert!(
        acks_before >= 2,
        "fragment 2 went out after {acks_before} ACKs"
    );
}

#[tokio::test(start_paused = true)]
async fn three_node_relay() {
    const ID_A: NodeId = 2;
    const ID_R: NodeId = 29;
    const ID_B: NodeId = 30;

    // A - R - B in a line; A and B cannot hear each other. Seeder 3
    // reaches everyone.
    let (hub, mut observer) = hub(&[(0, 1), (1, 2), (3, 0), (3, 1), (3, 2)]);
    let (seeder, seeder_events) = hub.attach(3);
    drop(seeder_events);

    let (a, _a_chat) = spawn_node(hub.attach(0));
    seed_identity(&seeder, ID_A).await;
    wait_for("A's identifier", || a.local_id() == Some(ID_A)).await;
    let (r, _r_chat) = spawn_node(hub.attach(1));
    seed_identity(&seeder, ID_R).await;
    wait_for("R's identifier", || r.local_id() == Some(ID_R)).await;
    let (b, mut b_chat) = spawn_node(hub.attach(2));
    seed_identity(&seeder, ID_B).await;
    wait_for("B's identifier", || b.local_id() == Some(ID_B)).await;

    wait_for("A to learn a route toward B", || {
        a.reachable().contains(&ID_B)
    })
    .await;

    a.whisper(ID_B, b"HI").unwrap();
    let (from, text) = wait_message(&mut b_chat).await;
    assert_eq!(from, ID_A);
    assert_eq!(text, b"HI");

    let mut log = Vec::new();
    while let Ok(entry) = observer.try_recv() {
        log.push(entry);
    }

    // A addressed the relay, not the destination.
    let from_a = log
        .iter()
        .find_map(|(from, t)| match t {
            Transmission::Data(bytes) if *from == 0 => match de_frame(bytes) {
                Some(Frame::Data(f)) if f.payload == b"HI" => Some(f),
                _ => None,
            },
            _ => None,
        })
        .expect("A committed the fragment");
    assert_eq!(from_a.next_hop, ID_R);
    assert_eq!(from_a.prev_hop, ID_A);

    // The relay rewrote both hop bytes and kept the endpoints.
    let relayed = log
        .iter()
        .find_map(|(from, t)| match t {
            Transmission::Data(bytes) if *from == 1 => match de_frame(bytes) {
                Some(Frame::Data(f)) if f.payload == b"HI" => Some(f),
                _ => None,
            },
            _ => None,
        })
        .expect("R relayed the fragment");
    assert_eq!(relayed.source, ID_A);
    assert_eq!(relayed.dest, ID_B);
    assert_eq!(relayed.next_hop, ID_B);
    assert_eq!(relayed.prev_hop, ID_R);
    assert_eq!(relayed.nonce, from_a.nonce);

    // Hop-by-hop ACKs: R acked A, B acked R.
    assert!(
        log.iter()
            .any(|(from, t)| *from == 1 && *t == Transmission::DataShort([0x00, ID_A]))
    );
    assert!(
        log.iter()
            .any(|(from, t)| *from == 2 && *t == Transmission::DataShort([0x00, ID_R]))
    );
}

#[tokio::test(start_paused = true)]
async fn broadcast_reaches_direct_and_relayed_destinations() {
    const ID_A: NodeId = 2;
    const ID_R: NodeId = 29;
    const ID_B: NodeId = 30;

    let (hub, _observer) = hub(&[(0, 1), (1, 2), (3, 0), (3, 1), (3, 2)]);
    let (seeder, seeder_events) = hub.attach(3);
    drop(seeder_events);

    let (a, _a_chat) = spawn_node(hub.attach(0));
    seed_identity(&seeder, ID_A).await;
    wait_for("A's identifier", || a.local_id() == Some(ID_A)).await;
    let (r, mut r_chat) = spawn_node(hub.attach(1));
    seed_identity(&seeder, ID_R).await;
    wait_for("R's identifier", || r.local_id() == Some(ID_R)).await;
    let (b, mut b_chat) = spawn_node(hub.attach(2));
    seed_identity(&seeder, ID_B).await;
    wait_for("B's identifier", || b.local_id() == Some(ID_B)).await;

    wait_for("A to route to both peers", || {
        let reachable = a.reachable();
        reachable.contains(&ID_R) && reachable.contains(&ID_B)
    })
    .await;

    a.broadcast(b"yo all").unwrap();

    let (from, text) = wait_message(&mut r_chat).await;
    assert_eq!((from, text.as_slice()), (ID_A, b"yo all".as_slice()));
    let (from, text) = wait_message(&mut b_chat).await;
    assert_eq!((from, text.as_slice()), (ID_A, b"yo all".as_slice()));
}
