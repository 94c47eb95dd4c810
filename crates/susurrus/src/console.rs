//! Interactive console front-end.
//!
//! Parses the chat command line (`W <id>:<text>` whispers, `B:<text>`
//! broadcasts, `ONLINE` lists the routed nodes) and renders the stack's
//! [`ChatEvent`]s. Input is consumed only once the stack reports
//! [`Lifecycle::Ready`]; anything typed earlier stays in the terminal
//! buffer.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::NodeId;
use crate::stack::{ChatEvent, Lifecycle, StackHandle};

const CYAN: &str = "\x1b[36m";
const RESET: &str = "\x1b[0m";

/// A parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Whisper { dest: NodeId, text: String },
    Broadcast { text: String },
    Online,
    Invalid,
}

/// Parse one input line. Unparseable lines are `Invalid`, never an
/// error; the chat loop survives anything.
pub fn parse_command(line: &str) -> Command {
    if let Some(rest) = line.strip_prefix("W ") {
        if let Some((dest, text)) = rest.split_once(':') {
            if let Ok(dest) = dest.trim().parse::<NodeId>() {
                return Command::Whisper {
                    dest,
                    text: text.trim_start().to_string(),
                };
            }
        }
        Command::Invalid
    } else if let Some(text) = line.strip_prefix("B:") {
        Command::Broadcast {
            text: text.to_string(),
        }
    } else if line.starts_with("ONLINE") {
        Command::Online
    } else {
        Command::Invalid
    }
}

/// Drive stdin and the event channel until either closes.
pub async fn run(handle: StackHandle, mut chat_rx: mpsc::Receiver<ChatEvent>) {
    let mut lifecycle = handle.lifecycle();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let ready = *lifecycle.borrow_and_update() == Lifecycle::Ready;
        tokio::select! {
            event = chat_rx.recv() => match event {
                Some(event) => render(event),
                None => return,
            },
            changed = lifecycle.changed(), if !ready => {
                if changed.is_err() {
                    return;
                }
            }
            line = lines.next_line(), if ready => match line {
                Ok(Some(line)) => dispatch(&handle, &line),
                Ok(None) | Err(_) => return,
            },
        }
    }
}

fn dispatch(handle: &StackHandle, line: &str) {
    match parse_command(line) {
        Command::Whisper { dest, text } if !text.is_empty() => {
            if let Err(e) = handle.whisper(dest, text.as_bytes()) {
                println!("{e}");
            }
        }
        Command::Broadcast { text } if !text.is_empty() => {
            if let Err(e) = handle.broadcast(text.as_bytes()) {
                println!("{e}");
            }
        }
        // Empty message; nothing to send.
        Command::Whisper { .. } | Command::Broadcast { .. } => {}
        Command::Online => {
            println!("Nodes in the network:");
            for id in handle.reachable() {
                println!("{id}");
            }
        }
        Command::Invalid => {
            println!(
                "Invalid command. Please start your message with 'W <id>:' or 'B:', or type 'ONLINE'."
            );
        }
    }
}

fn render(event: ChatEvent) {
    match event {
        ChatEvent::AddressAssigned(id) => {
            println!("You got identification number {id} in the chat!");
            println!("Please wait for the network to stabilize!");
        }
        ChatEvent::Ready { reachable } => {
            println!("You can chat now!");
            println!(
                "Please write 'W <receiver>:<your message>' to whisper, \
                 'B:<your message>' to broadcast, or 'ONLINE' to see who is reachable."
            );
            println!("You can send messages to:");
            for id in reachable {
                println!("{id}");
            }
        }
        ChatEvent::Message { from, text } => {
            println!(
                "Message from {from}: {CYAN}{}{RESET}",
                String::from_utf8_lossy(&text)
            );
        }
    }
}
