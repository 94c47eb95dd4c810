use std::{env, io, process};

use log::{error, info};
use tokio::sync::mpsc;

use susurrus::medium::client;
use susurrus::{ChatStack, console};

struct Config {
    /// Framing server, host:port.
    addr: String,
    /// Tuning frequency handed to the server on CONNECT.
    frequency: u32,
    /// Session token for the frequency range.
    token: String,
}

impl Config {
    const DEFAULT_ADDR: &'static str = "netsys.ewi.utwente.nl:8954";
    const DEFAULT_FREQUENCY: u32 = 2301;

    /// Defaults, overridable by `MEDIUM_ADDR` / `MEDIUM_TOKEN` and a
    /// frequency as the first CLI argument.
    fn from_env() -> Self {
        let frequency = env::args()
            .nth(1)
            .and_then(|arg| arg.parse().ok())
            .unwrap_or(Self::DEFAULT_FREQUENCY);
        Self {
            addr: env::var("MEDIUM_ADDR").unwrap_or_else(|_| Self::DEFAULT_ADDR.into()),
            frequency,
            token: env::var("MEDIUM_TOKEN").unwrap_or_default(),
        }
    }
}

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();
    let config = Config::from_env();

    let (medium, events) = client::connect(&config.addr, config.frequency, &config.token).await?;
    info!("joining the chat on frequency {}", config.frequency);

    let (chat_tx, chat_rx) = mpsc::channel(64);
    let stack = ChatStack::new(medium, events, chat_tx);
    let handle = stack.handle();
    tokio::spawn(console::run(handle, chat_rx));

    if let Err(e) = stack.run().await {
        error!("{e}");
        process::exit(1);
    }
    Ok(())
}
