//! Tag-stream codec for the framing-server byte protocol.
//!
//! Every message starts with a one-byte tag. Control tags stand alone;
//! the two payload tags (`DATA`, `DATA_SHORT`) are followed by a length
//! byte and that many payload bytes. The decoder is a push-style state
//! machine fed with whatever the socket produced, emitting complete
//! events as they materialize; a message may arrive split across any
//! number of reads.

use super::MediumEvent;

const TAG_FREE: u8 = 0x01;
const TAG_BUSY: u8 = 0x02;
const TAG_DATA: u8 = 0x03;
const TAG_SENDING: u8 = 0x04;
const TAG_DONE_SENDING: u8 = 0x05;
const TAG_DATA_SHORT: u8 = 0x06;
const TAG_END: u8 = 0x08;
const TAG_HELLO: u8 = 0x09;
const TAG_TOKEN_ACCEPTED: u8 = 0x0A;
const TAG_TOKEN_REJECTED: u8 = 0x0B;

const TAG_CONNECT: u8 = 0x09;
const TAG_TOKEN: u8 = 0x0A;

#[derive(Debug)]
enum State {
    Idle,
    Len { short: bool },
    Body { short: bool, len: usize, buf: Vec<u8> },
}

/// Incremental decoder for the inbound tag stream.
#[derive(Debug)]
pub struct Decoder {
    state: State,
}

impl Decoder {
    pub fn new() -> Self {
        Self { state: State::Idle }
    }

    /// Feed raw socket bytes, appending every completed event to `out`.
    /// Unknown tags are skipped.
    pub fn feed(&mut self, bytes: &[u8], out: &mut Vec<MediumEvent>) {
        for &b in bytes {
            match &mut self.state {
                State::Idle => match b {
                    TAG_HELLO => out.push(MediumEvent::Hello),
                    TAG_FREE => out.push(MediumEvent::Free),
                    TAG_BUSY => out.push(MediumEvent::Busy),
                    TAG_SENDING => out.push(MediumEvent::Sending),
                    TAG_DONE_SENDING => out.push(MediumEvent::DoneSending),
                    TAG_END => out.push(MediumEvent::End),
                    TAG_TOKEN_ACCEPTED => out.push(MediumEvent::TokenAccepted),
                    TAG_TOKEN_REJECTED => out.push(MediumEvent::TokenRejected),
                    TAG_DATA => self.state = State::Len { short: false },
                    TAG_DATA_SHORT => self.state = State::Len { short: true },
                    _ => {}
                },
                State::Len { short } => {
                    let short = *short;
                    let len = b as usize;
                    if len == 0 {
                        out.push(Self::payload_event(short, Vec::new()));
                        self.state = State::Idle;
                    } else {
                        self.state = State::Body {
                            short,
                            len,
                            buf: Vec::with_capacity(len),
                        };
                    }
                }
                State::Body { short, len, buf } => {
                    buf.push(b);
                    if buf.len() == *len {
                        let event = Self::payload_event(*short, std::mem::take(buf));
                        out.push(event);
                        self.state = State::Idle;
                    }
                }
            }
        }
    }

    fn payload_event(short: bool, buf: Vec<u8>) -> MediumEvent {
        if short {
            MediumEvent::DataShort(buf)
        } else {
            MediumEvent::Data(buf)
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a DATA transmission for the server.
pub fn encode_data(payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= u8::MAX as usize);
    let mut buf = Vec::with_capacity(payload.len() + 2);
    buf.push(TAG_DATA);
    buf.push(payload.len() as u8);
    buf.extend_from_slice(payload);
    buf
}

/// Encode a DATA_SHORT transmission for the server.
pub fn encode_data_short(payload: [u8; 2]) -> Vec<u8> {
    vec![TAG_DATA_SHORT, 2, payload[0], payload[1]]
}

/// Encode the CONNECT message carrying the 24-bit tuning frequency.
pub fn encode_connect(frequency: u32) -> [u8; 4] {
    [
        TAG_CONNECT,
        (frequency >> 16) as u8,
        (frequency >> 8) as u8,
        frequency as u8,
    ]
}

/// Encode the session TOKEN message.
pub fn encode_token(token: &str) -> Vec<u8> {
    let bytes = token.as_bytes();
    debug_assert!(bytes.len() <= u8::MAX as usize);
    let mut buf = Vec::with_capacity(bytes.len() + 2);
    buf.push(TAG_TOKEN);
    buf.push(bytes.len() as u8);
    buf.extend_from_slice(bytes);
    buf
}
