//! TFTP (RFC-1350) client and server state machines (§4.M).
//!
//! File system access is a non-goal of the core; callers supply storage
//! through [`FileStore`], a read/write stream factory over the existing
//! [`crate::io::Readable`]/[`crate::io::Writeable`] abstractions rather
//! than a concrete filesystem binding.

use std::rc::Rc;

use nom::bytes::complete::{tag, take_till};
use nom::number::complete::be_u16;
use nom::IResult;

use crate::error::{Error, Result};
use crate::io::{Readable, Writeable};
use crate::time::{TimeSource, TimeVal};

pub const OP_RRQ: u16 = 1;
pub const OP_WRQ: u16 = 2;
pub const OP_DATA: u16 = 3;
pub const OP_ACK: u16 = 4;
pub const OP_ERROR: u16 = 5;

pub const ERR_UNDEFINED: u16 = 0;
pub const ERR_FILE_NOT_FOUND: u16 = 1;
pub const ERR_ACCESS_VIOLATION: u16 = 2;
pub const ERR_DISK_FULL: u16 = 3;
pub const ERR_ILLEGAL_OP: u16 = 4;
pub const ERR_UNKNOWN_TID: u16 = 5;
pub const ERR_FILE_EXISTS: u16 = 6;

/// Block payload size; the final block of a transfer is shorter, signaling
/// end-of-file.
pub const BLOCK_SIZE: usize = 512;
/// Base retry interval; the Nth retry waits `RETRY_BASE_MS * 2^N` ms.
pub const RETRY_BASE_MS: u32 = 100;
/// Maximum retries per block before the transfer fails.
pub const MAX_RETRIES: u32 = 3;

/// A decoded TFTP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Rrq { filename: String, mode: String },
    Wrq { filename: String, mode: String },
    Data { block: u16, payload: Vec<u8> },
    Ack { block: u16 },
    Error { code: u16, message: String },
}

fn parse_cstr(input: &[u8]) -> IResult<&[u8], String> {
    let (input, bytes) = take_till(|b| b == 0)(input)?;
    let (input, _) = tag(&[0u8][..])(input)?;
    Ok((input, String::from_utf8_lossy(bytes).into_owned()))
}

impl Message {
    /// Decode a TFTP message from a UDP payload.
    pub fn decode(data: &[u8]) -> Option<Self> {
        Self::decode_be(data).ok().map(|(_, msg)| msg)
    }

    fn decode_be(data: &[u8]) -> IResult<&[u8], Self> {
        let (rest, opcode) = be_u16(data)?;
        match opcode {
            OP_RRQ | OP_WRQ => {
                let (rest, filename) = parse_cstr(rest)?;
                let (rest, mode) = parse_cstr(rest)?;
                let msg = if opcode == OP_RRQ { Message::Rrq { filename, mode } } else { Message::Wrq { filename, mode } };
                Ok((rest, msg))
            }
            OP_DATA => {
                let (rest, block) = be_u16(rest)?;
                Ok((&[], Message::Data { block, payload: rest.to_vec() }))
            }
            OP_ACK => {
                let (rest, block) = be_u16(rest)?;
                Ok((rest, Message::Ack { block }))
            }
            OP_ERROR => {
                let (rest, code) = be_u16(rest)?;
                let message = parse_cstr(rest).map(|(_, m)| m).unwrap_or_default();
                Ok((&[], Message::Error { code, message }))
            }
            _ => Err(nom::Err::Error(nom::error::Error::new(rest, nom::error::ErrorKind::Switch))),
        }
    }

    /// Encode this message to a UDP payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Message::Rrq { filename, mode } | Message::Wrq { filename, mode } => {
                let opcode = if matches!(self, Message::Rrq { .. }) { OP_RRQ } else { OP_WRQ };
                out.extend_from_slice(&opcode.to_be_bytes());
                out.extend_from_slice(filename.as_bytes());
                out.push(0);
                out.extend_from_slice(mode.as_bytes());
                out.push(0);
            }
            Message::Data { block, payload } => {
                out.extend_from_slice(&OP_DATA.to_be_bytes());
                out.extend_from_slice(&block.to_be_bytes());
                out.extend_from_slice(payload);
            }
            Message::Ack { block } => {
                out.extend_from_slice(&OP_ACK.to_be_bytes());
                out.extend_from_slice(&block.to_be_bytes());
            }
            Message::Error { code, message } => {
                out.extend_from_slice(&OP_ERROR.to_be_bytes());
                out.extend_from_slice(&code.to_be_bytes());
                out.extend_from_slice(message.as_bytes());
                out.push(0);
            }
        }
        out
    }
}

/// Read/write stream factory standing in for file system access.
pub trait FileStore {
    fn open_read(&self, path: &str) -> Option<Box<dyn Readable>>;
    fn open_write(&self, path: &str) -> Option<Box<dyn Writeable>>;
}

/// Join `root` and a client-supplied `path`, rejecting any path that would
/// escape `root` via `..` segments or an absolute path.
pub fn safe_join(root: &str, path: &str) -> Option<String> {
    if path.starts_with('/') || path.starts_with('\\') {
        return None;
    }
    let mut depth: i32 = 0;
    for seg in path.split(['/', '\\']) {
        match seg {
            "" | "." => {}
            ".." => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => depth += 1,
        }
    }
    Some(format!("{root}/{path}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    /// Client is reading a file from the remote peer (RRQ).
    Download,
    /// Client is writing a file to the remote peer (WRQ).
    Upload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingAck(u16),
    AwaitingData(u16),
    Done,
    Failed,
}

/// One side of a TFTP transfer: tracks the current block, retry count,
/// and retransmit deadline. Does not own a socket; callers drive it with
/// inbound messages and poll [`Client::poll_timeout`] each tick.
pub struct Client {
    role: Role,
    phase: Phase,
    retries: u32,
    last_sent: Option<TimeVal>,
    last_payload: Vec<u8>,
}

impl Client {
    /// Start a download (RRQ already sent by the caller); the first state
    /// awaits DATA block 1.
    pub fn start_download() -> Self {
        Client { role: Role::Download, phase: Phase::AwaitingData(1), retries: 0, last_sent: None, last_payload: Vec::new() }
    }

    /// Start an upload (WRQ already sent by the caller); the first state
    /// awaits ACK block 0.
    pub fn start_upload() -> Self {
        Client { role: Role::Upload, phase: Phase::AwaitingAck(0), retries: 0, last_sent: None, last_payload: Vec::new() }
    }

    /// Record that `payload` was just transmitted, for retransmit-on-timeout.
    pub fn sent(&mut self, src: &dyn TimeSource, payload: Vec<u8>) {
        self.last_sent = Some(TimeVal::now(src));
        self.last_payload = payload;
    }

    /// True once the transfer has finished (successfully or not).
    pub fn is_done(&self) -> bool {
        matches!(self.phase, Phase::Done | Phase::Failed)
    }

    /// Check whether the current retransmit deadline has passed. Returns
    /// the payload to resend, or `None` if not yet due. Exhausting
    /// [`MAX_RETRIES`] marks the transfer failed.
    pub fn poll_timeout(&mut self, src: &dyn TimeSource) -> Option<Vec<u8>> {
        let sent = self.last_sent?;
        let deadline_usec = (RETRY_BASE_MS as u64 * 1000) << self.retries;
        if (sent.elapsed_usec(src) as u64) < deadline_usec {
            return None;
        }
        if self.retries >= MAX_RETRIES {
            self.phase = Phase::Failed;
            return None;
        }
        self.retries += 1;
        self.last_sent = Some(TimeVal::now(src));
        Some(self.last_payload.clone())
    }

    /// Process an inbound message for a download, returning the ACK to
    /// send (and the data payload, if this block completed the file).
    pub fn on_download_message(&mut self, msg: &Message) -> Result<Option<(Vec<u8>, Option<Vec<u8>>)>> {
        if self.role != Role::Download {
            return Err(Error::ProtocolViolation { label: "tftp role mismatch" });
        }
        match msg {
            Message::Data { block, payload } => {
                let expected = match self.phase {
                    Phase::AwaitingData(b) => b,
                    _ => return Err(Error::ProtocolViolation { label: "tftp unexpected data" }),
                };
                if *block != expected {
                    return Ok(None); // duplicate/out-of-order, ignore
                }
                self.retries = 0;
                let ack = Message::Ack { block: *block }.encode();
                let final_block = payload.len() < BLOCK_SIZE;
                self.phase = if final_block { Phase::Done } else { Phase::AwaitingData(block.wrapping_add(1)) };
                Ok(Some((ack, if final_block { Some(payload.clone()) } else { None })))
            }
            Message::Error { code, message } => {
                self.phase = Phase::Failed;
                Err(Error::ProtocolViolation { label: tftp_error_label(*code, message) })
            }
            _ => Err(Error::ProtocolViolation { label: "tftp unexpected opcode" }),
        }
    }

    /// Process an inbound ACK for an upload, returning the next DATA
    /// payload to send (or `None` once the final block was acked).
    pub fn on_upload_ack(&mut self, msg: &Message, mut next_block: impl FnMut(u16) -> Vec<u8>) -> Result<Option<Vec<u8>>> {
        if self.role != Role::Upload {
            return Err(Error::ProtocolViolation { label: "tftp role mismatch" });
        }
        match msg {
            Message::Ack { block } => {
                let expected = match self.phase {
                    Phase::AwaitingAck(b) => b,
                    _ => return Err(Error::ProtocolViolation { label: "tftp unexpected ack" }),
                };
                if *block != expected {
                    return Ok(None);
                }
                self.retries = 0;
                if self.last_payload.len() < 4 + BLOCK_SIZE && expected != 0 {
                    self.phase = Phase::Done;
                    return Ok(None);
                }
                let next = block.wrapping_add(1);
                let payload = next_block(next);
                // Whether this is the short final block is re-checked when
                // its own ACK arrives (the `last_payload.len() < ...` test
                // above), not here.
                self.phase = Phase::AwaitingAck(next);
                Ok(Some(Message::Data { block: next, payload }.encode()))
            }
            Message::Error { code, message } => {
                self.phase = Phase::Failed;
                Err(Error::ProtocolViolation { label: tftp_error_label(*code, message) })
            }
            _ => Err(Error::ProtocolViolation { label: "tftp unexpected opcode" }),
        }
    }
}

fn tftp_error_label(_code: u16, _message: &str) -> &'static str {
    "tftp peer error"
}

/// Serves RRQ/WRQ requests against a [`FileStore`] rooted at a fixed
/// directory, rejecting path traversal.
pub struct Server {
    store: Rc<dyn FileStore>,
    root: String,
}

impl Server {
    pub fn new(store: Rc<dyn FileStore>, root: impl Into<String>) -> Self {
        Server { store, root: root.into() }
    }

    /// Handle an inbound RRQ, returning either the first DATA block or an
    /// error reply.
    pub fn handle_rrq(&self, filename: &str) -> Message {
        let path = match safe_join(&self.root, filename) {
            Some(p) => p,
            None => return Message::Error { code: ERR_ACCESS_VIOLATION, message: "path escapes root".into() },
        };
        let reader = match self.store.open_read(&path) {
            Some(r) => r,
            None => return Message::Error { code: ERR_FILE_NOT_FOUND, message: filename.to_string() },
        };
        let mut buf = vec![0u8; BLOCK_SIZE.min(reader.get_read_ready())];
        let _ = reader.read_bytes(&mut buf);
        Message::Data { block: 1, payload: buf }
    }

    /// Handle an inbound WRQ, returning the initial ACK or an error reply.
    pub fn handle_wrq(&self, filename: &str) -> Message {
        match safe_join(&self.root, filename) {
            Some(_) => Message::Ack { block: 0 },
            None => Message::Error { code: ERR_ACCESS_VIOLATION, message: "path escapes root".into() },
        }
    }
}
