//! CoAP (RFC-7252) request/response layer, one exchange per connection
//! (§4.M).

use std::num::NonZeroUsize;

use lru::LruCache;
use nom::bytes::complete::take;
use nom::number::complete::{be_u16, u8 as nom_u8};
use nom::IResult;

use crate::time::{TimeSource, TimeVal};

pub const TYPE_CON: u8 = 0;
pub const TYPE_NON: u8 = 1;
pub const TYPE_ACK: u8 = 2;
pub const TYPE_RST: u8 = 3;

pub const CODE_EMPTY: u8 = 0x00;
pub const CODE_GET: u8 = 0x01;
pub const CODE_POST: u8 = 0x02;
pub const CODE_PUT: u8 = 0x03;
pub const CODE_DELETE: u8 = 0x04;
pub const CODE_CONTENT: u8 = 0x45; // 2.05
pub const CODE_CHANGED: u8 = 0x44; // 2.04
pub const CODE_BAD_OPTION: u8 = 0x82; // 4.02

const OPT_URI_PATH: u16 = 11;
const OPT_CONTENT_FORMAT: u16 = 12;
const OPT_SIZE1: u16 = 60;
const OPT_BLOCK1: u16 = 27;
const OPT_BLOCK2: u16 = 23;
/// Options whose number is odd are "critical": an unrecognized one must be
/// rejected rather than silently skipped (RFC-7252 §5.4.1).
fn is_critical(number: u16) -> bool {
    number % 2 == 1
}

/// A Block1/Block2 option: block number, "more blocks follow" flag, and
/// the block size exponent (size = 2^(4+szx)).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockOption {
    pub num: u32,
    pub more: bool,
    pub szx: u8,
}

impl BlockOption {
    fn encode(&self) -> u32 {
        (self.num << 4) | ((self.more as u32) << 3) | (self.szx as u32 & 0x7)
    }

    fn decode(raw: u32) -> Self {
        BlockOption { num: raw >> 4, more: (raw >> 3) & 1 != 0, szx: (raw & 0x7) as u8 }
    }

    /// Block size in bytes.
    pub fn size(&self) -> usize {
        1usize << (4 + self.szx as u32)
    }
}

/// Options of interest, aggregated from the wire's repeatable-option list
/// into one typed struct (§4.M: "a small typed option struct").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    pub uri_path: Vec<String>,
    pub content_format: Option<u16>,
    pub block1: Option<BlockOption>,
    pub block2: Option<BlockOption>,
    pub size1: Option<u32>,
}

/// A parsed CoAP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub msg_type: u8,
    pub code: u8,
    pub message_id: u16,
    pub token: Vec<u8>,
    pub options: Options,
    pub payload: Vec<u8>,
}

fn read_option_value(data: &[u8], len: usize) -> u32 {
    let mut v = 0u32;
    for &b in data.iter().take(len) {
        v = (v << 8) | b as u32;
    }
    v
}

impl Message {
    /// Parse a CoAP message. Returns `Err(CODE_BAD_OPTION)` if an
    /// unrecognized critical option is present.
    pub fn decode(data: &[u8]) -> Result<Self, u8> {
        Self::decode_be(data).map(|(_, msg)| msg).map_err(|_| CODE_BAD_OPTION)
    }

    /// The option stream's length is self-describing (extended delta/len
    /// bytes determined by the nibbles already read), so it is walked with
    /// a loop over `nom` primitive reads rather than a single derive shape.
    fn decode_be(data: &[u8]) -> IResult<&[u8], Self> {
        let (rest, first) = nom_u8(data)?;
        if (first >> 6) != 1 {
            return Err(nom::Err::Error(nom::error::Error::new(data, nom::error::ErrorKind::Verify)));
        }
        let tkl = (first & 0x0F) as usize;
        let msg_type = (first >> 4) & 0x03;
        let (rest, code) = nom_u8(rest)?;
        let (rest, message_id) = be_u16(rest)?;
        let (mut rest, token) = take(tkl)(rest)?;
        let token = token.to_vec();

        let mut options = Options::default();
        let mut option_number: u32 = 0;
        loop {
            let Ok((r, first)) = nom_u8::<_, nom::error::Error<&[u8]>>(rest) else { break };
            if first == 0xFF {
                rest = r;
                break;
            }
            rest = r;
            let mut delta = (first >> 4) as u32;
            let mut len = (first & 0x0F) as usize;
            if delta == 13 {
                let (r, ext) = nom_u8(rest)?;
                delta = ext as u32 + 13;
                rest = r;
            } else if delta == 14 {
                let (r, ext) = be_u16(rest)?;
                delta = ext as u32 + 269;
                rest = r;
            }
            if len == 13 {
                let (r, ext) = nom_u8(rest)?;
                len = ext as usize + 13;
                rest = r;
            } else if len == 14 {
                let (r, ext) = be_u16(rest)?;
                len = ext as usize + 269;
                rest = r;
            }
            option_number += delta;
            let (r, value) = take(len)(rest)?;
            rest = r;
            match option_number as u16 {
                OPT_URI_PATH => options.uri_path.push(String::from_utf8_lossy(value).into_owned()),
                OPT_CONTENT_FORMAT => options.content_format = Some(read_option_value(value, len) as u16),
                OPT_SIZE1 => options.size1 = Some(read_option_value(value, len)),
                OPT_BLOCK1 => options.block1 = Some(BlockOption::decode(read_option_value(value, len))),
                OPT_BLOCK2 => options.block2 = Some(BlockOption::decode(read_option_value(value, len))),
                n => {
                    if is_critical(n) {
                        return Err(nom::Err::Error(nom::error::Error::new(rest, nom::error::ErrorKind::Verify)));
                    }
                }
            }
        }
        let payload = rest.to_vec();
        Ok((&[], Message { msg_type, code, message_id, token, options, payload }))
    }

    /// Encode to a UDP payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; 4 + self.token.len()];
        out[0] = (1 << 6) | (self.msg_type << 4) | (self.token.len() as u8 & 0x0F);
        out[1] = self.code;
        out[2..4].copy_from_slice(&self.message_id.to_be_bytes());
        out[4..].copy_from_slice(&self.token);

        let mut last_number = 0u16;
        let mut push_option = |out: &mut Vec<u8>, number: u16, value: &[u8]| {
            let delta = number - last_number;
            last_number = number;
            let len = value.len();
            let delta_nibble = if delta >= 269 { 14 } else if delta >= 13 { 13 } else { delta as u8 };
            let len_nibble = if len >= 269 { 14 } else if len >= 13 { 13 } else { len as u8 };
            out.push((delta_nibble << 4) | len_nibble);
            if delta_nibble == 13 {
                out.push((delta - 13) as u8);
            } else if delta_nibble == 14 {
                out.extend_from_slice(&((delta - 269) as u16).to_be_bytes());
            }
            if len_nibble == 13 {
                out.push((len - 13) as u8);
            } else if len_nibble == 14 {
                out.extend_from_slice(&((len - 269) as u16).to_be_bytes());
            }
            out.extend_from_slice(value);
        };
        for seg in &self.options.uri_path {
            push_option(&mut out, OPT_URI_PATH, seg.as_bytes());
        }
        if let Some(cf) = self.options.content_format {
            push_option(&mut out, OPT_CONTENT_FORMAT, &trim_be(&cf.to_be_bytes()));
        }
        // Options must be emitted in ascending number order: BLOCK2 (23)
        // before BLOCK1 (27).
        if let Some(b2) = &self.options.block2 {
            push_option(&mut out, OPT_BLOCK2, &trim_be(&b2.encode().to_be_bytes()));
        }
        if let Some(b1) = &self.options.block1 {
            push_option(&mut out, OPT_BLOCK1, &trim_be(&b1.encode().to_be_bytes()));
        }
        if let Some(size1) = self.options.size1 {
            push_option(&mut out, OPT_SIZE1, &trim_be(&size1.to_be_bytes()));
        }
        if !self.payload.is_empty() {
            out.push(0xFF);
            out.extend_from_slice(&self.payload);
        }
        out
    }
}

fn trim_be(bytes: &[u8]) -> Vec<u8> {
    let first_nonzero = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    bytes[first_nonzero..].to_vec()
}

const RETRY_BASE_MS: u32 = 2000;
const MAX_RETRANSMIT: u32 = 4;
const DUP_HISTORY_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExchangeState {
    Idle,
    AwaitingAck,
    AwaitingSeparateResponse,
    Done,
    Failed,
}

/// A CoAP request/response exchange over one connection: at most one
/// outstanding CON request, retransmitted with exponential backoff, plus
/// a bounded duplicate-detection history.
pub struct Exchange {
    state: ExchangeState,
    retries: u32,
    last_sent: Option<TimeVal>,
    last_payload: Vec<u8>,
    seen: LruCache<(u16, Vec<u8>), ()>,
}

impl Exchange {
    pub fn new() -> Self {
        Exchange {
            state: ExchangeState::Idle,
            retries: 0,
            last_sent: None,
            last_payload: Vec::new(),
            seen: LruCache::new(NonZeroUsize::new(DUP_HISTORY_CAPACITY).unwrap()),
        }
    }

    /// Send a confirmable request, starting the retransmit timer.
    pub fn send_request(&mut self, src: &dyn TimeSource, payload: Vec<u8>) {
        self.state = ExchangeState::AwaitingAck;
        self.retries = 0;
        self.last_sent = Some(TimeVal::now(src));
        self.last_payload = payload;
    }

    /// Check the retransmit deadline. Returns the payload to resend, or
    /// `None` if not due; exhausting [`MAX_RETRANSMIT`] fails the exchange.
    pub fn poll_timeout(&mut self, src: &dyn TimeSource) -> Option<Vec<u8>> {
        if self.state != ExchangeState::AwaitingAck {
            return None;
        }
        let sent = self.last_sent?;
        let deadline_usec = (RETRY_BASE_MS as u64 * 1000) << self.retries;
        if (sent.elapsed_usec(src) as u64) < deadline_usec {
            return None;
        }
        if self.retries >= MAX_RETRANSMIT {
            self.state = ExchangeState::Failed;
            return None;
        }
        self.retries += 1;
        self.last_sent = Some(TimeVal::now(src));
        Some(self.last_payload.clone())
    }

    /// True if `(message_id, token)` was already seen; if not, records it
    /// (the underlying LRU cache evicts the least-recently-seen entry once
    /// [`DUP_HISTORY_CAPACITY`] is hit).
    pub fn is_duplicate(&mut self, message_id: u16, token: &[u8]) -> bool {
        let key = (message_id, token.to_vec());
        if self.seen.get(&key).is_some() {
            return true;
        }
        self.seen.put(key, ());
        false
    }

    /// An ACK arrived for the outstanding request. If it carries a piggy-
    /// backed response (non-empty code), the exchange is done; if empty,
    /// a separate response is expected later.
    pub fn on_ack(&mut self, msg: &Message) {
        if self.state != ExchangeState::AwaitingAck {
            return;
        }
        self.state = if msg.code == CODE_EMPTY { ExchangeState::AwaitingSeparateResponse } else { ExchangeState::Done };
    }

    /// A later CON response arrived after an empty ACK.
    pub fn on_separate_response(&mut self) {
        if self.state == ExchangeState::AwaitingSeparateResponse {
            self.state = ExchangeState::Done;
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, ExchangeState::Done | ExchangeState::Failed)
    }
}

impl Default for Exchange {
    fn default() -> Self {
        Self::new()
    }
}
