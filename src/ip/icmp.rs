//! ICMP (§4.I "ICMP reply construction", §4.J): echo, timestamp, redirect,
//! and the router's error-reply builder.

use nom::number::complete::u8 as nom_u8;

use crate::ip::header::checksum16;
use crate::time::{TimeSource, TimeVal};

pub const TYPE_ECHO_REPLY: u8 = 0;
pub const TYPE_DEST_UNREACHABLE: u8 = 3;
pub const TYPE_REDIRECT: u8 = 5;
pub const TYPE_ECHO_REQUEST: u8 = 8;
pub const TYPE_TIME_EXCEEDED: u8 = 11;
pub const TYPE_TIMESTAMP: u8 = 13;
pub const TYPE_TIMESTAMP_REPLY: u8 = 14;

pub const CODE_NET_UNREACHABLE: u8 = 0;
pub const CODE_HOST_UNREACHABLE: u8 = 1;
pub const CODE_PROTOCOL_UNREACHABLE: u8 = 2;
pub const CODE_PORT_UNREACHABLE: u8 = 3;
pub const CODE_COMM_ADMIN_PROHIBITED: u8 = 13;
pub const CODE_TTL_EXCEEDED: u8 = 0;
pub const CODE_REDIRECT_HOST: u8 = 1;

/// Marks a timestamp as "non-standard units" per RFC-792's note that a host
/// unable to provide milliseconds-since-midnight may set the high bit.
const TIMESTAMP_NONSTANDARD_BIT: u32 = 0x8000_0000;

/// Bytes of the original IPv4 header + payload echoed back in an error
/// reply (RFC 792: header plus first 8 bytes of the datagram that follows).
const ERROR_ECHO_LEN: usize = 28;

/// Build an ICMP error reply: type/code/unused-or-argument word, followed
/// by up to `ERROR_ECHO_LEN` bytes of the offending IPv4 packet.
///
/// Does not reply to fragments, to packets destined to a multicast
/// address, or to packets whose own source is this router: callers must
/// check those conditions before calling (§4.I, §4.J).
pub fn build_error(kind: u8, code: u8, argument: u32, offending_ip_packet: &[u8]) -> Vec<u8> {
    let echo_len = offending_ip_packet.len().min(ERROR_ECHO_LEN);
    let mut out = vec![0u8; 8 + echo_len];
    out[0] = kind;
    out[1] = code;
    out[4..8].copy_from_slice(&argument.to_be_bytes());
    out[8..8 + echo_len].copy_from_slice(&offending_ip_packet[..echo_len]);
    let cksum = checksum16(&out);
    out[2..4].copy_from_slice(&cksum.to_be_bytes());
    out
}

/// Build an ICMP echo reply mirroring an echo request's identifier,
/// sequence number, and payload.
pub fn build_echo_reply(identifier: u16, sequence: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; 8 + payload.len()];
    out[0] = TYPE_ECHO_REPLY;
    out[4..6].copy_from_slice(&identifier.to_be_bytes());
    out[6..8].copy_from_slice(&sequence.to_be_bytes());
    out[8..].copy_from_slice(payload);
    let cksum = checksum16(&out);
    out[2..4].copy_from_slice(&cksum.to_be_bytes());
    out
}

/// Round-trip time measured from an echo request send to its reply,
/// using the shared time reference (§4.J).
pub fn measure_rtt_usec(sent: &TimeVal, src: &dyn TimeSource) -> u32 {
    sent.elapsed_usec(src)
}

/// Build an ICMP timestamp reply. `originate`/`receive`/`transmit` are
/// milliseconds since midnight UTC, or an implementation-defined value
/// with the high bit set if that is unavailable (RFC 792).
pub fn build_timestamp_reply(identifier: u16, sequence: u16, originate: u32, receive: u32, transmit: u32) -> [u8; 20] {
    let mut out = [0u8; 20];
    out[0] = TYPE_TIMESTAMP_REPLY;
    out[4..6].copy_from_slice(&identifier.to_be_bytes());
    out[6..8].copy_from_slice(&sequence.to_be_bytes());
    out[8..12].copy_from_slice(&originate.to_be_bytes());
    out[12..16].copy_from_slice(&receive.to_be_bytes());
    out[16..20].copy_from_slice(&transmit.to_be_bytes());
    let cksum = checksum16(&out);
    out[2..4].copy_from_slice(&cksum.to_be_bytes());
    out
}

/// A non-standard-units timestamp value (see [`TIMESTAMP_NONSTANDARD_BIT`]).
pub fn nonstandard_timestamp(raw: u32) -> u32 {
    raw | TIMESTAMP_NONSTANDARD_BIT
}

/// Decode the type/code of an inbound ICMP message for logging (§4.J:
/// "decodes inbound error messages for logging" — no behavior beyond
/// extraction).
pub fn decode_type_code(data: &[u8]) -> Option<(u8, u8)> {
    let (rest, kind) = nom_u8::<_, nom::error::Error<&[u8]>>(data).ok()?;
    let (_, code) = nom_u8::<_, nom::error::Error<&[u8]>>(rest).ok()?;
    Some((kind, code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::SimClock;

    #[test]
    fn error_reply_echoes_offending_header() {
        let offending = vec![0x45u8; 28];
        let reply = build_error(TYPE_TIME_EXCEEDED, CODE_TTL_EXCEEDED, 0, &offending);
        assert_eq!(reply[0], TYPE_TIME_EXCEEDED);
        assert_eq!(&reply[8..], &offending[..]);
        assert_eq!(checksum16(&reply), 0);
    }

    #[test]
    fn echo_reply_preserves_identifier_and_payload() {
        let payload = [1, 2, 3, 4];
        let reply = build_echo_reply(0xABCD, 7, &payload);
        assert_eq!(u16::from_be_bytes([reply[4], reply[5]]), 0xABCD);
        assert_eq!(&reply[8..], &payload);
        assert_eq!(checksum16(&reply), 0);
    }

    #[test]
    fn rtt_measured_against_time_source() {
        let mut clk = SimClock::new(1_000_000);
        let snap = TimeVal::now(&clk);
        clk.advance(250_000);
        assert_eq!(measure_rtt_usec(&snap, &clk), 250_000);
    }
}
