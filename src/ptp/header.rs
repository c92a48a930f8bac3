//! IEEE-1588 PTPv2 common message header (§4.L, §6): 34 bytes, parsed once
//! per inbound message and serialized once per outbound message.

use nom::bytes::complete::take;
use nom::number::complete::{be_i64, be_u32, be_u16, u8 as nom_u8};
use nom::IResult;

pub const HEADER_LEN: usize = 34;

pub const MSG_SYNC: u8 = 0x0;
pub const MSG_DELAY_REQ: u8 = 0x1;
pub const MSG_PDELAY_REQ: u8 = 0x2;
pub const MSG_PDELAY_RESP: u8 = 0x3;
pub const MSG_FOLLOW_UP: u8 = 0x8;
pub const MSG_DELAY_RESP: u8 = 0x9;
pub const MSG_PDELAY_RESP_FOLLOW_UP: u8 = 0xA;
pub const MSG_ANNOUNCE: u8 = 0xB;
pub const MSG_SIGNALING: u8 = 0xC;
pub const MSG_MANAGEMENT: u8 = 0xD;

pub const FLAG_TWO_STEP: u16 = 0x0002;
pub const FLAG_UNICAST: u16 = 0x0004;

/// `sourcePortIdentity`: an 8-byte clock identity plus a port number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PortIdentity {
    pub clock_identity: [u8; 8],
    pub port_number: u16,
}

/// The 34-byte common header shared by every PTPv2 message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub transport_specific: u8,
    pub message_type: u8,
    pub version_ptp: u8,
    pub message_length: u16,
    pub domain_number: u8,
    pub flags: u16,
    /// 64-bit fixed-point nanoseconds, 48.16 format (see [`crate::ptp::wide`]).
    pub correction_ns_q48_16: i64,
    pub source_port_identity: PortIdentity,
    pub sequence_id: u16,
    pub control_field: u8,
    pub log_message_interval: i8,
}

fn parse_clock_identity(input: &[u8]) -> IResult<&[u8], [u8; 8]> {
    let (input, bytes) = take(8usize)(input)?;
    Ok((input, bytes.try_into().unwrap()))
}

impl Header {
    /// Parse the 34-byte header from the start of `data`.
    pub fn parse(data: &[u8]) -> Option<Self> {
        Header::parse_be(data).ok().map(|(_, hdr)| hdr)
    }

    /// Bit-packed first two bytes (transport_specific/messageType nibbles,
    /// versionPTP nibble) have no nom bit-combinator in play here, so the
    /// nibble split happens on the bytes nom already pulled off the wire.
    fn parse_be(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, b0) = nom_u8(input)?;
        let (input, b1) = nom_u8(input)?;
        let (input, message_length) = be_u16(input)?;
        let (input, domain_number) = nom_u8(input)?;
        let (input, _reserved) = nom_u8(input)?;
        let (input, flags) = be_u16(input)?;
        let (input, correction_ns_q48_16) = be_i64(input)?;
        let (input, _reserved2) = take(4usize)(input)?;
        let (input, clock_identity) = parse_clock_identity(input)?;
        let (input, port_number) = be_u16(input)?;
        let (input, sequence_id) = be_u16(input)?;
        let (input, control_field) = nom_u8(input)?;
        let (input, log_message_interval) = nom_u8(input)?;
        Ok((
            input,
            Header {
                transport_specific: (b0 >> 4) & 0x0F,
                message_type: b0 & 0x0F,
                version_ptp: b1 & 0x0F,
                message_length,
                domain_number,
                flags,
                correction_ns_q48_16,
                source_port_identity: PortIdentity { clock_identity, port_number },
                sequence_id,
                control_field,
                log_message_interval: log_message_interval as i8,
            },
        ))
    }

    /// Encode back to 34 bytes.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = (self.transport_specific << 4) | (self.message_type & 0x0F);
        out[1] = 0x20 | (self.version_ptp & 0x0F); // minorVersionPTP=2, versionPTP in low nibble
        out[2..4].copy_from_slice(&self.message_length.to_be_bytes());
        out[4] = self.domain_number;
        out[6..8].copy_from_slice(&self.flags.to_be_bytes());
        out[8..16].copy_from_slice(&self.correction_ns_q48_16.to_be_bytes());
        out[20..28].copy_from_slice(&self.source_port_identity.clock_identity);
        out[28..30].copy_from_slice(&self.source_port_identity.port_number.to_be_bytes());
        out[30..32].copy_from_slice(&self.sequence_id.to_be_bytes());
        out[32] = self.control_field;
        out[33] = self.log_message_interval as u8;
        out
    }

    pub fn two_step(&self) -> bool {
        self.flags & FLAG_TWO_STEP != 0
    }
}

/// An 80-bit PTP timestamp: 48-bit seconds, 32-bit nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub seconds: u64,
    pub nanoseconds: u32,
}

impl Timestamp {
    /// Parse a 10-byte timestamp field.
    pub fn parse(data: &[u8]) -> Option<Self> {
        Timestamp::parse_be(data).ok().map(|(_, ts)| ts)
    }

    fn parse_be(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, secs) = take(6usize)(input)?;
        let (input, nanoseconds) = be_u32(input)?;
        let mut buf = [0u8; 8];
        buf[2..8].copy_from_slice(secs);
        Ok((input, Timestamp { seconds: u64::from_be_bytes(buf), nanoseconds }))
    }

    /// Encode to a 10-byte timestamp field.
    pub fn encode(&self) -> [u8; 10] {
        let mut out = [0u8; 10];
        let sec = self.seconds.to_be_bytes();
        out[0..6].copy_from_slice(&sec[2..8]);
        out[6..10].copy_from_slice(&self.nanoseconds.to_be_bytes());
        out
    }

    /// Total nanoseconds since the PTP epoch, as a signed 96-bit-safe i128.
    pub fn total_nanos(&self) -> i128 {
        self.seconds as i128 * 1_000_000_000 + self.nanoseconds as i128
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Header {
        Header {
            transport_specific: 0,
            message_type: MSG_SYNC,
            version_ptp: 2,
            message_length: 44,
            domain_number: 0,
            flags: FLAG_TWO_STEP,
            correction_ns_q48_16: 0,
            source_port_identity: PortIdentity { clock_identity: [1, 2, 3, 4, 5, 6, 7, 8], port_number: 1 },
            sequence_id: 5,
            control_field: 0,
            log_message_interval: 0,
        }
    }

    #[test]
    fn header_round_trips_through_encode_decode() {
        let hdr = sample_header();
        assert_eq!(Header::parse(&hdr.encode()).unwrap(), hdr);
    }

    #[test]
    fn two_step_flag_is_detected() {
        assert!(sample_header().two_step());
    }

    #[test]
    fn timestamp_round_trips_and_totals_nanos() {
        let ts = Timestamp { seconds: 1, nanoseconds: 500_000_000 };
        let decoded = Timestamp::parse(&ts.encode()).unwrap();
        assert_eq!(decoded, ts);
        assert_eq!(decoded.total_nanos(), 1_500_000_000);
    }
}
