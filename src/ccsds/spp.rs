//! CCSDS Space Packet Protocol primary header (§4.N): 6-byte fixed header.

use nom::number::complete::be_u16;
use nom::IResult;

/// Sequence-flags values.
pub const SEQ_CONTINUATION: u8 = 0b00;
pub const SEQ_FIRST: u8 = 0b01;
pub const SEQ_LAST: u8 = 0b10;
pub const SEQ_UNSEGMENTED: u8 = 0b11;

/// A parsed 6-byte SPP primary header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SppHeader {
    pub version: u8,
    /// `false` = telemetry, `true` = telecommand.
    pub is_telecommand: bool,
    pub has_secondary_header: bool,
    pub apid: u16,
    pub seq_flags: u8,
    pub seq_count: u16,
    /// Data field length minus one, per CCSDS 133.0-B.
    pub data_len_minus_one: u16,
}

impl SppHeader {
    /// Parse the 6-byte primary header from the start of `data`.
    pub fn parse(data: &[u8]) -> Option<Self> {
        SppHeader::parse_be(data).ok().map(|(_, hdr)| hdr)
    }

    /// No bit-level nom combinator is in play here; the packed fields are
    /// split out of the two words nom already pulled off the wire.
    fn parse_be(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, w0) = be_u16(input)?;
        let (input, w1) = be_u16(input)?;
        let (input, data_len_minus_one) = be_u16(input)?;
        Ok((
            input,
            SppHeader {
                version: ((w0 >> 13) & 0x07) as u8,
                is_telecommand: (w0 >> 12) & 0x01 != 0,
                has_secondary_header: (w0 >> 11) & 0x01 != 0,
                apid: w0 & 0x07FF,
                seq_flags: ((w1 >> 14) & 0x03) as u8,
                seq_count: w1 & 0x3FFF,
                data_len_minus_one,
            },
        ))
    }

    /// Encode back to 6 bytes.
    pub fn encode(&self) -> [u8; 6] {
        let w0 = ((self.version as u16 & 0x07) << 13)
            | ((self.is_telecommand as u16) << 12)
            | ((self.has_secondary_header as u16) << 11)
            | (self.apid & 0x07FF);
        let w1 = ((self.seq_flags as u16 & 0x03) << 14) | (self.seq_count & 0x3FFF);
        let mut out = [0u8; 6];
        out[0..2].copy_from_slice(&w0.to_be_bytes());
        out[2..4].copy_from_slice(&w1.to_be_bytes());
        out[4..6].copy_from_slice(&self.data_len_minus_one.to_be_bytes());
        out
    }

    /// Total data field length in bytes (the value actually carried by the
    /// packet, not the minus-one wire encoding).
    pub fn data_len(&self) -> usize {
        self.data_len_minus_one as usize + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_decode() {
        let hdr = SppHeader {
            version: 0,
            is_telecommand: true,
            has_secondary_header: true,
            apid: 0x123,
            seq_flags: SEQ_UNSEGMENTED,
            seq_count: 0x2AAA,
            data_len_minus_one: 41,
        };
        assert_eq!(SppHeader::parse(&hdr.encode()).unwrap(), hdr);
    }

    #[test]
    fn data_len_is_wire_value_plus_one() {
        let hdr = SppHeader { version: 0, is_telecommand: false, has_secondary_header: false, apid: 0, seq_flags: 0, seq_count: 0, data_len_minus_one: 99 };
        assert_eq!(hdr.data_len(), 100);
    }
}
