//! Ethernet/VLAN/ARP/IPv4/UDP/TCP header parsing into a plugin-visible view.
//!
//! Grounded in `eth_switch.h`'s `PluginPacket` used by the ingress pipeline
//! (§4.F step 1). Parsing happens once per packet into a small
//! stack-allocated struct; plugins mutate fields of this struct rather than
//! the packet bytes directly, and the switch core serializes any changes
//! back in place (§4.F step 6, bounded by the original header length).

use nom::bytes::complete::take;
use nom::number::complete::{be_u16, u8 as nom_u8};
use nom::IResult;

/// Length of a plain Ethernet header (no VLAN tag).
pub const ETH_HEADER_LEN: usize = 14;
/// Length of one 802.1Q VLAN tag.
pub const VLAN_TAG_LEN: usize = 4;

/// EtherType for 802.1Q VLAN-tagged frames.
pub const ETHERTYPE_VLAN: u16 = 0x8100;
/// EtherType for ARP.
pub const ETHERTYPE_ARP: u16 = 0x0806;
/// EtherType for IPv4.
pub const ETHERTYPE_IPV4: u16 = 0x0800;

/// IP protocol number for UDP.
pub const IPPROTO_UDP: u8 = 17;
/// IP protocol number for TCP.
pub const IPPROTO_TCP: u8 = 6;
/// IP protocol number for ICMP.
pub const IPPROTO_ICMP: u8 = 1;

/// Mutated by an egress/ingress plugin to signal a header field changed
/// and must be serialized back to the packet bytes.
pub const FLAG_HEADER_CHANGE: u32 = 0x01;
/// Set by a plugin to claim exclusive ownership of the packet (transfers
/// responsibility for eventually releasing it).
pub const FLAG_DIVERT: u32 = 0x02;

/// One 802.1Q VLAN tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VlanTag {
    /// 12-bit VLAN identifier.
    pub vid: u16,
    /// 3-bit priority code point.
    pub pcp: u8,
    /// Drop-eligible indicator bit.
    pub dei: bool,
}

impl VlanTag {
    fn decode(tci: u16) -> Self {
        VlanTag {
            vid: tci & 0x0FFF,
            pcp: ((tci >> 13) & 0x7) as u8,
            dei: (tci >> 12) & 0x1 != 0,
        }
    }

    pub(crate) fn encode(&self) -> u16 {
        ((self.pcp as u16) << 13) | ((self.dei as u16) << 12) | (self.vid & 0x0FFF)
    }
}

/// Parsed view of an IPv4 header's mutable fields, plus its byte offset
/// within the packet for in-place rewriting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4View {
    /// Byte offset of the start of the IPv4 header within the packet.
    pub offset: usize,
    /// IHL-derived header length in bytes.
    pub ihl_bytes: usize,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub src: [u8; 4],
    pub dst: [u8; 4],
    /// True if the "more fragments" bit is set or the fragment offset is
    /// nonzero.
    pub is_fragment: bool,
}

/// Parsed view of a UDP or TCP header's ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L4View {
    pub offset: usize,
    pub src_port: u16,
    pub dst_port: u16,
}

/// Stack-allocated, plugin-visible view of one packet's headers.
///
/// Ingress/core plugins may mutate `dst_mac`, `src_mac`, `vlan`, IPv4
/// `ttl`/`checksum`, `dst_mask`, and `flags`, but must not change the
/// packet's total header length (only egress plugins may, e.g. to insert
/// or strip a VLAN tag).
#[derive(Debug, Clone)]
pub struct PluginPacket {
    pub dst_mac: [u8; 6],
    pub src_mac: [u8; 6],
    pub vlan: Option<VlanTag>,
    pub ethertype: u16,
    pub ip: Option<Ipv4View>,
    pub udp: Option<L4View>,
    pub tcp: Option<L4View>,
    /// Total parsed header length — the Overwriter bound for in-place
    /// rewrites.
    pub header_len: usize,
    /// Destination port bitmask, initially all-ones; plugins narrow it.
    pub dst_mask: u32,
    /// `FLAG_HEADER_CHANGE` / `FLAG_DIVERT`.
    pub flags: u32,
    /// Drop reason recorded by the first plugin that zeroes `dst_mask`.
    pub drop_reason: Option<crate::error::DropReason>,
}

impl PluginPacket {
    /// Mark that a header field changed and must be serialized back.
    pub fn adjust(&mut self) {
        self.flags |= FLAG_HEADER_CHANGE;
    }

    /// True if [`Self::adjust`] was called.
    pub fn was_adjusted(&self) -> bool {
        self.flags & FLAG_HEADER_CHANGE != 0
    }

    /// Drop the packet with the given reason by clearing `dst_mask`.
    pub fn drop_with(&mut self, reason: crate::error::DropReason) {
        self.dst_mask = 0;
        self.drop_reason = Some(reason);
    }
}

/// Parse Ethernet, optional VLAN, optional ARP-irrelevant IPv4/UDP/TCP
/// headers from `data`. Returns `None` if the buffer is too short for even
/// a bare Ethernet header.
pub fn parse(data: &[u8]) -> Option<PluginPacket> {
    parse_inner(data).ok().map(|(_, pkt)| pkt)
}

fn parse_mac(input: &[u8]) -> IResult<&[u8], [u8; 6]> {
    let (input, bytes) = take(6usize)(input)?;
    Ok((input, bytes.try_into().unwrap()))
}

fn parse_ipv4_addr(input: &[u8]) -> IResult<&[u8], [u8; 4]> {
    let (input, bytes) = take(4usize)(input)?;
    Ok((input, bytes.try_into().unwrap()))
}

/// Conditional, multi-branch header stack (bare Ethernet always; VLAN, IPv4,
/// and UDP/TCP only as earlier fields dictate), so it is threaded through
/// `nom` combinators by hand rather than as a single `#[derive(Nom)]` shape.
fn parse_inner(data: &[u8]) -> IResult<&[u8], PluginPacket> {
    let (rest, dst_mac) = parse_mac(data)?;
    let (rest, src_mac) = parse_mac(rest)?;
    let (rest, mut ethertype) = be_u16(rest)?;

    let mut vlan = None;
    let mut rest = rest;
    if ethertype == ETHERTYPE_VLAN {
        let (r, tci) = be_u16(rest)?;
        let (r, et) = be_u16(r)?;
        vlan = Some(VlanTag::decode(tci));
        ethertype = et;
        rest = r;
    }

    let mut ip = None;
    let mut udp = None;
    let mut tcp = None;
    let mut header_len = data.len() - rest.len();

    if ethertype == ETHERTYPE_IPV4 {
        let ip_offset = data.len() - rest.len();
        let (r, vihl) = nom_u8(rest)?;
        let ihl_bytes = ((vihl & 0x0F) as usize) * 4;
        if ihl_bytes < 20 {
            return Err(nom::Err::Error(nom::error::Error::new(rest, nom::error::ErrorKind::Verify)));
        }
        let (r, _dscp_ecn) = nom_u8(r)?;
        let (r, _total_len) = be_u16(r)?;
        let (r, _id) = be_u16(r)?;
        let (r, flags_frag) = be_u16(r)?;
        let is_fragment = (flags_frag & 0x1FFF) != 0 || (flags_frag & 0x2000) != 0;
        let (r, ttl) = nom_u8(r)?;
        let (r, protocol) = nom_u8(r)?;
        let (r, checksum) = be_u16(r)?;
        let (r, src) = parse_ipv4_addr(r)?;
        let (r, dst) = parse_ipv4_addr(r)?;
        // Remaining IHL bytes beyond the fixed 20 (IP options) are skipped.
        let options_len = ihl_bytes - 20;
        let (r, _options) = take(options_len)(r)?;
        ip = Some(Ipv4View { offset: ip_offset, ihl_bytes, ttl, protocol, checksum, src, dst, is_fragment });

        let l4_offset = ip_offset + ihl_bytes;
        if protocol == IPPROTO_UDP {
            if let Ok((r2, (src_port, dst_port))) = parse_l4_ports(r) {
                udp = Some(L4View { offset: l4_offset, src_port, dst_port });
                rest = r2;
            } else {
                rest = r;
            }
        } else if protocol == IPPROTO_TCP {
            if let Ok((r2, (src_port, dst_port))) = parse_l4_ports(r) {
                tcp = Some(L4View { offset: l4_offset, src_port, dst_port });
                rest = r2;
            } else {
                rest = r;
            }
        } else {
            rest = r;
        }
        header_len = l4_offset;
    }

    Ok((
        rest,
        PluginPacket {
            dst_mac,
            src_mac,
            vlan,
            ethertype,
            ip,
            udp,
            tcp,
            header_len,
            dst_mask: u32::MAX,
            flags: 0,
            drop_reason: None,
        },
    ))
}

fn parse_l4_ports(input: &[u8]) -> IResult<&[u8], (u16, u16)> {
    let (input, src_port) = be_u16(input)?;
    let (input, dst_port) = be_u16(input)?;
    Ok((input, (src_port, dst_port)))
}

/// Build a fresh Ethernet(+VLAN) header for `pkt`'s current `dst_mac`/
/// `src_mac`/`vlan`/`ethertype`. Used by the egress pipeline, the one place
/// allowed to change header length (inserting or stripping a VLAN tag).
pub fn encode_l2_header(pkt: &PluginPacket) -> Vec<u8> {
    let mut out = Vec::with_capacity(ETH_HEADER_LEN + VLAN_TAG_LEN);
    out.extend_from_slice(&pkt.dst_mac);
    out.extend_from_slice(&pkt.src_mac);
    if let Some(vlan) = pkt.vlan {
        out.extend_from_slice(&ETHERTYPE_VLAN.to_be_bytes());
        out.extend_from_slice(&vlan.encode().to_be_bytes());
    }
    out.extend_from_slice(&pkt.ethertype.to_be_bytes());
    out
}

/// Serialize the mutable header fields of `pkt` back into `data`, which
/// must be at least `pkt.header_len` bytes. Used by the switch core when
/// [`PluginPacket::was_adjusted`] is true.
pub fn serialize_back(pkt: &PluginPacket, data: &mut [u8]) {
    data[0..6].copy_from_slice(&pkt.dst_mac);
    data[6..12].copy_from_slice(&pkt.src_mac);
    if let Some(vlan) = &pkt.vlan {
        data[14..16].copy_from_slice(&vlan.encode().to_be_bytes());
    }
    if let Some(ip) = &pkt.ip {
        data[ip.offset + 8] = ip.ttl;
        data[ip.offset + 10..ip.offset + 12].copy_from_slice(&ip.checksum.to_be_bytes());
        data[ip.offset + 12..ip.offset + 16].copy_from_slice(&ip.src);
        data[ip.offset + 16..ip.offset + 20].copy_from_slice(&ip.dst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ipv4_udp() -> Vec<u8> {
        let mut data = vec![0u8; 14 + 20 + 8];
        data[0..6].copy_from_slice(&[0xAA; 6]);
        data[6..12].copy_from_slice(&[0xBB; 6]);
        data[12..14].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        data[14] = 0x45; // version 4, IHL 5
        data[14 + 8] = 64; // TTL
        data[14 + 9] = IPPROTO_UDP;
        data[14 + 12..14 + 16].copy_from_slice(&[10, 0, 0, 1]);
        data[14 + 16..14 + 20].copy_from_slice(&[10, 0, 0, 2]);
        data[34..36].copy_from_slice(&1234u16.to_be_bytes());
        data[36..38].copy_from_slice(&5678u16.to_be_bytes());
        data
    }

    #[test]
    fn parses_ipv4_udp_header() {
        let data = sample_ipv4_udp();
        let pkt = parse(&data).unwrap();
        assert_eq!(pkt.ethertype, ETHERTYPE_IPV4);
        let ip = pkt.ip.unwrap();
        assert_eq!(ip.ttl, 64);
        assert_eq!(ip.protocol, IPPROTO_UDP);
        let udp = pkt.udp.unwrap();
        assert_eq!(udp.src_port, 1234);
        assert_eq!(udp.dst_port, 5678);
        assert_eq!(pkt.header_len, 14 + 20);
    }

    #[test]
    fn vlan_tag_round_trips_through_encode_decode() {
        let tag = VlanTag { vid: 7, pcp: 3, dei: true };
        assert_eq!(VlanTag::decode(tag.encode()), tag);
    }

    #[test]
    fn encode_l2_header_inserts_vlan_tag() {
        let data = sample_ipv4_udp();
        let mut pkt = parse(&data).unwrap();
        assert!(pkt.vlan.is_none());
        pkt.vlan = Some(VlanTag { vid: 42, pcp: 0, dei: false });
        let header = encode_l2_header(&pkt);
        assert_eq!(header.len(), ETH_HEADER_LEN + VLAN_TAG_LEN);
        assert_eq!(u16::from_be_bytes([header[12], header[13]]), ETHERTYPE_VLAN);
    }

    #[test]
    fn serialize_back_writes_ttl_and_checksum() {
        let data = sample_ipv4_udp();
        let mut pkt = parse(&data).unwrap();
        pkt.ip.as_mut().unwrap().ttl = 63;
        pkt.ip.as_mut().unwrap().checksum = 0xBEEF;
        let mut out = data.clone();
        serialize_back(&pkt, &mut out);
        assert_eq!(out[14 + 8], 63);
        assert_eq!(u16::from_be_bytes([out[14 + 10], out[14 + 11]]), 0xBEEF);
    }
}
