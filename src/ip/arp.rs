//! ARP (§4.J): proxy-ARP policy, local-IP ownership, and an (IP, MAC)
//! resolution listener list that drives the router's deferred-forward
//! queue.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use nom::number::complete::be_u32;
use nom_derive::Nom;

const HTYPE_ETHERNET: u16 = 1;
const PTYPE_IPV4: u16 = 0x0800;
const OP_REQUEST: u16 = 1;
const OP_REPLY: u16 = 2;

/// A parsed ARP message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Nom)]
pub struct ArpMessage {
    htype: u16,
    ptype: u16,
    hlen: u8,
    plen: u8,
    pub op: u16,
    #[nom(Take = "6usize", Map = "|i: &[u8]| i.try_into().unwrap()")]
    pub sha: [u8; 6],
    #[nom(Map = "u32::to_be_bytes", Parse = "be_u32")]
    pub spa: [u8; 4],
    #[nom(Take = "6usize", Map = "|i: &[u8]| i.try_into().unwrap()")]
    pub tha: [u8; 6],
    #[nom(Map = "u32::to_be_bytes", Parse = "be_u32")]
    pub tpa: [u8; 4],
}

impl ArpMessage {
    /// Build a message with the fixed Ethernet/IPv4 hardware/protocol fields.
    pub fn new(op: u16, sha: [u8; 6], spa: [u8; 4], tha: [u8; 6], tpa: [u8; 4]) -> Self {
        ArpMessage { htype: HTYPE_ETHERNET, ptype: PTYPE_IPV4, hlen: 6, plen: 4, op, sha, spa, tha, tpa }
    }

    /// Parse a 28-byte Ethernet/IPv4 ARP payload.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 28 {
            return None;
        }
        let (_, msg) = ArpMessage::parse_be(data).ok()?;
        if msg.htype != HTYPE_ETHERNET || msg.ptype != PTYPE_IPV4 || msg.hlen != 6 || msg.plen != 4 {
            return None;
        }
        Some(msg)
    }

    /// Encode a 28-byte Ethernet/IPv4 ARP payload.
    pub fn encode(&self) -> [u8; 28] {
        let mut out = [0u8; 28];
        out[0..2].copy_from_slice(&HTYPE_ETHERNET.to_be_bytes());
        out[2..4].copy_from_slice(&PTYPE_IPV4.to_be_bytes());
        out[4] = 6;
        out[5] = 4;
        out[6..8].copy_from_slice(&self.op.to_be_bytes());
        out[8..14].copy_from_slice(&self.sha);
        out[14..18].copy_from_slice(&self.spa);
        out[18..24].copy_from_slice(&self.tha);
        out[24..28].copy_from_slice(&self.tpa);
        out
    }
}

/// Notified whenever an (IP, MAC) pair is resolved, so a deferred-forward
/// queue (or any other waiter) can react without polling.
pub trait ResolutionListener {
    fn resolved(&self, ip: [u8; 4], mac: [u8; 6]);
}

/// ARP responder and resolution-event publisher.
pub struct Arp {
    local_ips: RefCell<HashMap<[u8; 4], [u8; 6]>>,
    proxy_subnets: RefCell<Vec<([u8; 4], u8, [u8; 6])>>,
    listeners: RefCell<Vec<Rc<dyn ResolutionListener>>>,
}

impl Arp {
    /// Create an empty ARP responder.
    pub fn new() -> Self {
        Arp { local_ips: RefCell::new(HashMap::new()), proxy_subnets: RefCell::new(Vec::new()), listeners: RefCell::new(Vec::new()) }
    }

    /// Claim ownership of `ip`, answering queries for it with `mac`. If the
    /// IP was already owned with a different MAC, issues gratuitous ARP by
    /// returning a request the caller should transmit.
    pub fn set_local_ip(&self, ip: [u8; 4], mac: [u8; 6]) -> Option<ArpMessage> {
        let prior = self.local_ips.borrow_mut().insert(ip, mac);
        if prior.is_some() && prior != Some(mac) {
            return Some(ArpMessage::new(OP_REQUEST, mac, ip, [0; 6], ip));
        }
        None
    }

    /// Enable proxy-ARP for a subnet: queries for any IP in the range are
    /// answered with `mac` as though it were locally owned.
    pub fn add_proxy_subnet(&self, subnet: [u8; 4], prefix_len: u8, mac: [u8; 6]) {
        self.proxy_subnets.borrow_mut().push((subnet, prefix_len, mac));
    }

    /// Register a listener notified of every resolved (IP, MAC) pair.
    pub fn add_listener(&self, listener: Rc<dyn ResolutionListener>) {
        self.listeners.borrow_mut().push(listener);
    }

    fn owned_mac(&self, ip: [u8; 4]) -> Option<[u8; 6]> {
        if let Some(mac) = self.local_ips.borrow().get(&ip) {
            return Some(*mac);
        }
        for (subnet, prefix_len, mac) in self.proxy_subnets.borrow().iter() {
            let mask = if *prefix_len == 0 { 0 } else { u32::MAX << (32 - *prefix_len as u32) };
            if (u32::from_be_bytes(ip) & mask) == (u32::from_be_bytes(*subnet) & mask) {
                return Some(*mac);
            }
        }
        None
    }

    /// Process an inbound ARP message. Returns a reply to transmit, if any.
    /// Publishes any learned (IP, MAC) resolution to registered listeners.
    pub fn handle(&self, msg: &ArpMessage) -> Option<ArpMessage> {
        if msg.spa != [0; 4] {
            for l in self.listeners.borrow().iter() {
                l.resolved(msg.spa, msg.sha);
            }
        }
        if msg.op != OP_REQUEST {
            return None;
        }
        let mac = self.owned_mac(msg.tpa)?;
        Some(ArpMessage::new(OP_REPLY, mac, msg.tpa, msg.sha, msg.spa))
    }

    /// Build an ARP request for `target_ip`, sent from `local_ip`/`local_mac`.
    pub fn request(&self, local_ip: [u8; 4], local_mac: [u8; 6], target_ip: [u8; 4]) -> ArpMessage {
        ArpMessage::new(OP_REQUEST, local_mac, local_ip, [0; 6], target_ip)
    }
}

impl Default for Arp {
    fn default() -> Self {
        Self::new()
    }
}
