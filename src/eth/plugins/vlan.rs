//! VLAN policy plugin (§4.G).
//!
//! Evaluates ingress policy (`ADMIT_ALL`/`RESTRICTED`/`PRIORITY`/
//! `MANDATORY`), rewrites/strips/inserts the VLAN tag on egress, enforces
//! per-VID port-membership masks, and applies per-VID token-bucket rate
//! limits with policy `UNLIMITED`/`DEMOTE`/`STRICT`/`AUTO` (`AUTO` uses the
//! DEI bit).

use std::cell::RefCell;
use std::collections::HashMap;

use crate::eth::frame::{PluginPacket, VlanTag};
use crate::error::DropReason;

/// Per-port ingress VLAN admission policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressPolicy {
    /// Accept tagged and untagged frames; untagged frames get the port's
    /// native VID.
    AdmitAll,
    /// Accept only frames already tagged with a VID in the port's
    /// membership set.
    Restricted,
    /// Like `AdmitAll`, but untagged frames are tagged with the port's
    /// native VID and priority only (no membership enforcement beyond
    /// native VID).
    Priority,
    /// Require every frame to already carry an admissible tag; untagged
    /// frames are dropped.
    Mandatory,
}

/// Per-VID rate-limit policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitPolicy {
    /// No rate limiting.
    Unlimited,
    /// Exceeding the bucket demotes priority instead of dropping.
    Demote,
    /// Exceeding the bucket drops the frame.
    Strict,
    /// Like `Strict`, but the DEI bit alone decides eligibility for drop.
    Auto,
}

struct VidConfig {
    member_mask: u32,
    rate: RateLimitPolicy,
    tokens: u32,
    bucket_capacity: u32,
}

/// Per-port VLAN configuration.
pub struct PortConfig {
    pub policy: IngressPolicy,
    pub native_vid: u16,
}

/// VLAN policy plugin state, shared across all ports of one switch.
pub struct VlanPolicy {
    ports: RefCell<HashMap<u32, PortConfig>>,
    vids: RefCell<HashMap<u16, VidConfig>>,
}

impl VlanPolicy {
    /// Create an empty policy table.
    pub fn new() -> Self {
        VlanPolicy { ports: RefCell::new(HashMap::new()), vids: RefCell::new(HashMap::new()) }
    }

    /// Configure one port's ingress policy and native VID.
    pub fn configure_port(&self, port: u32, policy: IngressPolicy, native_vid: u16) {
        self.ports.borrow_mut().insert(port, PortConfig { policy, native_vid });
    }

    /// Configure one VID's port-membership mask and rate-limit bucket.
    pub fn configure_vid(&self, vid: u16, member_mask: u32, rate: RateLimitPolicy, bucket_capacity: u32) {
        self.vids.borrow_mut().insert(
            vid,
            VidConfig { member_mask, rate, tokens: bucket_capacity, bucket_capacity },
        );
    }

    /// Refill every VID's token bucket by one tick's worth of tokens
    /// (called from a periodic timer).
    pub fn refill(&self, tokens_per_tick: u32) {
        for vid in self.vids.borrow_mut().values_mut() {
            vid.tokens = (vid.tokens + tokens_per_tick).min(vid.bucket_capacity);
        }
    }

    /// Ingress-side processing for one port.
    pub fn ingress(&self, pkt: &mut PluginPacket, port: u32) {
        let ports = self.ports.borrow();
        let cfg = match ports.get(&port) {
            Some(c) => c,
            None => return, // no VLAN policy configured for this port: pass through
        };

        let vid = match pkt.vlan {
            Some(tag) => match cfg.policy {
                IngressPolicy::Restricted | IngressPolicy::Mandatory => {
                    if !self.is_member(tag.vid, port) {
                        pkt.drop_with(DropReason::Vlan);
                        return;
                    }
                    tag.vid
                }
                _ => tag.vid,
            },
            None => match cfg.policy {
                IngressPolicy::Mandatory => {
                    pkt.drop_with(DropReason::Vlan);
                    return;
                }
                IngressPolicy::AdmitAll | IngressPolicy::Priority | IngressPolicy::Restricted => {
                    pkt.vlan = Some(VlanTag { vid: cfg.native_vid, pcp: 0, dei: false });
                    pkt.adjust();
                    cfg.native_vid
                }
            },
        };
        drop(ports);

        if !self.check_rate(vid, pkt) {
            pkt.drop_with(DropReason::VlanRate);
            return;
        }

        if let Some(member_mask) = self.vids.borrow().get(&vid).map(|c| c.member_mask) {
            pkt.dst_mask &= member_mask;
        }
    }

    fn is_member(&self, vid: u16, port: u32) -> bool {
        self.vids.borrow().get(&vid).map(|c| c.member_mask & (1 << port) != 0).unwrap_or(false)
    }

    fn check_rate(&self, vid: u16, pkt: &mut PluginPacket) -> bool {
        let mut vids = self.vids.borrow_mut();
        let cfg = match vids.get_mut(&vid) {
            Some(c) => c,
            None => return true,
        };
        match cfg.rate {
            RateLimitPolicy::Unlimited => true,
            RateLimitPolicy::Demote => {
                if cfg.tokens == 0 {
                    if let Some(tag) = pkt.vlan.as_mut() {
                        tag.pcp = 0;
                        pkt.adjust();
                    }
                } else {
                    cfg.tokens -= 1;
                }
                true
            }
            RateLimitPolicy::Strict => {
                if cfg.tokens == 0 {
                    false
                } else {
                    cfg.tokens -= 1;
                    true
                }
            }
            RateLimitPolicy::Auto => {
                let dei = pkt.vlan.map(|t| t.dei).unwrap_or(false);
                if dei && cfg.tokens == 0 {
                    false
                } else {
                    cfg.tokens = cfg.tokens.saturating_sub(1);
                    true
                }
            }
        }
    }

    /// Egress-side processing: strip the tag for untagged member ports,
    /// otherwise leave it rewritten in place. Only egress plugins may
    /// change header length, so stripping/inserting is permitted here.
    pub fn egress(&self, pkt: &mut PluginPacket, port: u32) {
        let ports = self.ports.borrow();
        if let Some(cfg) = ports.get(&port) {
            if cfg.policy == IngressPolicy::AdmitAll {
                if let Some(tag) = pkt.vlan {
                    if tag.vid == cfg.native_vid {
                        pkt.vlan = None;
                        pkt.adjust();
                    }
                }
            }
        }
    }
}

impl Default for VlanPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Binds a shared [`VlanPolicy`] to one port so it can sit in a
/// [`crate::eth::plugin::PluginPort`] chain, which only passes the packet,
/// not a port index.
pub struct VlanPort {
    policy: std::rc::Rc<VlanPolicy>,
    port: u32,
}

impl VlanPort {
    /// Create a per-port adapter over a shared policy table.
    pub fn new(policy: std::rc::Rc<VlanPolicy>, port: u32) -> Self {
        VlanPort { policy, port }
    }
}

impl crate::eth::plugin::PluginPort for VlanPort {
    fn ingress(&self, pkt: &mut PluginPacket) {
        self.policy.ingress(pkt, self.port);
    }

    fn egress(&self, pkt: &mut PluginPacket) {
        self.policy.egress(pkt, self.port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eth::frame::parse;

    fn tagged_packet(vid: u16) -> PluginPacket {
        let mut data = vec![0u8; 18];
        data[12..14].copy_from_slice(&0x8100u16.to_be_bytes());
        data[14..16].copy_from_slice(&vid.to_be_bytes());
        data[16..18].copy_from_slice(&0x0800u16.to_be_bytes());
        parse(&data).unwrap()
    }

    #[test]
    fn restricted_port_drops_non_member_vid() {
        let vlan = VlanPolicy::new();
        vlan.configure_port(1, IngressPolicy::Restricted, 1);
        vlan.configure_vid(7, 0b0110, RateLimitPolicy::Unlimited, 0);
        let mut pkt = tagged_packet(7);
        vlan.ingress(&mut pkt, 1);
        assert_eq!(pkt.dst_mask, 0);
    }

    #[test]
    fn restricted_port_admits_member_vid_and_masks_dst() {
        let vlan = VlanPolicy::new();
        vlan.configure_port(1, IngressPolicy::Restricted, 1);
        vlan.configure_vid(7, 0b0110, RateLimitPolicy::Unlimited, 0);
        vlan.configure_port(2, IngressPolicy::Restricted, 1); // port 2 is also a member via mask
        let mut pkt = tagged_packet(7);
        pkt.dst_mask = u32::MAX;
        // Make port 1 itself a member so ingress admits it.
        vlan.configure_vid(7, 0b0111, RateLimitPolicy::Unlimited, 0);
        vlan.ingress(&mut pkt, 1);
        assert_eq!(pkt.dst_mask, 0b0111);
    }

    #[test]
    fn strict_rate_limit_drops_once_bucket_empty() {
        let vlan = VlanPolicy::new();
        vlan.configure_port(0, IngressPolicy::AdmitAll, 5);
        vlan.configure_vid(5, u32::MAX, RateLimitPolicy::Strict, 1);
        let mut first = tagged_packet(5);
        vlan.ingress(&mut first, 0);
        assert_ne!(first.dst_mask, 0);
        let mut second = tagged_packet(5);
        vlan.ingress(&mut second, 0);
        assert_eq!(second.dst_mask, 0);
    }
}
