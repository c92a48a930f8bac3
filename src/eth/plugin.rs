//! Switch plugin contracts (§4.G).
//!
//! `PluginCore` runs once per packet for the whole switch; `PluginPort`
//! runs scoped to one port, separately for ingress and egress. Chains are
//! ordered `Vec`s, mutable at runtime, matching the "dynamic dispatch...
//! is real and required" design note.

use crate::eth::frame::PluginPacket;

/// Invoked for every packet traversing the switch, regardless of port.
pub trait PluginCore {
    /// Inspect or mutate `pkt`. May narrow `dst_mask`, set `adjust()`, or
    /// drop the packet; must not change `pkt.header_len`.
    fn query(&self, pkt: &mut PluginPacket);
}

/// Invoked once per port, either on ingress (source port) or egress
/// (each destination port still set in `dst_mask`).
pub trait PluginPort {
    /// Ingress hook: source-port-scoped. Must not change header length.
    fn ingress(&self, pkt: &mut PluginPacket) {
        let _ = pkt;
    }

    /// Egress hook: destination-port-scoped. May change header length
    /// (e.g. to insert or strip a VLAN tag) — the only place that is
    /// permitted.
    fn egress(&self, pkt: &mut PluginPacket) {
        let _ = pkt;
    }
}
