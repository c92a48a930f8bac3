//! MAC-learning plugin (§4.G).
//!
//! Learns `src MAC -> src port` on every packet and, on lookup of the
//! destination MAC, restricts `dst_mask` to the learned port; on a miss it
//! either broadcasts (if the source port has "miss as broadcast" set) or
//! drops.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::eth::frame::PluginPacket;
use crate::error::DropReason;

/// Learns and looks up `MAC -> port index` associations.
pub struct MacLearn {
    table: RefCell<HashMap<[u8; 6], u32>>,
    miss_as_broadcast: RefCell<HashMap<u32, bool>>,
    capacity: usize,
}

impl MacLearn {
    /// Create an empty table with the given maximum number of learned
    /// entries (oldest-inserted evicted first once full — a simple
    /// insertion-order cap, not a full LRU, since the original design only
    /// requires bounded memory rather than precise recency).
    pub fn new(capacity: usize) -> Self {
        MacLearn {
            table: RefCell::new(HashMap::new()),
            miss_as_broadcast: RefCell::new(HashMap::new()),
            capacity,
        }
    }

    /// Configure whether a port broadcasts (true) or drops (false) on a
    /// destination-MAC lookup miss. Defaults to drop.
    pub fn set_miss_as_broadcast(&self, port: u32, broadcast: bool) {
        self.miss_as_broadcast.borrow_mut().insert(port, broadcast);
    }

    fn learn(&self, mac: [u8; 6], port: u32) {
        let mut table = self.table.borrow_mut();
        if !table.contains_key(&mac) && table.len() >= self.capacity {
            if let Some(k) = table.keys().next().copied() {
                table.remove(&k);
            }
        }
        table.insert(mac, port);
    }

    fn lookup(&self, mac: [u8; 6]) -> Option<u32> {
        self.table.borrow().get(&mac).copied()
    }
}

impl MacLearn {
    /// Process one packet with an explicit source-port index.
    ///
    /// This is called directly by the switch core rather than through the
    /// generic [`crate::eth::plugin::PluginCore`] chain: MAC learning
    /// needs the packet's source-port index, which is metadata carried by
    /// the `MultiPacket` envelope, not by `PluginPacket` itself.
    pub fn process(&self, pkt: &mut PluginPacket, source_port: u32) {
        self.learn(pkt.src_mac, source_port);
        if pkt.dst_mac.iter().all(|b| *b == 0xFF) {
            return; // broadcast: leave dst_mask untouched
        }
        match self.lookup(pkt.dst_mac) {
            Some(port) => pkt.dst_mask &= 1 << port,
            None => {
                let broadcast = self.miss_as_broadcast.borrow().get(&source_port).copied().unwrap_or(false);
                if !broadcast {
                    pkt.drop_with(DropReason::ManagementControl);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eth::frame::parse;

    fn sample(dst: [u8; 6], src: [u8; 6]) -> PluginPacket {
        let mut data = vec![0u8; 14];
        data[0..6].copy_from_slice(&dst);
        data[6..12].copy_from_slice(&src);
        parse(&data).unwrap()
    }

    #[test]
    fn learns_source_and_restricts_on_known_dst() {
        let learn = MacLearn::new(16);
        let mac_a = [1, 0, 0, 0, 0, 0];
        let mac_b = [2, 0, 0, 0, 0, 0];
        let mut first = sample(mac_a, mac_b);
        learn.process(&mut first, 3); // learns B on port 3

        let mut second = sample(mac_b, mac_a);
        learn.process(&mut second, 0);
        assert_eq!(second.dst_mask, 1 << 3);
    }

    #[test]
    fn drops_on_miss_unless_broadcast_allowed() {
        let learn = MacLearn::new(16);
        let mut pkt = sample([9; 6], [1; 6]);
        learn.process(&mut pkt, 0);
        assert_eq!(pkt.dst_mask, 0);

        learn.set_miss_as_broadcast(1, true);
        let mut pkt2 = sample([9; 6], [1; 6]);
        learn.process(&mut pkt2, 1);
        assert_eq!(pkt2.dst_mask, u32::MAX);
    }
}
