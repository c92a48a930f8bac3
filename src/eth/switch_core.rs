//! Software Ethernet switch core (§4.F).
//!
//! `SwitchCore` owns a [`MultiBuffer`] and installs itself as its
//! [`DeliverHook`], running the eight-step ingress pipeline on every packet
//! finalized by any port's writer. Egress is pumped explicitly per port
//! (the callback form of §9's Open Question: the direct-read form is not
//! offered).

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::buffer::{DeliverHook, MultiBuffer, MultiReader, MultiReaderPriority, MultiWriter, PacketId};
use crate::eth::frame::{self, PluginPacket};
use crate::eth::plugin::{PluginCore, PluginPort};
use crate::eth::plugins::MacLearn;
use crate::eth::switch_log::{LogRecord, SwitchLogHandler, TYPE_DROP, TYPE_KEEP};
use crate::error::DropReason;
use crate::io::{Readable, Writeable};
use crate::time::TimeSource;

/// Upper bound on how many leading bytes of a packet are read back out of
/// the arena to parse its header. Comfortably covers Ethernet + VLAN +
/// a maximal IPv4 header + a UDP/TCP header.
const MAX_HEADER_PREFIX: usize = 128;

struct SwitchPort {
    reader: Rc<MultiReaderPriority>,
    ingress: RefCell<Vec<Rc<dyn PluginPort>>>,
    egress: RefCell<Vec<Rc<dyn PluginPort>>>,
    enabled: Cell<bool>,
}

/// Software switch: port registry, plugin chain, and the ingress/egress
/// pipelines over a shared [`MultiBuffer`].
pub struct SwitchCore {
    buf: Rc<MultiBuffer>,
    ports: RefCell<Vec<Option<SwitchPort>>>,
    free_pmask: Cell<u32>,
    plugins: RefCell<Vec<Rc<dyn PluginCore>>>,
    promiscuous_mask: Cell<u32>,
    ethertype_counts: RefCell<HashMap<u16, u64>>,
    log_handlers: RefCell<Vec<Rc<dyn SwitchLogHandler>>>,
    mac_learn: Rc<MacLearn>,
    clock: Rc<dyn TimeSource>,
}

impl SwitchCore {
    /// Build a switch over a fresh arena of `num_chunks` chunks, timestamped
    /// by `clock`, with a MAC-learning table of `mac_table_capacity` entries.
    pub fn new(num_chunks: usize, clock: Rc<dyn TimeSource>, mac_table_capacity: usize) -> Rc<Self> {
        let buf = MultiBuffer::new(num_chunks);
        let core = Rc::new(SwitchCore {
            buf: Rc::clone(&buf),
            ports: RefCell::new(Vec::new()),
            free_pmask: Cell::new(u32::MAX),
            plugins: RefCell::new(Vec::new()),
            promiscuous_mask: Cell::new(0),
            ethertype_counts: RefCell::new(HashMap::new()),
            log_handlers: RefCell::new(Vec::new()),
            mac_learn: Rc::new(MacLearn::new(mac_table_capacity)),
            clock,
        });
        buf.set_hook(Rc::clone(&core) as Rc<dyn DeliverHook>);
        core
    }

    /// The underlying packet store.
    pub fn buffer(&self) -> &Rc<MultiBuffer> {
        &self.buf
    }

    /// The shared MAC-learning table, called directly by the ingress
    /// pipeline (see [`MacLearn::process`]'s doc comment for why it is not
    /// a [`PluginCore`]).
    pub fn mac_learn(&self) -> &Rc<MacLearn> {
        &self.mac_learn
    }

    /// Append a whole-switch plugin to the core chain (§4.F step 5).
    pub fn add_plugin(&self, plugin: Rc<dyn PluginCore>) {
        self.plugins.borrow_mut().push(plugin);
    }

    /// Mark `port` promiscuous: it receives a copy of every packet
    /// regardless of `dst_mask`.
    pub fn set_promiscuous(&self, port: u32, promiscuous: bool) {
        let bit = 1u32 << port;
        let mask = self.promiscuous_mask.get();
        self.promiscuous_mask.set(if promiscuous { mask | bit } else { mask & !bit });
    }

    /// Register a packet-log consumer.
    pub fn add_log_handler(&self, handler: Rc<dyn SwitchLogHandler>) {
        self.log_handlers.borrow_mut().push(handler);
    }

    /// Count of packets seen per EtherType since creation.
    pub fn ethertype_count(&self, ethertype: u16) -> u64 {
        self.ethertype_counts.borrow().get(&ethertype).copied().unwrap_or(0)
    }

    /// Allocate a new port, taking the lowest free index. Returns `None` if
    /// the port table (32 ports) is full.
    pub fn add_port(&self) -> Option<u32> {
        let mask = self.free_pmask.get();
        if mask == 0 {
            return None;
        }
        let idx = mask.trailing_zeros();
        self.free_pmask.set(mask & !(1 << idx));
        let reader = MultiReaderPriority::new(Rc::clone(&self.buf), 0);
        let mut ports = self.ports.borrow_mut();
        if (idx as usize) >= ports.len() {
            ports.resize_with(idx as usize + 1, || None);
        }
        ports[idx as usize] =
            Some(SwitchPort { reader, ingress: RefCell::new(Vec::new()), egress: RefCell::new(Vec::new()), enabled: Cell::new(true) });
        Some(idx)
    }

    /// Release a port's index back to the free pool, flushing any queued
    /// egress packets first.
    pub fn remove_port(&self, port: u32) {
        let mut ports = self.ports.borrow_mut();
        if let Some(Some(p)) = ports.get(port as usize) {
            p.reader.flush();
        }
        if let Some(slot) = ports.get_mut(port as usize) {
            *slot = None;
        }
        self.free_pmask.set(self.free_pmask.get() | (1 << port));
    }

    /// Attach an ingress-scoped plugin to `port`.
    pub fn add_ingress_plugin(&self, port: u32, plugin: Rc<dyn PluginPort>) {
        self.with_port(port, |p| p.ingress.borrow_mut().push(plugin));
    }

    /// Attach an egress-scoped plugin to `port`.
    pub fn add_egress_plugin(&self, port: u32, plugin: Rc<dyn PluginPort>) {
        self.with_port(port, |p| p.egress.borrow_mut().push(plugin));
    }

    /// Enable or administratively disable a port. Disabling flushes any
    /// queued egress and refuses further `accept` calls.
    pub fn port_enable(&self, port: u32, enabled: bool) {
        self.with_port(port, |p| {
            p.enabled.set(enabled);
            p.reader.set_enabled(enabled);
        });
    }

    /// True if a port index is both allocated and enabled.
    pub fn port_is_enabled(&self, port: u32) -> bool {
        self.with_port(port, |p| p.enabled.get()).unwrap_or(false)
    }

    fn with_port<R>(&self, port: u32, f: impl FnOnce(&SwitchPort) -> R) -> Option<R> {
        self.ports.borrow().get(port as usize).and_then(|p| p.as_ref()).map(f)
    }

    /// Begin writing a new ingress packet arriving on `source_port`.
    pub fn writer(self: &Rc<Self>, source_port: u32) -> MultiWriter {
        let mut w = self.buf.writer();
        w.set_user(0, source_port);
        w
    }

    fn timestamp_usec(&self) -> u32 {
        let raw = self.clock.raw() as u64;
        let rate = (self.clock.ticks_per_second() as u64).max(1);
        ((raw * 1_000_000 / rate) as u32) & 0x00FF_FFFF
    }

    fn emit_log(&self, rec: LogRecord) {
        for h in self.log_handlers.borrow().iter() {
            h.record(&rec);
        }
    }

    fn read_mac_pair(&self, id: PacketId) -> ([u8; 6], [u8; 6]) {
        let mut dst = [0u8; 6];
        let mut src = [0u8; 6];
        for (i, b) in dst.iter_mut().enumerate() {
            *b = self.buf.byte_at(id, i);
        }
        for (i, b) in src.iter_mut().enumerate() {
            *b = self.buf.byte_at(id, 6 + i);
        }
        (dst, src)
    }

    /// Pump every enabled port with ready egress data through `sinks`,
    /// indexed by port number. A port with no entry in `sinks` is skipped
    /// this round (backpressure: it retries once the caller services it
    /// again with a sink present).
    pub fn service_egress(&self, sinks: &mut [Option<&mut dyn Writeable>]) {
        let ports = self.ports.borrow();
        for (idx, slot) in ports.iter().enumerate() {
            let port = match slot {
                Some(p) if p.enabled.get() => p,
                _ => continue,
            };
            if port.reader.get_read_ready() == 0 {
                continue;
            }
            let sink = match sinks.get_mut(idx).and_then(|s| s.as_deref_mut()) {
                Some(s) => s,
                None => continue,
            };
            self.pump_one_egress(port, sink);
        }
    }

    fn pump_one_egress(&self, port: &SwitchPort, sink: &mut dyn Writeable) {
        let pkt_id = match port.reader.current() {
            Some(id) => id,
            None => return,
        };
        let header_len = self.buf.with_packet(pkt_id, |p| p.header_len()).unwrap_or(0);
        let total = port.reader.get_read_ready();
        if header_len == 0 || header_len > total {
            return;
        }
        if sink.get_write_space() < header_len {
            return; // backpressure: retry on the next service_egress call
        }
        let mut header_bytes = vec![0u8; header_len];
        if port.reader.read_bytes(&mut header_bytes).is_err() {
            return;
        }
        match frame::parse(&header_bytes) {
            Some(mut pkt) => {
                let orig_l2_len = if pkt.vlan.is_some() { frame::ETH_HEADER_LEN + frame::VLAN_TAG_LEN } else { frame::ETH_HEADER_LEN };
                let tail = header_bytes[orig_l2_len.min(header_bytes.len())..].to_vec();
                for plugin in port.egress.borrow().iter() {
                    plugin.egress(&mut pkt);
                }
                sink.write_bytes(&frame::encode_l2_header(&pkt));
                sink.write_bytes(&tail);
            }
            None => {
                sink.write_bytes(&header_bytes);
            }
        }
        port.reader.copy_to(sink);
        port.reader.read_finalize();
        sink.write_finalize();
    }
}

impl DeliverHook for SwitchCore {
    fn deliver(&self, buf: &MultiBuffer, pkt_id: PacketId) {
        let (length, source_port) = match buf.with_packet(pkt_id, |p| (p.length(), p.source_port())) {
            Some(v) => v,
            None => return,
        };
        let prefix_len = length.min(MAX_HEADER_PREFIX);
        let mut prefix = vec![0u8; prefix_len];
        for (i, b) in prefix.iter_mut().enumerate() {
            *b = buf.byte_at(pkt_id, i);
        }

        let mut pkt = match frame::parse(&prefix) {
            Some(p) => p,
            None => {
                let (dst_mac, src_mac) = self.read_mac_pair(pkt_id);
                self.emit_log(LogRecord {
                    timestamp_usec: self.timestamp_usec(),
                    kind: TYPE_DROP,
                    source_port: source_port as u8,
                    dst_mac,
                    src_mac,
                    ethertype: 0,
                    vlan_tci: 0,
                    metadata: DropReason::BadFrame as u32,
                });
                buf.discard_unreferenced(pkt_id);
                return;
            }
        };

        *self.ethertype_counts.borrow_mut().entry(pkt.ethertype).or_insert(0) += 1;

        if let Some(chain) = self.with_port(source_port, |p| p.ingress.borrow().clone()) {
            for plugin in chain.iter() {
                plugin.ingress(&mut pkt);
                if pkt.dst_mask == 0 {
                    break;
                }
            }
        }

        if pkt.dst_mask != 0 {
            self.mac_learn.process(&mut pkt, source_port);
        }

        if pkt.dst_mask != 0 {
            for plugin in self.plugins.borrow().iter() {
                plugin.query(&mut pkt);
                if pkt.dst_mask == 0 {
                    break;
                }
            }
        }

        if pkt.dst_mask == 0 {
            let reason = pkt.drop_reason.unwrap_or(DropReason::ManagementControl);
            self.emit_log(LogRecord {
                timestamp_usec: self.timestamp_usec(),
                kind: TYPE_DROP,
                source_port: source_port as u8,
                dst_mac: pkt.dst_mac,
                src_mac: pkt.src_mac,
                ethertype: pkt.ethertype,
                vlan_tci: pkt.vlan.map(|v| v.encode()).unwrap_or(0),
                metadata: reason as u32,
            });
            buf.discard_unreferenced(pkt_id);
            return;
        }

        if pkt.was_adjusted() {
            let mut rewritten = prefix.clone();
            if rewritten.len() >= pkt.header_len {
                frame::serialize_back(&pkt, &mut rewritten);
                buf.overwrite(pkt_id, 0, &rewritten[..pkt.header_len]);
            }
        }

        let mut mask = pkt.dst_mask | self.promiscuous_mask.get();
        mask &= !(1u32 << source_port);

        let mut delivered_mask = 0u32;
        {
            let ports = self.ports.borrow();
            for (idx, slot) in ports.iter().enumerate() {
                if mask & (1u32 << idx) == 0 {
                    continue;
                }
                let port = match slot {
                    Some(p) if p.enabled.get() => p,
                    _ => continue,
                };
                if port.reader.accept(pkt_id) {
                    delivered_mask |= 1u32 << idx;
                }
            }
        }

        self.emit_log(LogRecord {
            timestamp_usec: self.timestamp_usec(),
            kind: TYPE_KEEP,
            source_port: source_port as u8,
            dst_mac: pkt.dst_mac,
            src_mac: pkt.src_mac,
            ethertype: pkt.ethertype,
            vlan_tci: pkt.vlan.map(|v| v.encode()).unwrap_or(0),
            metadata: delivered_mask,
        });

        if delivered_mask == 0 {
            buf.discard_unreferenced(pkt_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::SimClock;

    fn sample_frame(dst: [u8; 6], src: [u8; 6]) -> Vec<u8> {
        let mut data = vec![0u8; 14];
        data[0..6].copy_from_slice(&dst);
        data[6..12].copy_from_slice(&src);
        data[12..14].copy_from_slice(&0x0806u16.to_be_bytes());
        data
    }

    #[test]
    fn broadcast_floods_all_other_ports() {
        let clock: Rc<dyn TimeSource> = Rc::new(SimClock::new(1_000_000));
        let core = SwitchCore::new(8, clock, 16);
        let p0 = core.add_port().unwrap();
        let p1 = core.add_port().unwrap();
        let p2 = core.add_port().unwrap();

        let mut w = core.writer(p0);
        let frame = sample_frame([0xFF; 6], [1, 2, 3, 4, 5, 6]);
        w.set_header_len(14);
        w.write_bytes(&frame);
        assert!(w.write_finalize());

        let mut out1 = ArrayWriteSink::default();
        let mut out2 = ArrayWriteSink::default();
        let mut sinks: Vec<Option<&mut dyn Writeable>> = vec![None, Some(&mut out1), Some(&mut out2)];
        core.service_egress(&mut sinks);
        let _ = p1;
        let _ = p2;
        assert_eq!(out1.frames.len(), 1);
        assert_eq!(out2.frames.len(), 1);
    }

    #[test]
    fn bad_frame_is_dropped_and_chunks_reclaimed() {
        let clock: Rc<dyn TimeSource> = Rc::new(SimClock::new(1_000_000));
        let core = SwitchCore::new(4, clock, 16);
        let _p0 = core.add_port().unwrap();
        let before = core.buf.free_chunk_count();
        let mut w = core.writer(0);
        w.write_bytes(&[1, 2, 3]); // too short for even an Ethernet header
        assert!(w.write_finalize());
        assert_eq!(core.buf.free_chunk_count(), before);
    }

    #[derive(Default)]
    struct ArrayWriteSink {
        buf: Vec<u8>,
        frames: Vec<Vec<u8>>,
    }

    impl Writeable for ArrayWriteSink {
        fn get_write_space(&self) -> usize {
            usize::MAX
        }
        fn write_u8(&mut self, val: u8) {
            self.buf.push(val);
        }
        fn write_finalize(&mut self) -> bool {
            self.frames.push(std::mem::take(&mut self.buf));
            true
        }
        fn write_abort(&mut self) {
            self.buf.clear();
        }
    }
}
