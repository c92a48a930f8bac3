//! Switch packet log records (§3, §4.F).
//!
//! A fixed 24-byte record describes one ingress/egress event: 24-bit
//! wrapping microsecond timestamp, 3-bit event type, 5-bit source port,
//! dst/src MAC, EtherType, VLAN tag, and a 32-bit metadata word whose
//! meaning depends on the event type.

use std::cell::RefCell;

use serde::{Deserialize, Serialize};

/// Record kept, delivered with the post-pipeline `dst_mask`.
pub const TYPE_KEEP: u8 = 0;
/// Record dropped; `metadata` holds a [`crate::error::DropReason`] cast to
/// `u32`.
pub const TYPE_DROP: u8 = 1;
/// Summary record standing in for one or more suppressed records;
/// `metadata` holds a merged count.
pub const TYPE_SKIP: u8 = 2;

const TIMESTAMP_MASK: u32 = 0x00FF_FFFF;

/// One 24-byte switch packet log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp_usec: u32,
    pub kind: u8,
    pub source_port: u8,
    pub dst_mac: [u8; 6],
    pub src_mac: [u8; 6],
    pub ethertype: u16,
    pub vlan_tci: u16,
    pub metadata: u32,
}

impl LogRecord {
    /// Pack into the 24-byte wire form.
    pub fn to_bytes(&self) -> [u8; 24] {
        let mut out = [0u8; 24];
        let ts = self.timestamp_usec & TIMESTAMP_MASK;
        let type_port = ((self.kind as u32 & 0x7) << 5) | (self.source_port as u32 & 0x1F);
        out[0..3].copy_from_slice(&ts.to_be_bytes()[1..4]);
        out[3] = type_port as u8;
        out[4..10].copy_from_slice(&self.dst_mac);
        out[10..16].copy_from_slice(&self.src_mac);
        out[16..18].copy_from_slice(&self.ethertype.to_be_bytes());
        out[18..20].copy_from_slice(&self.vlan_tci.to_be_bytes());
        out[20..24].copy_from_slice(&self.metadata.to_be_bytes());
        out
    }

    /// Unpack from the 24-byte wire form.
    pub fn from_bytes(data: &[u8; 24]) -> Self {
        let ts = u32::from_be_bytes([0, data[0], data[1], data[2]]);
        let kind = (data[3] >> 5) & 0x7;
        let source_port = data[3] & 0x1F;
        let mut dst_mac = [0u8; 6];
        let mut src_mac = [0u8; 6];
        dst_mac.copy_from_slice(&data[4..10]);
        src_mac.copy_from_slice(&data[10..16]);
        let ethertype = u16::from_be_bytes([data[16], data[17]]);
        let vlan_tci = u16::from_be_bytes([data[18], data[19]]);
        let metadata = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);
        LogRecord { timestamp_usec: ts, kind, source_port, dst_mac, src_mac, ethertype, vlan_tci, metadata }
    }
}

/// Receives finished switch log records.
pub trait SwitchLogHandler {
    /// Called once per emitted record.
    fn record(&self, rec: &LogRecord);
}

/// Per-port and aggregate counters, updated from every delivered record.
#[derive(Debug, Default, Clone, Copy)]
pub struct PortStats {
    pub broadcast_rx: u64,
    pub total_rx: u64,
    pub total_tx: u64,
    pub overflow: u64,
    pub bad_packet: u64,
    pub errors: u64,
}

/// Accumulates [`PortStats`] per source port from a stream of records.
#[derive(Default)]
pub struct StatsHandler {
    ports: RefCell<Vec<PortStats>>,
}

impl StatsHandler {
    /// Create an empty accumulator sized for `num_ports` ports.
    pub fn new(num_ports: usize) -> Self {
        StatsHandler { ports: RefCell::new(vec![PortStats::default(); num_ports]) }
    }

    /// Snapshot the counters for one port.
    pub fn stats(&self, port: usize) -> PortStats {
        self.ports.borrow().get(port).copied().unwrap_or_default()
    }
}

impl SwitchLogHandler for StatsHandler {
    fn record(&self, rec: &LogRecord) {
        let mut ports = self.ports.borrow_mut();
        let idx = rec.source_port as usize;
        if idx >= ports.len() {
            return;
        }
        let stats = &mut ports[idx];
        match rec.kind {
            TYPE_KEEP => {
                stats.total_rx += 1;
                if rec.dst_mac.iter().all(|b| *b == 0xFF) {
                    stats.broadcast_rx += 1;
                }
                stats.total_tx += rec.metadata.count_ones() as u64;
            }
            TYPE_DROP => {
                stats.total_rx += 1;
                if rec.metadata == crate::error::DropReason::Overflow as u32 {
                    stats.overflow += 1;
                } else if rec.metadata == crate::error::DropReason::BadFrame as u32 {
                    stats.bad_packet += 1;
                } else {
                    stats.errors += 1;
                }
            }
            _ => {}
        }
    }
}

/// Rate-limits by merging runs of records into SKIP summaries once the
/// downstream sink is nearly full.
pub struct RateLimitedHandler<W: std::io::Write> {
    sink: RefCell<W>,
    high_watermark: usize,
    written: RefCell<usize>,
    skipped: RefCell<u32>,
}

impl<W: std::io::Write> RateLimitedHandler<W> {
    /// Create a handler that stops writing full records once `written`
    /// reaches `high_watermark` bytes, merging subsequent records into a
    /// single SKIP summary instead.
    pub fn new(sink: W, high_watermark: usize) -> Self {
        RateLimitedHandler {
            sink: RefCell::new(sink),
            high_watermark,
            written: RefCell::new(0),
            skipped: RefCell::new(0),
        }
    }

    fn flush_skip_summary(&self) {
        let mut skipped = self.skipped.borrow_mut();
        if *skipped > 0 {
            let rec = LogRecord {
                timestamp_usec: 0,
                kind: TYPE_SKIP,
                source_port: 0,
                dst_mac: [0; 6],
                src_mac: [0; 6],
                ethertype: 0,
                vlan_tci: 0,
                metadata: *skipped,
            };
            let _ = self.sink.borrow_mut().write_all(&rec.to_bytes());
            *skipped = 0;
        }
    }
}

impl<W: std::io::Write> SwitchLogHandler for RateLimitedHandler<W> {
    fn record(&self, rec: &LogRecord) {
        let mut written = self.written.borrow_mut();
        if *written >= self.high_watermark {
            *self.skipped.borrow_mut() += 1;
            return;
        }
        drop(written);
        self.flush_skip_summary();
        if self.sink.borrow_mut().write_all(&rec.to_bytes()).is_ok() {
            *self.written.borrow_mut() += 24;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trips_through_bytes() {
        let rec = LogRecord {
            timestamp_usec: 0x00AB_CDEF,
            kind: TYPE_KEEP,
            source_port: 5,
            dst_mac: [1, 2, 3, 4, 5, 6],
            src_mac: [0xAA; 6],
            ethertype: 0x0800,
            vlan_tci: 0x2007,
            metadata: 0b1011,
        };
        let bytes = rec.to_bytes();
        assert_eq!(bytes.len(), 24);
        let back = LogRecord::from_bytes(&bytes);
        assert_eq!(back, rec);
    }

    #[test]
    fn timestamp_truncates_to_24_bits() {
        let rec = LogRecord {
            timestamp_usec: 0xFFAB_CDEF,
            kind: TYPE_DROP,
            source_port: 0,
            dst_mac: [0; 6],
            src_mac: [0; 6],
            ethertype: 0,
            vlan_tci: 0,
            metadata: 0,
        };
        let back = LogRecord::from_bytes(&rec.to_bytes());
        assert_eq!(back.timestamp_usec, 0x00AB_CDEF);
    }

    #[test]
    fn stats_handler_counts_broadcast_and_drops() {
        let stats = StatsHandler::new(2);
        stats.record(&LogRecord {
            timestamp_usec: 0,
            kind: TYPE_KEEP,
            source_port: 0,
            dst_mac: [0xFF; 6],
            src_mac: [0; 6],
            ethertype: 0,
            vlan_tci: 0,
            metadata: 0b110,
        });
        stats.record(&LogRecord {
            timestamp_usec: 0,
            kind: TYPE_DROP,
            source_port: 0,
            dst_mac: [0; 6],
            src_mac: [0; 6],
            ethertype: 0,
            vlan_tci: 0,
            metadata: crate::error::DropReason::Overflow as u32,
        });
        let s = stats.stats(0);
        assert_eq!(s.broadcast_rx, 1);
        assert_eq!(s.total_rx, 2);
        assert_eq!(s.total_tx, 2);
        assert_eq!(s.overflow, 1);
    }

    #[test]
    fn rate_limited_handler_merges_skips_once_full() {
        let handler = RateLimitedHandler::new(Vec::new(), 24);
        let rec = LogRecord {
            timestamp_usec: 0,
            kind: TYPE_KEEP,
            source_port: 0,
            dst_mac: [0; 6],
            src_mac: [0; 6],
            ethertype: 0,
            vlan_tci: 0,
            metadata: 0,
        };
        handler.record(&rec); // fills the watermark
        handler.record(&rec); // merged into a SKIP count
        handler.record(&rec);
        assert_eq!(*handler.skipped.borrow(), 2);
    }
}
