//! PTP measurement cache (§4.L): accumulates t1..t4 keyed by
//! `(source port id, sequence id)` and fires the registered callback once
//! a set completes.

use std::cell::RefCell;
use std::num::NonZeroUsize;
use std::rc::Rc;

use lru::LruCache;

use crate::ptp::header::PortIdentity;

/// Capacity of the measurement ring. The least-recently-touched unfinished
/// entry is evicted on overflow and counted as a cache miss, not an error.
pub const CACHE_CAPACITY: usize = 8;

/// One (port, seq) slot's accumulated timestamps. All fields start
/// unset; a measurement is ready once t1..t4 are all `Some`.
#[derive(Debug, Clone, Copy, Default)]
struct Entry {
    t1: Option<i128>,
    t2: Option<i128>,
    t3: Option<i128>,
    t4: Option<i128>,
    correction1: i64,
    correction2: i64,
    correction4: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
struct Key {
    port: PortIdentity,
    seq: u16,
}

/// A completed four-timestamp exchange, ready for offset/delay computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurement {
    pub port: PortIdentity,
    pub seq: u16,
    pub t1: i128,
    pub t2: i128,
    pub t3: i128,
    pub t4: i128,
    pub correction1: i64,
    pub correction2: i64,
    pub correction4: i64,
}

impl Measurement {
    /// Mean path delay: `((t2 - t1) + (t4 - t3)) / 2`, corrections applied
    /// to the legs that carried them.
    pub fn mean_path_delay(&self) -> i128 {
        let fwd = (self.t2 - self.t1) - self.correction1 as i128 - self.correction2 as i128;
        let rev = (self.t4 - self.t3) - self.correction4 as i128;
        (fwd + rev) / 2
    }

    /// Offset from master: `(t2 - t1) - mean_path_delay`, corrections
    /// applied to the forward leg.
    pub fn offset_from_master(&self) -> i128 {
        let fwd = (self.t2 - self.t1) - self.correction1 as i128 - self.correction2 as i128;
        fwd - self.mean_path_delay()
    }
}

/// Receives completed measurements. Registered callbacks are invoked
/// exactly once per completed (t1, t2, t3, t4) set.
pub trait Callback {
    fn ptp_ready(&self, measurement: &Measurement);
}

/// Bounded ring of in-flight measurement slots, backed by an LRU cache so
/// that a slot touched by a later arrival survives longer than one that
/// has been sitting untouched.
pub struct MeasurementCache {
    slots: RefCell<LruCache<Key, Entry>>,
    callbacks: RefCell<Vec<Rc<dyn Callback>>>,
    cache_misses: RefCell<u64>,
}

impl MeasurementCache {
    pub fn new() -> Self {
        MeasurementCache {
            slots: RefCell::new(LruCache::new(NonZeroUsize::new(CACHE_CAPACITY).unwrap())),
            callbacks: RefCell::new(Vec::new()),
            cache_misses: RefCell::new(0),
        }
    }

    pub fn register(&self, callback: Rc<dyn Callback>) {
        self.callbacks.borrow_mut().push(callback);
    }

    pub fn cache_misses(&self) -> u64 {
        *self.cache_misses.borrow()
    }

    /// Apply `update` to the slot for `key`, creating it if absent. If
    /// inserting pushes the cache over capacity, the evicted entry counts
    /// as a cache miss regardless of whether it was complete.
    fn update_slot(&self, key: Key, update: impl FnOnce(&mut Entry)) {
        let mut slots = self.slots.borrow_mut();
        if slots.get_mut(&key).is_none() {
            let before = slots.len();
            slots.put(key, Entry::default());
            if before == CACHE_CAPACITY {
                *self.cache_misses.borrow_mut() += 1;
            }
        }
        update(slots.get_mut(&key).expect("just inserted"));
    }

    /// SYNC arrival: record t2 (local Rx time) and its correction field.
    pub fn on_sync(&self, port: PortIdentity, seq: u16, t2: i128, correction2: i64) {
        let key = Key { port, seq };
        self.update_slot(key, |e| {
            e.t2 = Some(t2);
            e.correction2 = correction2;
        });
        self.maybe_complete(key);
    }

    /// FOLLOW_UP arrival: record t1 (master's Tx time) and its correction.
    pub fn on_follow_up(&self, port: PortIdentity, seq: u16, t1: i128, correction1: i64) {
        let key = Key { port, seq };
        self.update_slot(key, |e| {
            e.t1 = Some(t1);
            e.correction1 = correction1;
        });
        self.maybe_complete(key);
    }

    /// DELAY_REQ transmitted: record t3 (local Tx time).
    pub fn on_delay_req_sent(&self, port: PortIdentity, seq: u16, t3: i128) {
        let key = Key { port, seq };
        self.update_slot(key, |e| e.t3 = Some(t3));
        self.maybe_complete(key);
    }

    /// DELAY_RESP arrival: record t4 (master's Rx time) and its correction.
    pub fn on_delay_resp(&self, port: PortIdentity, seq: u16, t4: i128, correction4: i64) {
        let key = Key { port, seq };
        self.update_slot(key, |e| {
            e.t4 = Some(t4);
            e.correction4 = correction4;
        });
        self.maybe_complete(key);
    }

    fn maybe_complete(&self, key: Key) {
        let measurement = {
            let mut slots = self.slots.borrow_mut();
            let e = match slots.peek(&key) {
                Some(e) => *e,
                None => return,
            };
            let (t1, t2, t3, t4) = match (e.t1, e.t2, e.t3, e.t4) {
                (Some(a), Some(b), Some(c), Some(d)) => (a, b, c, d),
                _ => return,
            };
            slots.pop(&key);
            Measurement {
                port: key.port,
                seq: key.seq,
                t1,
                t2,
                t3,
                t4,
                correction1: e.correction1,
                correction2: e.correction2,
                correction4: e.correction4,
            }
        };
        for cb in self.callbacks.borrow().iter() {
            cb.ptp_ready(&measurement);
        }
    }
}

impl Default for MeasurementCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn port(n: u16) -> PortIdentity {
        PortIdentity { clock_identity: [0xAA; 8], port_number: n }
    }

    struct Recorder {
        count: Cell<u32>,
        last: RefCell<Option<Measurement>>,
    }

    impl Callback for Recorder {
        fn ptp_ready(&self, m: &Measurement) {
            self.count.set(self.count.get() + 1);
            *self.last.borrow_mut() = Some(*m);
        }
    }

    #[test]
    fn completes_exactly_once_for_full_set() {
        let cache = MeasurementCache::new();
        let rec = Rc::new(Recorder { count: Cell::new(0), last: RefCell::new(None) });
        cache.register(rec.clone());

        cache.on_sync(port(1), 5, 2_000, 0);
        assert_eq!(rec.count.get(), 0);
        cache.on_follow_up(port(1), 5, 1_000, 0);
        assert_eq!(rec.count.get(), 0);
        cache.on_delay_req_sent(port(1), 5, 3_000);
        assert_eq!(rec.count.get(), 0);
        cache.on_delay_resp(port(1), 5, 4_000, 0);
        assert_eq!(rec.count.get(), 1);

        let m = rec.last.borrow().unwrap();
        assert_eq!((m.t1, m.t2, m.t3, m.t4), (1_000, 2_000, 3_000, 4_000));
    }

    #[test]
    fn overflow_evicts_oldest_as_cache_miss() {
        let cache = MeasurementCache::new();
        for seq in 0..(CACHE_CAPACITY as u16 + 2) {
            cache.on_sync(port(1), seq, seq as i128, 0);
        }
        assert!(cache.cache_misses() >= 2);
    }

    #[test]
    fn mean_path_delay_and_offset_match_symmetric_example() {
        let m = Measurement {
            port: port(1),
            seq: 0,
            t1: 1_000_000_000,
            t2: 1_000_000_500,
            t3: 1_000_001_000,
            t4: 1_000_001_400,
            correction1: 0,
            correction2: 0,
            correction4: 0,
        };
        // forward leg = 500, reverse leg = 400, mean delay = 450
        assert_eq!(m.mean_path_delay(), 450);
        assert_eq!(m.offset_from_master(), 50);
    }
}
