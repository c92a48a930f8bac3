//! Zero-copy multi-buffer packet store.
//!
//! Grounded in §3/§4.E of the specification: a contiguous chunk arena, a
//! free list, a slab of live packets (never raw pointers — see the
//! re-expression called for in the design notes), and priority-ordered
//! reader fan-out. `MultiWriter` builds one packet at a time;
//! `MultiReaderPriority` drains packets handed to it by `accept`.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use crate::buffer::chunk::{Chunk, DEFAULT_CHUNK_SIZE};
use crate::buffer::multi_packet::{MultiPacket, PacketId, USER_SLOTS};
use crate::io::Writeable;

/// Subclass hook for packet delivery, grounded in the `deliver(pkt)`
/// virtual method of `MultiBuffer` (§4.E). If no hook is registered,
/// delivered packets are fanned out to every live [`MultiReader`] ordered
/// by `(priority, registration order)`.
pub trait DeliverHook {
    /// A packet finished writing and is ready for delivery.
    fn deliver(&self, buf: &MultiBuffer, pkt: PacketId);
}

/// Something that can accept a delivered packet, incrementing its
/// reference count on success.
pub trait MultiReader {
    /// Offer `pkt` to this reader. Returns true if accepted.
    fn accept(&self, pkt: PacketId) -> bool;
    /// Declared fan-out priority; higher values deliver first.
    fn priority(&self) -> i8;
}

struct ReaderSlot {
    priority: i8,
    order: usize,
    reader: Weak<dyn MultiReader>,
}

/// Shared-memory core of the packet store.
pub struct MultiBuffer {
    chunks: RefCell<Vec<Chunk>>,
    free_chunks: RefCell<Vec<usize>>,
    packets: RefCell<Vec<Option<MultiPacket>>>,
    packet_free: RefCell<Vec<usize>>,
    readers: RefCell<Vec<ReaderSlot>>,
    next_order: Cell<usize>,
    hook: RefCell<Option<Rc<dyn DeliverHook>>>,
    pending: RefCell<VecDeque<PacketId>>,
}

impl MultiBuffer {
    /// Allocate an arena of `num_chunks` fixed-size chunks.
    pub fn new(num_chunks: usize) -> Rc<Self> {
        let mut chunks = Vec::with_capacity(num_chunks);
        let mut free_chunks = Vec::with_capacity(num_chunks);
        for i in 0..num_chunks {
            chunks.push(Chunk::empty());
            free_chunks.push(num_chunks - 1 - i);
        }
        Rc::new(MultiBuffer {
            chunks: RefCell::new(chunks),
            free_chunks: RefCell::new(free_chunks),
            packets: RefCell::new(Vec::new()),
            packet_free: RefCell::new(Vec::new()),
            readers: RefCell::new(Vec::new()),
            next_order: Cell::new(0),
            hook: RefCell::new(None),
            pending: RefCell::new(VecDeque::new()),
        })
    }

    /// Number of chunks currently on the free list.
    pub fn free_chunk_count(&self) -> usize {
        self.free_chunks.borrow().len()
    }

    /// Install a custom delivery hook (e.g. a switch core's ingress
    /// pipeline), replacing the default fan-out-to-all-readers behavior.
    pub fn set_hook(&self, hook: Rc<dyn DeliverHook>) {
        *self.hook.borrow_mut() = Some(hook);
    }

    /// Register a reader for the default fan-out path. Readers are kept
    /// sorted by `(priority desc, registration order asc)` so that ties
    /// resolve to first-registered-first-delivered, matching §5's ordering
    /// guarantee.
    pub fn register_reader(&self, reader: &Rc<dyn MultiReader>) {
        let order = self.next_order.get();
        self.next_order.set(order + 1);
        let mut readers = self.readers.borrow_mut();
        readers.push(ReaderSlot { priority: reader.priority(), order, reader: Rc::downgrade(reader) });
        readers.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.order.cmp(&b.order)));
    }

    /// Begin writing a new packet.
    pub fn writer(self: &Rc<Self>) -> MultiWriter {
        MultiWriter {
            buf: Rc::clone(self),
            head: None,
            tail: None,
            length: 0,
            header_len: None,
            overflowed: false,
            user: [0; USER_SLOTS],
            priority: 0,
        }
    }

    fn alloc_chunk(&self) -> Option<usize> {
        self.free_chunks.borrow_mut().pop()
    }

    fn free_chunk_chain(&self, head: usize) {
        let mut next = Some(head);
        let mut chunks = self.chunks.borrow_mut();
        let mut free = self.free_chunks.borrow_mut();
        while let Some(idx) = next {
            next = chunks[idx].next;
            chunks[idx].reset();
            free.push(idx);
        }
    }

    fn alloc_packet_slot(&self, pkt: MultiPacket) -> PacketId {
        let mut packets = self.packets.borrow_mut();
        if let Some(idx) = self.packet_free.borrow_mut().pop() {
            packets[idx] = Some(pkt);
            PacketId(idx)
        } else {
            packets.push(Some(pkt));
            PacketId(packets.len() - 1)
        }
    }

    /// Run `f` against the live packet's metadata, if it still exists.
    pub fn with_packet<R>(&self, id: PacketId, f: impl FnOnce(&MultiPacket) -> R) -> Option<R> {
        self.packets.borrow().get(id.0).and_then(|p| p.as_ref()).map(f)
    }

    /// Run `f` against the live packet's metadata, mutably.
    pub fn with_packet_mut<R>(&self, id: PacketId, f: impl FnOnce(&mut MultiPacket) -> R) -> Option<R> {
        self.packets.borrow_mut().get_mut(id.0).and_then(|p| p.as_mut()).map(f)
    }

    /// Increment a live packet's reference count. Returns false if the
    /// packet no longer exists.
    pub fn accept_ref(&self, id: PacketId) -> bool {
        self.with_packet_mut(id, |p| p.refct += 1).is_some()
    }

    /// Decrement a live packet's reference count; when it reaches zero the
    /// chunk chain and packet slot are released back to their free lists.
    pub fn release_ref(&self, id: PacketId) {
        let (should_free, head) = {
            let mut packets = self.packets.borrow_mut();
            match packets.get_mut(id.0).and_then(|p| p.as_mut()) {
                Some(p) => {
                    debug_assert!(p.refct > 0, "refcount underflow");
                    p.refct = p.refct.saturating_sub(1);
                    (p.refct == 0, p.head_chunk)
                }
                None => return,
            }
        };
        if should_free {
            self.free_chunk_chain(head);
            self.packets.borrow_mut()[id.0] = None;
            self.packet_free.borrow_mut().push(id.0);
        }
    }

    /// Read the byte at `offset` within a live packet.
    pub fn byte_at(&self, id: PacketId, offset: usize) -> u8 {
        let head = match self.with_packet(id, |p| p.head_chunk) {
            Some(h) => h,
            None => return 0,
        };
        let chunk_idx = offset / DEFAULT_CHUNK_SIZE;
        let within = offset % DEFAULT_CHUNK_SIZE;
        let chunks = self.chunks.borrow();
        let mut cur = head;
        for _ in 0..chunk_idx {
            match chunks[cur].next {
                Some(n) => cur = n,
                None => return 0,
            }
        }
        chunks[cur].data[within]
    }

    /// Overwrite `bytes` starting at `offset`, bounded by the packet's
    /// recorded header length. Returns `false` (an internal invariant
    /// violation, per §4.E) if the write would cross that boundary.
    pub fn overwrite(&self, id: PacketId, offset: usize, bytes: &[u8]) -> bool {
        let (head, header_len) = match self.with_packet(id, |p| (p.head_chunk, p.header_len)) {
            Some(v) => v,
            None => return false,
        };
        if offset + bytes.len() > header_len {
            return false;
        }
        let mut chunks = self.chunks.borrow_mut();
        for (i, b) in bytes.iter().enumerate() {
            let pos = offset + i;
            let chunk_idx = pos / DEFAULT_CHUNK_SIZE;
            let within = pos % DEFAULT_CHUNK_SIZE;
            let mut cur = head;
            for _ in 0..chunk_idx {
                cur = chunks[cur].next.expect("chunk chain shorter than header_len");
            }
            chunks[cur].data[within] = *b;
        }
        true
    }

    fn on_write_finalized(self: &Rc<Self>, pkt: PacketId) {
        let hook = self.hook.borrow().clone();
        match hook {
            Some(h) => h.deliver(self, pkt),
            None => self.default_deliver(pkt),
        }
    }

    fn default_deliver(&self, pkt: PacketId) {
        let readers: Vec<_> = self.readers.borrow().iter().filter_map(|s| s.reader.upgrade()).collect();
        let mut any = false;
        for r in readers {
            if r.accept(pkt) {
                any = true;
            }
        }
        if !any {
            self.pending.borrow_mut().push_back(pkt);
        }
    }

    /// Pop the next packet that no registered reader accepted (useful in
    /// tests exercising the default fan-out path directly).
    pub fn take_pending(&self) -> Option<PacketId> {
        self.pending.borrow_mut().pop_front()
    }

    /// Release a packet's chunks immediately if it was never accepted by any
    /// reader (`refct == 0`). Used by a [`DeliverHook`] that decides to drop
    /// a packet before any reader sees it, so its chunks don't leak.
    pub fn discard_unreferenced(&self, id: PacketId) {
        let head = match self.with_packet(id, |p| (p.refct, p.head_chunk)) {
            Some((0, head)) => head,
            _ => return,
        };
        self.free_chunk_chain(head);
        self.packets.borrow_mut()[id.0] = None;
        self.packet_free.borrow_mut().push(id.0);
    }
}

/// Builds one packet, chunk by chunk, implementing [`Writeable`].
pub struct MultiWriter {
    buf: Rc<MultiBuffer>,
    head: Option<usize>,
    tail: Option<usize>,
    length: usize,
    header_len: Option<usize>,
    overflowed: bool,
    user: [u32; USER_SLOTS],
    priority: i8,
}

impl MultiWriter {
    /// Set per-packet metadata slot `idx` (source port / VLAN word / etc).
    pub fn set_user(&mut self, idx: usize, val: u32) {
        self.user[idx] = val;
    }

    /// Set the declared fan-out priority for this packet.
    pub fn set_priority(&mut self, priority: i8) {
        self.priority = priority;
    }

    /// Freeze the "original header length" bound now, rather than at
    /// `write_finalize` time (used when the header is shorter than the
    /// full write, e.g. a packet with payload following a fixed header).
    pub fn set_header_len(&mut self, len: usize) {
        self.header_len = Some(len);
    }

    fn ensure_tail(&mut self) -> bool {
        if self.tail.is_some() {
            return true;
        }
        match self.buf.alloc_chunk() {
            Some(idx) => {
                self.head = Some(idx);
                self.tail = Some(idx);
                true
            }
            None => {
                self.overflowed = true;
                false
            }
        }
    }
}

impl Writeable for MultiWriter {
    fn get_write_space(&self) -> usize {
        if self.overflowed {
            0
        } else {
            usize::MAX
        }
    }

    fn write_u8(&mut self, val: u8) {
        if self.overflowed {
            return;
        }
        if !self.ensure_tail() {
            return;
        }
        let tail = self.tail.unwrap();
        let mut chunks = self.buf.chunks.borrow_mut();
        if chunks[tail].used == DEFAULT_CHUNK_SIZE {
            drop(chunks);
            let next = match self.buf.alloc_chunk() {
                Some(idx) => idx,
                None => {
                    self.overflowed = true;
                    return;
                }
            };
            self.buf.chunks.borrow_mut()[tail].next = Some(next);
            self.tail = Some(next);
            chunks = self.buf.chunks.borrow_mut();
        }
        let tail = self.tail.unwrap();
        let used = chunks[tail].used;
        chunks[tail].data[used] = val;
        chunks[tail].used += 1;
        drop(chunks);
        self.length += 1;
    }

    fn write_finalize(&mut self) -> bool {
        if self.overflowed {
            self.write_abort();
            return false;
        }
        let head = match self.head {
            Some(h) => h,
            None => return true, // empty packet: nothing to deliver
        };
        let header_len = self.header_len.unwrap_or(self.length);
        let pkt = MultiPacket {
            head_chunk: head,
            length: self.length,
            refct: 0,
            user: self.user,
            priority: self.priority,
            header_len,
        };
        let id = self.buf.alloc_packet_slot(pkt);
        self.head = None;
        self.tail = None;
        self.buf.on_write_finalized(id);
        true
    }

    fn write_abort(&mut self) {
        if let Some(head) = self.head {
            self.buf.free_chunk_chain(head);
        }
        self.head = None;
        self.tail = None;
        self.length = 0;
        self.overflowed = false;
    }
}

/// A [`crate::io::Readable`] that drains packets handed to it via
/// [`MultiReader::accept`], in FIFO order, decrementing the packet's
/// reference count on `read_finalize`.
pub struct MultiReaderPriority {
    buf: Rc<MultiBuffer>,
    priority: i8,
    queue: RefCell<VecDeque<PacketId>>,
    offset: Cell<usize>,
    enabled: Cell<bool>,
}

impl MultiReaderPriority {
    /// Create a reader over `buf` at the given fan-out priority. Does not
    /// register itself; call [`MultiBuffer::register_reader`] separately
    /// with the `Rc<dyn MultiReader>` view if default fan-out is desired.
    pub fn new(buf: Rc<MultiBuffer>, priority: i8) -> Rc<Self> {
        Rc::new(MultiReaderPriority {
            buf,
            priority,
            queue: RefCell::new(VecDeque::new()),
            offset: Cell::new(0),
            enabled: Cell::new(true),
        })
    }

    /// Enable or disable this reader. A disabled reader refuses `accept`
    /// and its queue is flushed.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
        if !enabled {
            self.flush();
        }
    }

    /// Release every queued packet without reading it.
    pub fn flush(&self) {
        for pkt in self.queue.borrow_mut().drain(..) {
            self.buf.release_ref(pkt);
        }
        self.offset.set(0);
    }

    /// The packet currently at the front of the queue, if any.
    pub fn current(&self) -> Option<PacketId> {
        self.queue.borrow().front().copied()
    }

    fn current_len(&self) -> usize {
        self.current().and_then(|id| self.buf.with_packet(id, |p| p.length)).unwrap_or(0)
    }
}

impl MultiReader for MultiReaderPriority {
    fn accept(&self, pkt: PacketId) -> bool {
        if !self.enabled.get() {
            return false;
        }
        if !self.buf.accept_ref(pkt) {
            return false;
        }
        self.queue.borrow_mut().push_back(pkt);
        true
    }

    fn priority(&self) -> i8 {
        self.priority
    }
}

impl crate::io::Readable for MultiReaderPriority {
    fn get_read_ready(&self) -> usize {
        self.current_len().saturating_sub(self.offset.get())
    }

    fn read_next(&self) -> u8 {
        match self.current() {
            Some(id) => {
                let off = self.offset.get();
                let b = self.buf.byte_at(id, off);
                self.offset.set(off + 1);
                b
            }
            None => {
                self.read_underflow();
                0
            }
        }
    }

    fn read_finalize(&self) {
        if let Some(id) = self.queue.borrow_mut().pop_front() {
            self.buf.release_ref(id);
        }
        self.offset.set(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Readable;

    #[test]
    fn write_then_read_roundtrips_across_chunk_boundary() {
        let buf = MultiBuffer::new(4);
        let reader = MultiReaderPriority::new(Rc::clone(&buf), 0);
        let reader_trait: Rc<dyn MultiReader> = reader.clone();
        buf.register_reader(&reader_trait);

        let mut w = buf.writer();
        let payload: Vec<u8> = (0..(DEFAULT_CHUNK_SIZE + 10)).map(|i| (i % 251) as u8).collect();
        w.write_bytes(&payload);
        assert!(w.write_finalize());

        assert_eq!(reader.get_read_ready(), payload.len());
        let mut out = vec![0u8; payload.len()];
        reader.read_bytes(&mut out).unwrap();
        assert_eq!(out, payload);
        reader.read_finalize();
    }

    #[test]
    fn refcount_releases_chunks_after_k_finalizes() {
        let buf = MultiBuffer::new(4);
        let r1 = MultiReaderPriority::new(Rc::clone(&buf), 1);
        let r2 = MultiReaderPriority::new(Rc::clone(&buf), 0);
        let t1: Rc<dyn MultiReader> = r1.clone();
        let t2: Rc<dyn MultiReader> = r2.clone();
        buf.register_reader(&t1);
        buf.register_reader(&t2);

        let mut w = buf.writer();
        w.write_bytes(&[1, 2, 3]);
        assert!(w.write_finalize());

        let before_free = buf.free_chunk_count();
        assert_eq!(before_free, 3);

        r1.read_finalize();
        assert_eq!(buf.free_chunk_count(), 3); // r2 still holds a reference
        r2.read_finalize();
        assert_eq!(buf.free_chunk_count(), 4);
    }

    #[test]
    fn overwrite_refuses_to_cross_header_boundary() {
        let buf = MultiBuffer::new(2);
        let mut w = buf.writer();
        w.write_bytes(&[1, 2, 3, 4]);
        w.set_header_len(2);
        assert!(w.write_finalize());
        let id = PacketId(0);
        assert!(buf.overwrite(id, 0, &[9, 9]));
        assert!(!buf.overwrite(id, 1, &[9, 9]));
    }
}
