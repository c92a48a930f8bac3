//! Fixed-size packet chunk.
//!
//! Grounded in the `MultiBuffer` chunk arena described in `ip_table.h`'s
//! neighboring buffer headers and the chunked-allocator design called out
//! in §3/§4.E of the specification. A chunk is a fixed-size block of the
//! arena; chunks are linked by index (never by raw pointer) into one
//! logical packet.

/// Default chunk payload size in bytes, matching the spec's "1536 B worth
/// of bytes" default (one Ethernet MTU).
pub const DEFAULT_CHUNK_SIZE: usize = 1536;

/// One fixed-size block of the [`super::MultiBuffer`] arena.
///
/// `next` links to the following chunk of the same packet by arena index;
/// `None` marks the tail. `used` is the number of valid bytes in `data`
/// (always `DEFAULT_CHUNK_SIZE` except for the final chunk of a packet).
pub struct Chunk {
    pub(crate) data: [u8; DEFAULT_CHUNK_SIZE],
    pub(crate) used: usize,
    pub(crate) next: Option<usize>,
}

impl Chunk {
    pub(crate) fn empty() -> Self {
        Chunk { data: [0u8; DEFAULT_CHUNK_SIZE], used: 0, next: None }
    }

    pub(crate) fn reset(&mut self) {
        self.used = 0;
        self.next = None;
    }
}
