//! Byte & packet stream abstractions.
//!
//! Grounded in `satcat5/io_readable.h` and `io_writeable.h`. `Readable` and
//! `Writeable` are the two core traits every byte source/sink in the stack
//! implements; all integer/float accessors are defined in terms of a single
//! required method (`read_next`/`write_u8`) so that concrete backends need
//! implement only that one primitive plus `get_read_ready`/
//! `get_write_space`.

pub mod readable;
pub mod writeable;

pub use readable::{
    ArrayRead, EventListener, LimitedRead, NullRead, NullSink, Readable, ReadableRedirect,
};
pub use writeable::{ArrayWrite, BlackHole, Writeable, WriteableRedirect};
