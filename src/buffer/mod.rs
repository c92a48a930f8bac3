//! Zero-copy multi-buffer packet store (§3, §4.E).

pub mod chunk;
pub mod multi_buffer;
pub mod multi_packet;

pub use multi_buffer::{DeliverHook, MultiBuffer, MultiReader, MultiReaderPriority, MultiWriter};
pub use multi_packet::{MultiPacket, PacketId};
