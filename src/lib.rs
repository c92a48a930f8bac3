//! Cooperative event-driven runtime and packet-switching substrate for an
//! embedded Ethernet stack: a polling scheduler, a zero-copy multi-buffer
//! packet store, a layer-2 switch core, an IPv4 router, and the upper-layer
//! protocol adapters (ARP/ICMP/UDP/TFTP/CoAP/PTPv2) that ride on top of it.
//!
//! Module layout mirrors the system's component boundaries (see
//! `SPEC_FULL.md` for the full module map):
//!
//! - [`polling`] / [`interrupts`]: the single-threaded cooperative scheduler
//!   and the `AtomicLock` discipline for interrupt/main-context sharing.
//! - [`buffer`]: the chunked, reference-counted packet arena.
//! - [`eth`]: Ethernet/VLAN framing, plugin chain, and the switch core.
//! - [`ip`]: IPv4 header codec, forwarding table, ARP, ICMP, and the router.
//! - [`udp`]: UDP port dispatch and a minimal connected-socket abstraction.
//! - [`tftp`] / [`coap`]: request/response adapters built on [`udp`].
//! - [`ptp`]: the PTPv2 client state machine and its loop filters.
//! - [`ccsds`]: CCSDS SPP/AOS primary header codecs.
//! - [`crypto`]: the AEAD trait and an `aes-gcm`-backed adapter.
//! - [`io`]: the `Readable`/`Writeable` stream traits everything above is
//!   built on.
//! - [`log`]: the diagnostic logging builder.
//! - [`time`]: the monotonic tick source and `TimeVal` snapshots.
//! - [`error`]: the crate-wide error and drop-reason types.

pub mod buffer;
pub mod ccsds;
pub mod coap;
pub mod crypto;
pub mod error;
pub mod eth;
pub mod interrupts;
pub mod io;
pub mod ip;
pub mod log;
pub mod polling;
pub mod ptp;
pub mod tftp;
pub mod time;
pub mod udp;

pub use error::{DropReason, Error};
