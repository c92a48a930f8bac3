//! IPv4 stack: header codec, forwarding table, ARP, ICMP, and the router
//! that ties them together (§2 component C, §4.H/§4.I/§4.J).

pub mod arp;
pub mod header;
pub mod icmp;
pub mod route;
pub mod router;

pub use arp::{Arp, ArpMessage, ResolutionListener};
pub use header::Header;
pub use route::{Route, Table};
pub use router::{ForwardDecision, Router};
