//! UDP socket: a (local port, remote endpoint) pair with ARP-aware
//! connect (§4.K).

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::ip::arp::{Arp, ResolutionListener};

const MULTICAST_PREFIX: u8 = 0xE0;
const BROADCAST: [u8; 4] = [255, 255, 255, 255];

/// Allocates ephemeral source ports from a configurable range, matching
/// the original's fixed dynamic-port window rather than the OS-assigned
/// range a hosted stack would use.
pub struct DynamicPorts {
    low: u16,
    high: u16,
    cursor: Cell<u16>,
    in_use: RefCell<HashSet<u16>>,
}

impl DynamicPorts {
    /// Create an allocator over `[low, high]` inclusive.
    pub fn new(low: u16, high: u16) -> Self {
        DynamicPorts { low, high, cursor: Cell::new(low), in_use: RefCell::new(HashSet::new()) }
    }

    /// Allocate the next free port, wrapping around the range once.
    /// Fails if every port in the range is already bound.
    pub fn allocate(&self) -> Result<u16> {
        let span = self.high - self.low + 1;
        for _ in 0..span {
            let port = self.cursor.get();
            self.cursor.set(if port == self.high { self.low } else { port + 1 });
            if self.in_use.borrow_mut().insert(port) {
                return Ok(port);
            }
        }
        Err(Error::ResourceExhausted { resource: "udp dynamic port range" })
    }

    /// Release a previously allocated port.
    pub fn release(&self, port: u16) {
        self.in_use.borrow_mut().remove(&port);
    }
}

/// One UDP socket: a locally bound port paired with a remote endpoint.
/// MAC resolution for the remote endpoint is driven by [`Arp`]; `ready_tx`
/// reflects whether a frame can be sent right now.
pub struct Socket {
    local_port: Cell<u16>,
    remote_ip: Cell<[u8; 4]>,
    remote_port: Cell<u16>,
    remote_mac: Cell<Option<[u8; 6]>>,
    arp: Rc<Arp>,
}

impl Socket {
    /// Create an unbound, unconnected socket.
    pub fn new(arp: Rc<Arp>) -> Rc<Self> {
        Rc::new(Socket {
            local_port: Cell::new(0),
            remote_ip: Cell::new([0; 4]),
            remote_port: Cell::new(0),
            remote_mac: Cell::new(None),
            arp,
        })
    }

    /// Bind to a specific local port.
    pub fn bind(&self, port: u16) {
        self.local_port.set(port);
    }

    /// Auto-bind to the next free port in `ports`.
    pub fn auto_bind(&self, ports: &DynamicPorts) -> Result<()> {
        self.local_port.set(ports.allocate()?);
        Ok(())
    }

    /// Current local port, or 0 if unbound.
    pub fn local_port(&self) -> u16 {
        self.local_port.get()
    }

    /// Connect to a remote endpoint. If `mac` is not supplied and the
    /// destination is neither broadcast nor multicast, triggers ARP
    /// resolution and returns the request the caller should transmit.
    pub fn connect(self: &Rc<Self>, ip: [u8; 4], port: u16, mac: Option<[u8; 6]>) -> Option<crate::ip::arp::ArpMessage> {
        self.remote_ip.set(ip);
        self.remote_port.set(port);
        if let Some(mac) = mac {
            self.remote_mac.set(Some(mac));
            return None;
        }
        if ip == BROADCAST || ip[0] & 0xF0 == MULTICAST_PREFIX {
            self.remote_mac.set(Some([0xFF; 6]));
            return None;
        }
        self.remote_mac.set(None);
        self.arp.add_listener(Rc::clone(self) as Rc<dyn ResolutionListener>);
        Some(self.arp.request(local_ip_placeholder(), [0; 6], ip))
    }

    /// True once a frame can be transmitted: the remote MAC is known, or
    /// the destination is broadcast/multicast.
    pub fn ready_tx(&self) -> bool {
        self.remote_mac.get().is_some()
    }

    /// Remote endpoint this socket is connected to.
    pub fn remote(&self) -> ([u8; 4], u16, Option<[u8; 6]>) {
        (self.remote_ip.get(), self.remote_port.get(), self.remote_mac.get())
    }
}

impl ResolutionListener for Socket {
    fn resolved(&self, ip: [u8; 4], mac: [u8; 6]) {
        if ip == self.remote_ip.get() {
            self.remote_mac.set(Some(mac));
        }
    }
}

// The socket doesn't own the local IP used as the ARP sender address;
// that's supplied by whatever router/interface owns it in a full
// integration. Kept local to this module until that wiring lands.
fn local_ip_placeholder() -> [u8; 4] {
    [0; 4]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_bind_allocates_and_exhausts() {
        let ports = DynamicPorts::new(50000, 50001);
        let arp = Rc::new(Arp::new());
        let a = Socket::new(Rc::clone(&arp));
        let b = Socket::new(Rc::clone(&arp));
        let c = Socket::new(Rc::clone(&arp));
        a.auto_bind(&ports).unwrap();
        b.auto_bind(&ports).unwrap();
        assert!(c.auto_bind(&ports).is_err());
    }

    #[test]
    fn broadcast_connect_is_immediately_ready() {
        let arp = Rc::new(Arp::new());
        let sock = Socket::new(arp);
        let req = sock.connect([255, 255, 255, 255], 69, None);
        assert!(req.is_none());
        assert!(sock.ready_tx());
    }

    #[test]
    fn unicast_connect_without_mac_defers_until_resolved() {
        let arp = Rc::new(Arp::new());
        let sock = Socket::new(Rc::clone(&arp));
        let req = sock.connect([10, 0, 0, 5], 69, None);
        assert!(req.is_some());
        assert!(!sock.ready_tx());
        sock.resolved([10, 0, 0, 5], [1, 2, 3, 4, 5, 6]);
        assert!(sock.ready_tx());
    }
}
