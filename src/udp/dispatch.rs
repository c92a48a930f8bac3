//! UDP port demultiplexing (§4.K).

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::io::{LimitedRead, Readable};

/// A 16-bit UDP port or a 32-bit application-defined demux key, matching
/// the original's either-width `Type` used to key protocol registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKey {
    Port(u16),
    Wide(u32),
}

/// One registered UDP payload consumer.
pub trait Protocol {
    /// A UDP datagram arrived for this registration. `reader` is scoped to
    /// exactly the payload via [`LimitedRead`]; the implementor must not
    /// read past it. Returns whether the datagram was accepted.
    fn udp_rcvd(&self, src_ip: [u8; 4], src_port: u16, reader: &LimitedRead) -> bool;
}

/// Demultiplexes inbound UDP datagrams to registered [`Protocol`]s by
/// destination port.
pub struct Dispatch {
    routes: RefCell<HashMap<PortKey, Rc<dyn Protocol>>>,
}

impl Dispatch {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Dispatch { routes: RefCell::new(HashMap::new()) }
    }

    /// Register `proto` to receive datagrams destined to `key`. Replaces
    /// any prior registration for the same key.
    pub fn register(&self, key: PortKey, proto: Rc<dyn Protocol>) {
        self.routes.borrow_mut().insert(key, proto);
    }

    /// Remove a registration.
    pub fn unregister(&self, key: PortKey) {
        self.routes.borrow_mut().remove(&key);
    }

    /// Deliver one datagram. `payload` is the full UDP payload (no UDP
    /// header). Returns `true` if a registered protocol accepted it.
    pub fn deliver(&self, dst_port: u16, src_ip: [u8; 4], src_port: u16, payload: &dyn Readable) -> bool {
        let proto = self.routes.borrow().get(&PortKey::Port(dst_port)).cloned();
        match proto {
            Some(p) => {
                let limited = LimitedRead::to_end(payload);
                p.udp_rcvd(src_ip, src_port, &limited)
            }
            None => false,
        }
    }
}

impl Default for Dispatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ArrayRead;
    use std::cell::RefCell as StdRefCell;

    struct Capture(StdRefCell<Vec<u8>>);
    impl Protocol for Capture {
        fn udp_rcvd(&self, _src_ip: [u8; 4], _src_port: u16, reader: &LimitedRead) -> bool {
            let mut buf = vec![0u8; reader.get_read_ready()];
            let _ = reader.read_bytes(&mut buf);
            self.0.borrow_mut().extend_from_slice(&buf);
            true
        }
    }

    #[test]
    fn registered_port_receives_payload() {
        let dispatch = Dispatch::new();
        let cap = Rc::new(Capture(StdRefCell::new(Vec::new())));
        dispatch.register(PortKey::Port(69), cap.clone());
        let payload = [1, 2, 3];
        let src = ArrayRead::new(&payload);
        assert!(dispatch.deliver(69, [10, 0, 0, 1], 4000, &src));
        assert_eq!(*cap.0.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn unregistered_port_is_not_accepted() {
        let dispatch = Dispatch::new();
        let payload = [1u8];
        let src = ArrayRead::new(&payload);
        assert!(!dispatch.deliver(12345, [10, 0, 0, 1], 4000, &src));
    }
}
