//! PTP TLV extension chain (§4.L): a linked chain of handlers consulted on
//! every outgoing and incoming message, letting vendor extensions ride
//! alongside the standard message body without the core protocol code
//! knowing about them.

use std::rc::Rc;

/// Vendor TLV type IDs are reserved at 2048 and above; anything below that
/// is a standard IEEE-1588 TLV type.
pub const VENDOR_TLV_MIN: u16 = 2048;

/// A TLV's "critical" bit: the high bit of the type field, mirroring the
/// convention `coap`/`ip` use elsewhere in this crate for "reject if
/// unrecognized" framing.
pub fn is_critical(tlv_type: u16) -> bool {
    tlv_type & 0x8000 != 0
}

/// One extension handler in the chain. `tlv_send` appends bytes to
/// `out` and returns how many it wrote (0 if it has nothing to add for
/// this message); `tlv_rcvd` inspects an incoming TLV and reports whether
/// it recognized and consumed it.
pub trait TlvHandler {
    fn tlv_send(&self, message_type: u8, out: &mut Vec<u8>) -> usize;
    fn tlv_rcvd(&self, tlv_type: u16, value: &[u8]) -> bool;
}

/// Registered handlers, consulted in registration order for both
/// directions (§5 ordering guarantee: "Always handlers fire in
/// registration order").
#[derive(Default)]
pub struct TlvChain {
    handlers: Vec<Rc<dyn TlvHandler>>,
}

impl TlvChain {
    pub fn new() -> Self {
        TlvChain { handlers: Vec::new() }
    }

    pub fn register(&mut self, handler: Rc<dyn TlvHandler>) {
        self.handlers.push(handler);
    }

    /// Ask every handler to append its TLVs for an outgoing message.
    pub fn send_all(&self, message_type: u8, out: &mut Vec<u8>) -> usize {
        let mut total = 0;
        for h in &self.handlers {
            total += h.tlv_send(message_type, out);
        }
        total
    }

    /// Walk a raw TLV sequence (`type:u16, length:u16, value`) from an
    /// incoming message. Returns `Ok(())` if every TLV was either
    /// recognized by some handler or non-critical; `Err(tlv_type)` names
    /// the first unrecognized critical TLV, which the caller should treat
    /// as a protocol-violation rejection of the whole message.
    pub fn recv_all(&self, mut data: &[u8]) -> Result<(), u16> {
        while data.len() >= 4 {
            let tlv_type = u16::from_be_bytes([data[0], data[1]]);
            let len = u16::from_be_bytes([data[2], data[3]]) as usize;
            if data.len() < 4 + len {
                break;
            }
            let value = &data[4..4 + len];
            let recognized = self.handlers.iter().any(|h| h.tlv_rcvd(tlv_type, value));
            if !recognized && is_critical(tlv_type) {
                return Err(tlv_type);
            }
            data = &data[4 + len..];
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct VendorHandler {
        type_id: u16,
        payload: Vec<u8>,
        seen: RefCell<Vec<u16>>,
    }

    impl TlvHandler for VendorHandler {
        fn tlv_send(&self, _message_type: u8, out: &mut Vec<u8>) -> usize {
            out.extend_from_slice(&self.type_id.to_be_bytes());
            out.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
            out.extend_from_slice(&self.payload);
            4 + self.payload.len()
        }

        fn tlv_rcvd(&self, tlv_type: u16, _value: &[u8]) -> bool {
            self.seen.borrow_mut().push(tlv_type);
            tlv_type == self.type_id
        }
    }

    #[test]
    fn vendor_tlv_ids_start_at_2048() {
        assert!(!is_critical(VENDOR_TLV_MIN));
        assert_eq!(VENDOR_TLV_MIN, 2048);
    }

    #[test]
    fn send_appends_every_handler_in_order() {
        let mut chain = TlvChain::new();
        chain.register(Rc::new(VendorHandler { type_id: 2048, payload: vec![1, 2], seen: RefCell::new(vec![]) }));
        chain.register(Rc::new(VendorHandler { type_id: 2049, payload: vec![9], seen: RefCell::new(vec![]) }));
        let mut out = Vec::new();
        let n = chain.send_all(0, &mut out);
        assert_eq!(n, out.len());
        assert_eq!(&out[0..2], &2048u16.to_be_bytes());
    }

    #[test]
    fn unrecognized_critical_tlv_is_rejected() {
        let chain = TlvChain::new();
        let mut data = Vec::new();
        let critical_unknown = 0x8123u16;
        data.extend_from_slice(&critical_unknown.to_be_bytes());
        data.extend_from_slice(&0u16.to_be_bytes());
        assert_eq!(chain.recv_all(&data), Err(critical_unknown));
    }

    #[test]
    fn unrecognized_noncritical_tlv_is_ignored() {
        let chain = TlvChain::new();
        let mut data = Vec::new();
        data.extend_from_slice(&0x0042u16.to_be_bytes());
        data.extend_from_slice(&0u16.to_be_bytes());
        assert_eq!(chain.recv_all(&data), Ok(()));
    }
}
