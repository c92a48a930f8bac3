//! AEAD interface (§4.O): the core never implements AES/GCM itself, only
//! consumes this trait.

use aes_gcm::aead::{Aead as _, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};

/// 96-bit nonce width used throughout (standard AES-GCM).
pub const NONCE_LEN: usize = 12;
/// 128-bit authentication tag width.
pub const TAG_LEN: usize = 16;

/// Opaque authenticated-encryption interface over a 128-bit block cipher.
/// Concrete adapters own their key material; callers never see it.
pub trait Aead {
    /// Encrypt `plaintext` with `aad` authenticated but not encrypted,
    /// appending the tag. Returns `None` on an internal failure (never
    /// expected to happen under correct use; a crypto adapter may still
    /// reject degenerate inputs).
    fn seal(&self, nonce: &[u8; NONCE_LEN], aad: &[u8], plaintext: &[u8]) -> Option<Vec<u8>>;

    /// Decrypt and verify a `seal`-produced buffer. Returns `None` if
    /// authentication fails.
    fn open(&self, nonce: &[u8; NONCE_LEN], aad: &[u8], ciphertext: &[u8]) -> Option<Vec<u8>>;
}

/// AES-GCM adapter, keyed with a 128- or 256-bit key.
pub enum AesGcm {
    Bits128(Aes128Gcm),
    Bits256(Aes256Gcm),
}

impl AesGcm {
    /// Build from a 16-byte key (AES-128-GCM).
    pub fn new_128(key: &[u8; 16]) -> Self {
        AesGcm::Bits128(Aes128Gcm::new(key.into()))
    }

    /// Build from a 32-byte key (AES-256-GCM).
    pub fn new_256(key: &[u8; 32]) -> Self {
        AesGcm::Bits256(Aes256Gcm::new(key.into()))
    }
}

impl Aead for AesGcm {
    fn seal(&self, nonce: &[u8; NONCE_LEN], aad: &[u8], plaintext: &[u8]) -> Option<Vec<u8>> {
        let nonce = Nonce::from_slice(nonce);
        let payload = Payload { msg: plaintext, aad };
        match self {
            AesGcm::Bits128(c) => c.encrypt(nonce, payload).ok(),
            AesGcm::Bits256(c) => c.encrypt(nonce, payload).ok(),
        }
    }

    fn open(&self, nonce: &[u8; NONCE_LEN], aad: &[u8], ciphertext: &[u8]) -> Option<Vec<u8>> {
        let nonce = Nonce::from_slice(nonce);
        let payload = Payload { msg: ciphertext, aad };
        match self {
            AesGcm::Bits128(c) => c.decrypt(nonce, payload).ok(),
            AesGcm::Bits256(c) => c.decrypt(nonce, payload).ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // NIST SP 800-38D test case 3 (§8's `aes_gcm_test_case_3`): AES-128-GCM
    // with a 96-bit IV, full-block plaintext, no AAD.
    #[test]
    fn nist_test_case_3_round_trips() {
        let key: [u8; 16] = [
            0xfe, 0xff, 0xe9, 0x92, 0x86, 0x65, 0x73, 0x1c, 0x6d, 0x6a, 0x8f, 0x94, 0x67, 0x30, 0x83,
            0x08,
        ];
        let nonce: [u8; 12] = [0xca, 0xfe, 0xba, 0xbe, 0xfa, 0xce, 0xdb, 0xad, 0xde, 0xca, 0xf8, 0x88];
        let plaintext: [u8; 16] = [
            0xd9, 0x31, 0x32, 0x25, 0xf8, 0x84, 0x06, 0xe5, 0xa5, 0x59, 0x09, 0xc5, 0xaf, 0xf5, 0x26,
            0x9a,
        ];
        let aead = AesGcm::new_128(&key);
        let sealed = aead.seal(&nonce, &[], &plaintext).unwrap();
        let opened = aead.open(&nonce, &[], &sealed).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn tampered_aad_fails_to_open() {
        let key = [0u8; 32];
        let nonce = [1u8; 12];
        let aead = AesGcm::new_256(&key);
        let sealed = aead.seal(&nonce, b"header", b"hello").unwrap();
        assert!(aead.open(&nonce, b"wrong-header", &sealed).is_none());
    }
}
