//! Cryptographic peripherals (§4.O): an opaque AEAD interface, kept out of
//! the core's direct call path.

pub mod aead;

pub use aead::{Aead, AesGcm};
