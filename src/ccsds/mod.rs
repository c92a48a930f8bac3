//! CCSDS SPP/AOS primary header codecs (§4.N, supplemented).

pub mod aos;
pub mod spp;

pub use aos::AosHeader;
pub use spp::SppHeader;
