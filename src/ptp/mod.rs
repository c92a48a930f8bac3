//! PTPv2 client (§4.L): message header codec, fixed-point wide arithmetic,
//! loop filters, the measurement cache, the TLV extension chain, and the
//! mode/state machine that ties them together. The hardest continuous-
//! control subsystem in the crate; see `SPEC_FULL.md` [L].

pub mod filters;
pub mod header;
pub mod measurement;
pub mod state;
pub mod tlv;
pub mod wide;

pub use filters::{AmplitudeReject, ControllerPi, ControllerPii, LinearRegression};
pub use header::{Header, PortIdentity, Timestamp};
pub use measurement::{Callback, Measurement, MeasurementCache};
pub use state::{AnnounceData, Client, ClientMode, ClientState};
pub use tlv::{TlvChain, TlvHandler};
pub use wide::Wide256;
