//! UDP dispatch and sockets (§4.K).

pub mod dispatch;
pub mod socket;

pub use dispatch::{Dispatch, PortKey, Protocol};
pub use socket::{DynamicPorts, Socket};
