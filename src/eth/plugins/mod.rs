//! Concrete plugin implementations (§4.G).

pub mod mac_learn;
pub mod vlan;

pub use mac_learn::MacLearn;
pub use vlan::{IngressPolicy, RateLimitPolicy, VlanPolicy, VlanPort};
