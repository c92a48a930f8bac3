//! Software Ethernet switch (§2 component B/F/G, §4.F/§4.G).

pub mod frame;
pub mod plugin;
pub mod plugins;
pub mod switch_core;
pub mod switch_log;

pub use frame::PluginPacket;
pub use plugin::{PluginCore, PluginPort};
pub use switch_core::SwitchCore;
