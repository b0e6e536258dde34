//! Bridge module for communicating with the tg-bridge connector subprocess.

pub mod process;
pub mod protocol;

pub use process::{find_bridge_binary, BridgeConfig, BridgeProcess};
pub use protocol::{BridgeEvent, RawChat, RawMedia, RawMessage, RawSender};
