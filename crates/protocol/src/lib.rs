//! Wire types shared by the coordinator, capture agents, panels and the extension bridge.
//!
//! - [`Message`] is the capture protocol proper: reports, directives, relays and content queries.
//! - [`bridge`] carries browser events and calls between the relay and the extension background.
//! - [`agent`] frames the capture protocol for native agents connected over a WebSocket.

pub mod agent;
pub mod bridge;
mod message;

pub use agent::AgentFrame;
pub use bridge::{BridgeCall, BridgeEvent, BridgeRequest};
pub use message::{Message, Origin, Reply};

/// Browser tab identifier.
pub type TabId = i32;

/// Browser window identifier.
pub type WindowId = i32;

/// Default relay host.
pub const RELAY_HOST: &str = "127.0.0.1";

/// Default relay port.
pub const RELAY_PORT: u16 = 19989;
