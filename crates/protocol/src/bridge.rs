//! Protocol between the relay and the extension background bridge.
//!
//! The extension connects to the relay's `/extension` WebSocket and from then on:
//!
//! 1. Forwards browser events as [`BridgeEvent`]s (tab focus, tab load completion,
//!    capture agent messages, context menu clicks).
//! 2. Executes [`BridgeRequest`]s issued by the relay and answers each with a
//!    [`BridgeEvent::Response`] carrying the same `id`.
//!
//! The extension holds no coordination state; the relay owns it all.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Message, TabId, WindowId};

/// Message sent from the extension background to the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum BridgeEvent {
	/// A tab gained focus in its window.
	TabActivated { tab_id: TabId },
	/// A tab changed loading status; only `"complete"` matters to the coordinator.
	TabUpdated { tab_id: TabId, status: String },
	/// A capture agent running in `tab_id` sent a message upward.
	AgentMessage { tab_id: TabId, message: Message },
	/// The user invoked the context menu entry on a selection.
	MenuInvoked { window_id: WindowId, text: String },
	/// Answer to the [`BridgeRequest`] with the same `id`.
	Response {
		id: u64,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		result: Option<Value>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		error: Option<String>,
	},
	/// Diagnostic line from the extension.
	Log { level: String, message: String },
}

impl BridgeEvent {
	/// Returns true for a tab update that finished loading a document.
	pub fn is_navigation_complete(&self) -> bool {
		matches!(self, Self::TabUpdated { status, .. } if status == "complete")
	}
}

/// Call issued by the relay to the extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeRequest {
	pub id: u64,
	pub call: BridgeCall,
}

/// Browser capability the relay asks the extension to exercise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum BridgeCall {
	/// Resolve the focused tab of the current window. Result: tab id or `null`.
	ActiveTab,
	/// Deliver `message` to the capture agent in `tab_id`. Result: the agent's reply.
	SendToTab { tab_id: TabId, message: Message },
	/// Install the capture agent program into `tab_id`.
	InjectAgent { tab_id: TabId },
	/// Open the side panel in `window_id`.
	OpenPanel { window_id: WindowId },
}
