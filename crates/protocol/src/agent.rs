//! Framing for capture agents connected natively over the relay's `/agent/{tab_id}` socket.

use serde::{Deserialize, Serialize};

use crate::{Message, Reply};

/// One frame on a native agent socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentFrame {
	/// Relay -> agent: a request that expects a [`AgentFrame::Reply`] with the same id.
	Request { id: u64, message: Message },
	/// Agent -> relay: answer to a request.
	Reply { id: u64, reply: Reply },
	/// Agent -> relay: unsolicited message such as a selection report.
	Notify { message: Message },
	/// Agent -> relay: the agent's tab gained focus.
	Focus,
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn focus_is_a_bare_tag() {
		let json = serde_json::to_value(AgentFrame::Focus).unwrap();
		assert_eq!(json, json!({"type": "focus"}));
	}

	#[test]
	fn reply_wraps_untagged_reply() {
		let frame: AgentFrame =
			serde_json::from_str(r#"{"type":"reply","id":1,"reply":{"success":true}}"#).unwrap();
		assert_eq!(
			frame,
			AgentFrame::Reply {
				id: 1,
				reply: Reply::Ack { success: true }
			}
		);
	}
}
