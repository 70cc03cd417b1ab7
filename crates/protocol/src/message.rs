use serde::{Deserialize, Serialize};

/// A capture protocol message.
///
/// The `kind` discriminant is the only routing information; there is no sequence number, so
/// ordering holds within a single channel and nowhere else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Message {
	/// Capture agent reports a new selection upward.
	ReportSelection { text: String },
	/// Coordinator directs a capture agent to start or stop reporting.
	SetCapture { enabled: bool },
	/// Coordinator relays a captured selection to every panel session.
	RelaySelection { text: String, origin: Origin },
	/// Asks a capture agent for the live selection, or the whole page text when nothing is selected.
	GetPageContent,
	/// Asks a capture agent for the live selection only.
	GetSelectedText,
}

impl Message {
	/// Builds a coordinator relay carrying `text`.
	pub fn relay(text: impl Into<String>) -> Self {
		Self::RelaySelection {
			text: text.into(),
			origin: Origin::Coordinator,
		}
	}

	/// Returns the wire name of this message's kind.
	pub fn kind(&self) -> &'static str {
		match self {
			Self::ReportSelection { .. } => "reportSelection",
			Self::SetCapture { .. } => "setCapture",
			Self::RelaySelection { .. } => "relaySelection",
			Self::GetPageContent => "getPageContent",
			Self::GetSelectedText => "getSelectedText",
		}
	}
}

/// Sender of a relayed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Origin {
	Coordinator,
}

/// Reply to a request-shaped [`Message`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
	/// Answer to [`Message::SetCapture`].
	Ack { success: bool },
	/// Answer to [`Message::GetPageContent`].
	PageContent {
		content: String,
		#[serde(rename = "isSelected")]
		is_selected: bool,
	},
	/// Answer to [`Message::GetSelectedText`].
	SelectedText { text: String },
}
