use thiserror::Error;

use crate::TabId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	/// A directive, relay or query could not reach its destination.
	#[error("delivery to {destination} failed: {reason}")]
	Delivery { destination: String, reason: String },

	/// The focused tab could not be determined.
	#[error("active tab resolution failed: {0}")]
	Resolution(String),

	/// The capture agent program could not be installed into a tab.
	#[error("agent injection into tab {tab_id} failed: {reason}")]
	Injection { tab_id: TabId, reason: String },

	/// A content query exceeded its time bound.
	#[error("content query timed out after {ms}ms")]
	QueryTimeout { ms: u64 },

	/// The coordinator or a session channel is gone.
	#[error("channel closed")]
	ChannelClosed,

	#[error("invalid configuration: {0}")]
	Config(String),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Builds a [`Error::Delivery`] for a tab destination.
	pub fn tab_delivery(tab_id: TabId, reason: impl Into<String>) -> Self {
		Self::Delivery {
			destination: format!("tab {tab_id}"),
			reason: reason.into(),
		}
	}

	/// Returns `true` if this error is a content query timeout.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Self::QueryTimeout { .. })
	}
}
