//! Session Registry: the open panel sessions and the single capture target.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::{Message, TabId};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a panel session channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SessionId(u64);

impl SessionId {
	fn next() -> Self {
		Self(NEXT_SESSION_ID.fetch_add(1, Ordering::SeqCst))
	}
}

impl fmt::Display for SessionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "session-{}", self.0)
	}
}

/// Coordinator-side end of one panel session's channel.
///
/// Carries nothing but identity and the ability to send. The channel is dead once the
/// receiving end is dropped.
#[derive(Debug, Clone)]
pub struct SessionHandle {
	id: SessionId,
	tx: mpsc::UnboundedSender<Message>,
}

impl SessionHandle {
	/// Creates a handle with a fresh identity and the receiving end of its channel.
	pub fn channel() -> (Self, mpsc::UnboundedReceiver<Message>) {
		let (tx, rx) = mpsc::unbounded_channel();
		(
			Self {
				id: SessionId::next(),
				tx,
			},
			rx,
		)
	}

	pub fn id(&self) -> SessionId {
		self.id
	}

	/// Queues `message` for the session without waiting on it.
	pub fn send(&self, message: Message) -> Result<()> {
		self.tx.send(message).map_err(|_| Error::Delivery {
			destination: self.id.to_string(),
			reason: "session channel closed".into(),
		})
	}
}

/// Outcome of removing a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
	/// The session was not registered.
	Absent,
	/// Other sessions remain; the target is unchanged.
	Remaining,
	/// The last session left; the target (if any) was cleared and is returned.
	Emptied { target: Option<TabId> },
}

/// Point-in-time view of the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
	pub sessions: usize,
	pub target_tab_id: Option<TabId>,
}

/// Open sessions plus the tab currently authorized to report selections.
///
/// The target is only ever set while sessions exist, and removing the last session clears
/// it in the same step, so `target().is_some()` implies `!is_empty()`.
#[derive(Debug, Default)]
pub struct Registry {
	sessions: HashMap<SessionId, SessionHandle>,
	target: Option<TabId>,
}

impl Registry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds a session. Returns `true` if the registry was empty before.
	///
	/// Re-inserting an already registered id is a no-op that returns `false`.
	pub fn insert(&mut self, handle: SessionHandle) -> bool {
		let was_empty = self.sessions.is_empty();
		if self.sessions.contains_key(&handle.id) {
			return false;
		}
		self.sessions.insert(handle.id, handle);
		was_empty
	}

	pub fn remove(&mut self, id: SessionId) -> Removal {
		if self.sessions.remove(&id).is_none() {
			return Removal::Absent;
		}
		if self.sessions.is_empty() {
			Removal::Emptied {
				target: self.target.take(),
			}
		} else {
			Removal::Remaining
		}
	}

	pub fn target(&self) -> Option<TabId> {
		self.target
	}

	/// Sets the capture target. Ignored while no session is registered.
	pub fn set_target(&mut self, tab_id: TabId) -> bool {
		if self.sessions.is_empty() {
			return false;
		}
		self.target = Some(tab_id);
		true
	}

	pub fn is_empty(&self) -> bool {
		self.sessions.is_empty()
	}

	pub fn len(&self) -> usize {
		self.sessions.len()
	}

	pub fn handles(&self) -> impl Iterator<Item = &SessionHandle> {
		self.sessions.values()
	}

	pub fn snapshot(&self) -> RegistrySnapshot {
		RegistrySnapshot {
			sessions: self.sessions.len(),
			target_tab_id: self.target,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn first_insert_reports_transition() {
		let mut registry = Registry::new();
		let (a, _rx_a) = SessionHandle::channel();
		let (b, _rx_b) = SessionHandle::channel();

		assert!(registry.insert(a.clone()));
		assert!(!registry.insert(b));
		assert!(!registry.insert(a), "duplicate identity must not count");
		assert_eq!(registry.len(), 2);
	}

	#[test]
	fn target_requires_sessions() {
		let mut registry = Registry::new();
		assert!(!registry.set_target(7));
		assert_eq!(registry.target(), None);

		let (a, _rx) = SessionHandle::channel();
		registry.insert(a);
		assert!(registry.set_target(7));
		assert_eq!(registry.target(), Some(7));
	}

	#[test]
	fn removing_last_session_clears_target() {
		let mut registry = Registry::new();
		let (a, _rx_a) = SessionHandle::channel();
		let (b, _rx_b) = SessionHandle::channel();
		registry.insert(a.clone());
		registry.insert(b.clone());
		registry.set_target(9);

		assert_eq!(registry.remove(a.id()), Removal::Remaining);
		assert_eq!(registry.target(), Some(9));
		assert_eq!(registry.remove(b.id()), Removal::Emptied { target: Some(9) });
		assert_eq!(registry.target(), None);
		assert_eq!(registry.remove(b.id()), Removal::Absent);
	}

	#[test]
	fn send_fails_once_receiver_dropped() {
		let (handle, rx) = SessionHandle::channel();
		drop(rx);
		let err = handle.send(Message::relay("x")).unwrap_err();
		assert!(matches!(err, Error::Delivery { .. }));
	}

	#[test]
	fn session_ids_are_unique() {
		let (a, _rx_a) = SessionHandle::channel();
		let (b, _rx_b) = SessionHandle::channel();
		assert_ne!(a.id(), b.id());
	}
}
