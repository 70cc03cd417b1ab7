//! Coordinator: owns the [`Registry`] and turns browser and session events into directives
//! and relays.
//!
//! The coordinator is a single task consuming [`Event`]s one at a time. Each handler mutates
//! the registry synchronously and never awaits; anything that has to wait (resolving the
//! focused tab, opening a panel) runs in a spawned task that posts its outcome back as another
//! event, where the registry is re-checked before the outcome is applied. Directives go to the
//! dispatcher in [`crate::delivery`], which delivers them in issue order.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::Stream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::browser::Browser;
use crate::config::Config;
use crate::delivery::{self, Directive};
use crate::error::{Error, Result};
use crate::registry::{Registry, RegistrySnapshot, Removal, SessionHandle, SessionId};
use crate::{Message, TabId, WindowId};


/// Capacity of the secondary relay broadcast; slow subscribers skip what they miss.
const RELAY_BROADCAST_CAPACITY: usize = 64;

/// Inputs of the coordinator task.
#[derive(Debug)]
pub enum Event {
	SessionConnected(SessionHandle),
	SessionDisconnected(SessionId),
	TabActivated(TabId),
	NavigationComplete(TabId),
	AgentReport(String),
	MenuInvoked { window_id: WindowId, text: String },
	/// A focus resolution finished its settling delay.
	Resolved {
		generation: u64,
		activations: u64,
		tab_id: TabId,
	},
	/// A menu-triggered panel open finished; the text is ready to relay.
	PanelOpened { text: String },
	Snapshot(oneshot::Sender<RegistrySnapshot>),
}

pub struct Coordinator<B> {
	registry: Registry,
	browser: Arc<B>,
	settle_delay: Duration,
	directives: mpsc::UnboundedSender<Directive>,
	relays: broadcast::Sender<Message>,
	loopback: mpsc::WeakUnboundedSender<Event>,
	/// Bumped each time the registry goes from empty to non-empty.
	generation: u64,
	/// Bumped for every tab activation observed while sessions exist.
	activations: u64,
}

impl<B: Browser> Coordinator<B> {
	/// Starts the coordinator and its directive dispatcher.
	///
	/// Both tasks stop once every [`CoordinatorHandle`] is dropped.
	pub fn spawn(browser: Arc<B>, config: &Config) -> CoordinatorHandle {
		let (events_tx, events_rx) = mpsc::unbounded_channel();
		let (relays, _) = broadcast::channel(RELAY_BROADCAST_CAPACITY);
		let coordinator = Self {
			registry: Registry::new(),
			directives: delivery::spawn_dispatcher(Arc::clone(&browser)),
			browser,
			settle_delay: config.settle_delay(),
			relays: relays.clone(),
			loopback: events_tx.downgrade(),
			generation: 0,
			activations: 0,
		};
		tokio::spawn(coordinator.run(events_rx));

		CoordinatorHandle {
			events: events_tx,
			relays,
		}
	}

	async fn run(mut self, mut events: mpsc::UnboundedReceiver<Event>) {
		info!(target = "selcap", "coordinator started");
		while let Some(event) = events.recv().await {
			self.handle(event);
		}
		info!(target = "selcap", "coordinator stopped");
	}

	fn handle(&mut self, event: Event) {
		match event {
			Event::SessionConnected(handle) => self.on_session_connect(handle),
			Event::SessionDisconnected(id) => self.on_session_disconnect(id),
			Event::TabActivated(tab_id) => self.on_tab_activated(tab_id),
			Event::NavigationComplete(tab_id) => self.on_navigation_complete(tab_id),
			Event::AgentReport(text) => self.broadcast(text),
			Event::MenuInvoked { window_id, text } => self.on_menu_invoked(window_id, text),
			Event::Resolved {
				generation,
				activations,
				tab_id,
			} => self.on_resolved(generation, activations, tab_id),
			Event::PanelOpened { text } => self.broadcast(text),
			Event::Snapshot(reply) => {
				let _ = reply.send(self.registry.snapshot());
			}
		}
	}

	fn on_session_connect(&mut self, handle: SessionHandle) {
		let id = handle.id();
		let first = self.registry.insert(handle);
		info!(target = "selcap", session = %id, sessions = self.registry.len(), "session connected");
		if first {
			self.generation += 1;
			self.start_resolution();
		}
	}

	fn on_session_disconnect(&mut self, id: SessionId) {
		match self.registry.remove(id) {
			Removal::Absent => {
				debug!(target = "selcap", session = %id, "session already removed");
			}
			Removal::Remaining => {
				info!(target = "selcap", session = %id, sessions = self.registry.len(), "session disconnected");
			}
			Removal::Emptied { target } => {
				info!(target = "selcap", session = %id, "last session disconnected");
				if let Some(tab_id) = target {
					self.dispatch(Directive::disable(tab_id));
				}
			}
		}
	}

	fn on_tab_activated(&mut self, tab_id: TabId) {
		if self.registry.is_empty() {
			debug!(target = "selcap", tab = tab_id, "tab activated without sessions");
			return;
		}
		self.activations += 1;
		self.retarget(tab_id);
	}

	fn on_navigation_complete(&mut self, tab_id: TabId) {
		if self.registry.is_empty() || self.registry.target() != Some(tab_id) {
			return;
		}
		// The new document starts with a fresh, disabled agent.
		self.dispatch(Directive::enable(tab_id));
	}

	fn on_menu_invoked(&mut self, window_id: WindowId, text: String) {
		if text.is_empty() {
			return;
		}
		let Some(events) = self.loopback.upgrade() else {
			return;
		};
		let browser = Arc::clone(&self.browser);
		tokio::spawn(async move {
			match browser.open_panel(window_id).await {
				Ok(()) => {
					let _ = events.send(Event::PanelOpened { text });
				}
				Err(err) => {
					warn!(target = "selcap", window = window_id, error = %err, "could not open panel");
				}
			}
		});
	}

	fn on_resolved(&mut self, generation: u64, activations: u64, tab_id: TabId) {
		if self.registry.is_empty() || generation != self.generation {
			debug!(target = "selcap", tab = tab_id, "stale resolution discarded");
			return;
		}
		if activations != self.activations {
			debug!(target = "selcap", tab = tab_id, "resolution superseded by tab activation");
			return;
		}
		self.retarget(tab_id);
	}

	/// Moves capture to `tab_id`, disabling the previous target first.
	fn retarget(&mut self, tab_id: TabId) {
		match self.registry.target() {
			Some(current) if current == tab_id => return,
			Some(previous) => self.dispatch(Directive::disable(previous)),
			None => {}
		}
		self.dispatch(Directive::enable(tab_id));
		self.registry.set_target(tab_id);
		info!(target = "selcap", tab = tab_id, "capture target changed");
	}

	fn start_resolution(&self) {
		let Some(events) = self.loopback.upgrade() else {
			return;
		};
		let browser = Arc::clone(&self.browser);
		let settle_delay = self.settle_delay;
		let generation = self.generation;
		let activations = self.activations;

		tokio::spawn(async move {
			match browser.active_tab().await {
				Ok(Some(tab_id)) => {
					tokio::time::sleep(settle_delay).await;
					let _ = events.send(Event::Resolved {
						generation,
						activations,
						tab_id,
					});
				}
				Ok(None) => {
					warn!(target = "selcap", "no focused tab, capture target left unset");
				}
				Err(err) => {
					warn!(target = "selcap", error = %err, "focused tab resolution failed");
				}
			}
		});
	}

	fn broadcast(&mut self, text: String) {
		let message = Message::relay(text);
		// No subscribers on the secondary path is normal.
		let _ = self.relays.send(message.clone());

		let failed: Vec<SessionId> = self
			.registry
			.handles()
			.filter(|handle| handle.send(message.clone()).is_err())
			.map(SessionHandle::id)
			.collect();

		for id in failed {
			warn!(target = "selcap", session = %id, "relay failed, dropping session");
			self.on_session_disconnect(id);
		}
	}

	fn dispatch(&self, directive: Directive) {
		debug!(target = "selcap", tab = directive.tab_id, enabled = directive.enabled, "issuing directive");
		if self.directives.send(directive).is_err() {
			warn!(target = "selcap", tab = directive.tab_id, "directive dispatcher stopped");
		}
	}
}

/// Cloneable front door to a running [`Coordinator`].
#[derive(Clone)]
pub struct CoordinatorHandle {
	events: mpsc::UnboundedSender<Event>,
	relays: broadcast::Sender<Message>,
}

impl CoordinatorHandle {
	/// Opens a panel session. The session ends when the returned lease is dropped.
	pub fn connect_session(&self) -> Result<SessionLease> {
		let (handle, rx) = SessionHandle::channel();
		let id = handle.id();
		self.send(Event::SessionConnected(handle))?;
		Ok(SessionLease {
			id,
			rx,
			events: self.events.clone(),
		})
	}

	/// Registers a session whose channel the caller owns. The caller must report the
	/// disconnect through [`disconnect_session`](Self::disconnect_session).
	pub fn register(&self, handle: SessionHandle) -> Result<()> {
		self.send(Event::SessionConnected(handle))
	}

	pub fn disconnect_session(&self, id: SessionId) {
		self.notify(Event::SessionDisconnected(id));
	}

	pub fn tab_activated(&self, tab_id: TabId) {
		self.notify(Event::TabActivated(tab_id));
	}

	pub fn navigation_complete(&self, tab_id: TabId) {
		self.notify(Event::NavigationComplete(tab_id));
	}

	pub fn agent_report(&self, text: impl Into<String>) {
		self.notify(Event::AgentReport(text.into()));
	}

	/// Relays a selection captured outside any page, opening a panel in `window_id` first.
	pub fn menu_invoked(&self, window_id: WindowId, text: impl Into<String>) {
		self.notify(Event::MenuInvoked {
			window_id,
			text: text.into(),
		});
	}

	pub async fn snapshot(&self) -> Result<RegistrySnapshot> {
		let (tx, rx) = oneshot::channel();
		self.send(Event::Snapshot(tx))?;
		rx.await.map_err(|_| Error::ChannelClosed)
	}

	/// Subscribes to the secondary, session-independent relay path.
	pub fn subscribe_relays(&self) -> broadcast::Receiver<Message> {
		self.relays.subscribe()
	}

	fn send(&self, event: Event) -> Result<()> {
		self.events.send(event).map_err(|_| Error::ChannelClosed)
	}

	fn notify(&self, event: Event) {
		if self.send(event).is_err() {
			debug!(target = "selcap", "coordinator stopped, event dropped");
		}
	}
}

/// A registered panel session: yields relays and disconnects itself on drop.
pub struct SessionLease {
	id: SessionId,
	rx: mpsc::UnboundedReceiver<Message>,
	events: mpsc::UnboundedSender<Event>,
}

impl SessionLease {
	pub fn id(&self) -> SessionId {
		self.id
	}

	/// Next message for this session, or `None` once the coordinator dropped it.
	pub async fn recv(&mut self) -> Option<Message> {
		self.rx.recv().await
	}
}

impl Stream for SessionLease {
	type Item = Message;

	fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
		self.rx.poll_recv(cx)
	}
}

impl Drop for SessionLease {
	fn drop(&mut self) {
		let _ = self.events.send(Event::SessionDisconnected(self.id));
	}
}
