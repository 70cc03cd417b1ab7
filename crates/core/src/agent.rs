//! Capture Agent: the per-tab state machine that observes selections and reports them.
//!
//! Two states, `Disabled` (initial) and `Enabled`. Enabling attaches the page listeners once;
//! disabling detaches them and drops any pending report. While enabled, pointer-release,
//! key-release and selection-change events arm a [`Debouncer`]; when it fires the live
//! selection is read, trimmed and reported unless it is empty or equal to the last report.
//!
//! Content queries are answered from the live page in either state.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::debounce::{self, Debouncer};
use crate::{Message, Reply};

/// The document a capture agent lives in.
pub trait Page: Send {
	/// Starts delivering [`PageEvent`]s to the agent.
	fn attach_listeners(&mut self);

	/// Stops delivering [`PageEvent`]s to the agent.
	fn detach_listeners(&mut self);

	/// The live text selection, untrimmed.
	fn selection(&self) -> String;

	/// The full visible text of the document.
	fn page_text(&self) -> String;
}

/// Page events that may change the selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEvent {
	PointerUp,
	KeyUp,
	SelectionChange,
}

/// Request delivered to a running agent, answered through `reply` when it expects an answer.
#[derive(Debug)]
pub struct AgentCall {
	pub message: Message,
	pub reply: oneshot::Sender<Reply>,
}

impl AgentCall {
	pub fn new(message: Message) -> (Self, oneshot::Receiver<Reply>) {
		let (reply, rx) = oneshot::channel();
		(Self { message, reply }, rx)
	}
}

/// Agent-local state. Lost with the document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureState {
	pub enabled: bool,
	pub last_reported: String,
}

pub struct CaptureAgent<P> {
	page: P,
	state: CaptureState,
	debounce: Debouncer,
	reports: mpsc::UnboundedSender<Message>,
}

impl<P: Page> CaptureAgent<P> {
	/// Creates a disabled agent that sends its reports to `reports`.
	pub fn new(page: P, debounce_window: Duration, reports: mpsc::UnboundedSender<Message>) -> Self {
		Self {
			page,
			state: CaptureState::default(),
			debounce: Debouncer::new(debounce_window),
			reports,
		}
	}

	pub fn state(&self) -> &CaptureState {
		&self.state
	}

	/// Handles a request-shaped message. Returns `None` for kinds an agent never answers.
	pub fn handle_request(&mut self, message: Message) -> Option<Reply> {
		match message {
			Message::SetCapture { enabled } => {
				self.set_enabled(enabled);
				Some(Reply::Ack { success: true })
			}
			Message::GetPageContent => {
				let selection = self.live_selection();
				Some(if selection.is_empty() {
					Reply::PageContent {
						content: self.page.page_text(),
						is_selected: false,
					}
				} else {
					Reply::PageContent {
						content: selection,
						is_selected: true,
					}
				})
			}
			Message::GetSelectedText => Some(Reply::SelectedText {
				text: self.live_selection(),
			}),
			Message::ReportSelection { .. } | Message::RelaySelection { .. } => {
				debug!(target = "selcap.agent", kind = message.kind(), "ignoring message");
				None
			}
		}
	}

	/// Applies a capture directive. Redundant directives change nothing.
	pub fn set_enabled(&mut self, enabled: bool) {
		if enabled == self.state.enabled {
			trace!(target = "selcap.agent", enabled, "redundant directive");
			return;
		}

		self.state.enabled = enabled;
		if enabled {
			self.page.attach_listeners();
			debug!(target = "selcap.agent", "selection listeners attached");
			// A selection made before capture was enabled is reported right away.
			self.report_selection();
		} else {
			self.page.detach_listeners();
			self.debounce.cancel();
			debug!(target = "selcap.agent", "selection listeners detached");
		}
	}

	/// Feeds a page event into the debouncer. Ignored while disabled.
	pub fn on_page_event(&mut self, event: PageEvent) {
		if !self.state.enabled {
			trace!(target = "selcap.agent", ?event, "event while disabled");
			return;
		}
		self.debounce.trigger();
	}

	/// Reports the selection if the debounce window has elapsed.
	pub fn on_quiescent(&mut self) {
		if self.debounce.fire() {
			self.report_selection();
		}
	}

	/// Reports the live selection unless it is empty or was the last one reported.
	/// Returns the reported text.
	pub fn report_selection(&mut self) -> Option<String> {
		let text = self.live_selection();
		if text.is_empty() || text == self.state.last_reported {
			return None;
		}

		self.state.last_reported = text.clone();
		let message = Message::ReportSelection { text: text.clone() };
		if self.reports.send(message).is_err() {
			debug!(target = "selcap.agent", "report channel closed");
		}
		Some(text)
	}

	/// Drives the agent until `calls` closes.
	pub async fn run(
		mut self,
		mut calls: mpsc::UnboundedReceiver<AgentCall>,
		mut events: mpsc::UnboundedReceiver<PageEvent>,
	) {
		let mut events_open = true;
		loop {
			let deadline = self.debounce.deadline();
			tokio::select! {
				call = calls.recv() => match call {
					Some(AgentCall { message, reply }) => {
						if let Some(answer) = self.handle_request(message) {
							let _ = reply.send(answer);
						}
					}
					None => break,
				},
				event = events.recv(), if events_open => match event {
					Some(event) => self.on_page_event(event),
					None => events_open = false,
				},
				() = debounce::until(deadline) => self.on_quiescent(),
			}
		}

		if self.state.enabled {
			self.page.detach_listeners();
		}
	}

	fn live_selection(&self) -> String {
		self.page.selection().trim().to_string()
	}
}
