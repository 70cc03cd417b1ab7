//! Test doubles shared by the unit tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::browser::Browser;
use crate::error::{Error, Result};
use crate::{Message, Reply, TabId, WindowId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
	Active,
	Send(TabId, bool),
	Query(TabId, &'static str),
	Inject(TabId),
	OpenPanel(WindowId),
}

#[derive(Default)]
struct FakeState {
	active: Option<TabId>,
	resolution_fails: bool,
	resolution_delay: Duration,
	send_failures: HashMap<TabId, usize>,
	injection_fails: bool,
	refuse: bool,
	open_panel_fails: bool,
	query_delay: Duration,
	page_text: String,
	selection: String,
	calls: Vec<Call>,
}

/// In-memory [`Browser`] that records every call.
#[derive(Default)]
pub struct FakeBrowser {
	state: Mutex<FakeState>,
}

impl FakeBrowser {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_active(tab_id: TabId) -> Self {
		let browser = Self::new();
		browser.set_active(Some(tab_id));
		browser
	}

	pub fn set_active(&self, tab_id: Option<TabId>) {
		self.state.lock().active = tab_id;
	}

	pub fn fail_resolution(&self, fail: bool) {
		self.state.lock().resolution_fails = fail;
	}

	pub fn delay_resolution(&self, delay: Duration) {
		self.state.lock().resolution_delay = delay;
	}

	/// Makes the next `count` sends to `tab_id` fail.
	pub fn fail_sends_to(&self, tab_id: TabId, count: usize) {
		self.state.lock().send_failures.insert(tab_id, count);
	}

	pub fn fail_injection(&self, fail: bool) {
		self.state.lock().injection_fails = fail;
	}

	pub fn refuse_directives(&self, refuse: bool) {
		self.state.lock().refuse = refuse;
	}

	pub fn fail_open_panel(&self, fail: bool) {
		self.state.lock().open_panel_fails = fail;
	}

	pub fn delay_queries(&self, delay: Duration) {
		self.state.lock().query_delay = delay;
	}

	pub fn set_page(&self, page_text: &str, selection: &str) {
		let mut state = self.state.lock();
		state.page_text = page_text.to_string();
		state.selection = selection.to_string();
	}

	pub fn calls(&self) -> Vec<Call> {
		self.state.lock().calls.clone()
	}

	/// Directive sends only, in delivery order.
	pub fn directives(&self) -> Vec<(TabId, bool)> {
		self.state
			.lock()
			.calls
			.iter()
			.filter_map(|call| match call {
				Call::Send(tab_id, enabled) => Some((*tab_id, *enabled)),
				_ => None,
			})
			.collect()
	}

	pub fn clear_calls(&self) {
		self.state.lock().calls.clear();
	}
}

#[async_trait]
impl Browser for FakeBrowser {
	async fn active_tab(&self) -> Result<Option<TabId>> {
		let delay = {
			let mut state = self.state.lock();
			state.calls.push(Call::Active);
			state.resolution_delay
		};
		tokio::time::sleep(delay).await;

		let state = self.state.lock();
		if state.resolution_fails {
			return Err(Error::Resolution("no window".into()));
		}
		Ok(state.active)
	}

	async fn send_to_tab(&self, tab_id: TabId, message: Message) -> Result<Reply> {
		let delay = {
			let mut state = self.state.lock();
			let call = match &message {
				Message::SetCapture { enabled } => Call::Send(tab_id, *enabled),
				other => Call::Query(tab_id, other.kind()),
			};
			state.calls.push(call);
			if let Some(remaining) = state.send_failures.get_mut(&tab_id) {
				if *remaining > 0 {
					*remaining -= 1;
					return Err(Error::tab_delivery(tab_id, "receiving end does not exist"));
				}
			}
			state.query_delay
		};
		if !matches!(message, Message::SetCapture { .. }) {
			tokio::time::sleep(delay).await;
		}

		let state = self.state.lock();
		match message {
			Message::SetCapture { .. } => Ok(Reply::Ack {
				success: !state.refuse,
			}),
			Message::GetPageContent if state.selection.is_empty() => Ok(Reply::PageContent {
				content: state.page_text.clone(),
				is_selected: false,
			}),
			Message::GetPageContent => Ok(Reply::PageContent {
				content: state.selection.clone(),
				is_selected: true,
			}),
			Message::GetSelectedText => Ok(Reply::SelectedText {
				text: state.selection.clone(),
			}),
			Message::ReportSelection { .. } | Message::RelaySelection { .. } => {
				Err(Error::tab_delivery(tab_id, "not a request"))
			}
		}
	}

	async fn inject_agent(&self, tab_id: TabId) -> Result<()> {
		let mut state = self.state.lock();
		state.calls.push(Call::Inject(tab_id));
		if state.injection_fails {
			return Err(Error::Injection {
				tab_id,
				reason: "cannot access contents of url".into(),
			});
		}
		Ok(())
	}

	async fn open_panel(&self, window_id: WindowId) -> Result<()> {
		let mut state = self.state.lock();
		state.calls.push(Call::OpenPanel(window_id));
		if state.open_panel_fails {
			return Err(Error::Delivery {
				destination: format!("window {window_id}"),
				reason: "no user gesture".into(),
			});
		}
		Ok(())
	}
}
