//! [`Browser`] backed by whatever is connected to the relay: the extension bridge, native
//! agents, or both.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::Message as WsMessage;
use selcap::protocol::{AgentFrame, BridgeCall, BridgeRequest};
use selcap::{Browser, Error, Message, Reply, TabId, WindowId};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::debug;

/// Upper bound for one call to the extension or a native agent.
pub(crate) const CALL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub(crate) enum CallError {
	#[error("extension not connected")]
	ExtensionMissing,

	#[error("no agent connected for tab {0}")]
	AgentMissing(TabId),

	#[error("no answer within {}ms", .0.as_millis())]
	Timeout(Duration),

	#[error("connection closed before answering")]
	Closed,

	#[error("{0}")]
	Remote(String),

	#[error("malformed payload: {0}")]
	Malformed(#[from] serde_json::Error),
}

/// A native capture agent connected on `/agent/{tab_id}`.
pub(crate) struct AgentLink {
	pub(crate) tx: mpsc::UnboundedSender<WsMessage>,
	/// Dropped with the link, which fails every outstanding call.
	pub(crate) pending: HashMap<u64, oneshot::Sender<Reply>>,
}

impl AgentLink {
	pub(crate) fn new(tx: mpsc::UnboundedSender<WsMessage>) -> Self {
		Self {
			tx,
			pending: HashMap::new(),
		}
	}
}

pub(crate) struct RelayState {
	pub(crate) extension_tx: Option<mpsc::UnboundedSender<WsMessage>>,
	pub(crate) pending: HashMap<u64, oneshot::Sender<Result<Value, String>>>,
	pub(crate) agents: HashMap<TabId, AgentLink>,
	/// Set when a native agent announced focus, cleared when the extension reports a tab
	/// activation. The most recent focus source wins.
	pub(crate) focused_agent: Option<TabId>,
	next_call_id: u64,
}

impl RelayState {
	pub(crate) fn new() -> Self {
		Self {
			extension_tx: None,
			pending: HashMap::new(),
			agents: HashMap::new(),
			focused_agent: None,
			next_call_id: 0,
		}
	}

	fn next_id(&mut self) -> u64 {
		self.next_call_id += 1;
		self.next_call_id
	}

	pub(crate) fn clear_extension(&mut self) {
		self.extension_tx = None;
		for (_, pending) in self.pending.drain() {
			let _ = pending.send(Err("extension connection closed".to_string()));
		}
	}

	fn forget(&mut self, id: u64, agent: Option<TabId>) {
		match agent {
			Some(tab_id) => {
				if let Some(link) = self.agents.get_mut(&tab_id) {
					link.pending.remove(&id);
				}
			}
			None => {
				self.pending.remove(&id);
			}
		}
	}
}

pub(crate) type SharedState = Arc<Mutex<RelayState>>;

pub struct RelayBrowser {
	pub(crate) state: SharedState,
	call_timeout: Duration,
}

impl RelayBrowser {
	pub(crate) fn new(call_timeout: Duration) -> Self {
		Self {
			state: Arc::new(Mutex::new(RelayState::new())),
			call_timeout,
		}
	}

	async fn call_extension(&self, call: BridgeCall) -> Result<Value, CallError> {
		let (tx, id, rx) = {
			let mut st = self.state.lock().await;
			let tx = st.extension_tx.clone().ok_or(CallError::ExtensionMissing)?;
			let id = st.next_id();
			let (resp_tx, resp_rx) = oneshot::channel();
			st.pending.insert(id, resp_tx);
			(tx, id, resp_rx)
		};

		let request = serde_json::to_string(&BridgeRequest { id, call })?;
		if tx.send(WsMessage::Text(request.into())).is_err() {
			self.state.lock().await.forget(id, None);
			return Err(CallError::Closed);
		}

		self.wait(id, None, rx).await?.map_err(CallError::Remote)
	}

	async fn call_agent(&self, tab_id: TabId, message: Message) -> Result<Reply, CallError> {
		let (tx, id, rx) = {
			let mut st = self.state.lock().await;
			let id = st.next_id();
			let link = st.agents.get_mut(&tab_id).ok_or(CallError::AgentMissing(tab_id))?;
			let (resp_tx, resp_rx) = oneshot::channel();
			link.pending.insert(id, resp_tx);
			(link.tx.clone(), id, resp_rx)
		};

		let frame = serde_json::to_string(&AgentFrame::Request { id, message })?;
		if tx.send(WsMessage::Text(frame.into())).is_err() {
			self.state.lock().await.forget(id, Some(tab_id));
			return Err(CallError::Closed);
		}

		self.wait(id, Some(tab_id), rx).await
	}

	async fn wait<T>(&self, id: u64, agent: Option<TabId>, rx: oneshot::Receiver<T>) -> Result<T, CallError> {
		match tokio::time::timeout(self.call_timeout, rx).await {
			Ok(Ok(answer)) => Ok(answer),
			Ok(Err(_)) => Err(CallError::Closed),
			Err(_) => {
				self.state.lock().await.forget(id, agent);
				Err(CallError::Timeout(self.call_timeout))
			}
		}
	}

	async fn has_agent(&self, tab_id: TabId) -> bool {
		self.state.lock().await.agents.contains_key(&tab_id)
	}
}

#[async_trait]
impl Browser for RelayBrowser {
	async fn active_tab(&self) -> selcap::Result<Option<TabId>> {
		let (focused, extension) = {
			let st = self.state.lock().await;
			(st.focused_agent, st.extension_tx.is_some())
		};
		if focused.is_some() || !extension {
			return Ok(focused);
		}

		let value = self
			.call_extension(BridgeCall::ActiveTab)
			.await
			.map_err(|err| Error::Resolution(err.to_string()))?;
		serde_json::from_value(value).map_err(|err| Error::Resolution(format!("malformed tab id: {err}")))
	}

	async fn send_to_tab(&self, tab_id: TabId, message: Message) -> selcap::Result<Reply> {
		debug!(target = "selcap.relay", tab = tab_id, kind = message.kind(), "sending to tab");
		if self.has_agent(tab_id).await {
			return self
				.call_agent(tab_id, message)
				.await
				.map_err(|err| Error::tab_delivery(tab_id, err.to_string()));
		}

		let value = self
			.call_extension(BridgeCall::SendToTab { tab_id, message })
			.await
			.map_err(|err| Error::tab_delivery(tab_id, err.to_string()))?;
		serde_json::from_value(value).map_err(|err| Error::tab_delivery(tab_id, format!("malformed reply: {err}")))
	}

	async fn inject_agent(&self, tab_id: TabId) -> selcap::Result<()> {
		if self.has_agent(tab_id).await {
			return Ok(());
		}

		self.call_extension(BridgeCall::InjectAgent { tab_id })
			.await
			.map(|_| ())
			.map_err(|err| Error::Injection {
				tab_id,
				reason: err.to_string(),
			})
	}

	async fn open_panel(&self, window_id: WindowId) -> selcap::Result<()> {
		self.call_extension(BridgeCall::OpenPanel { window_id })
			.await
			.map(|_| ())
			.map_err(|err| Error::Delivery {
				destination: format!("window {window_id}"),
				reason: err.to_string(),
			})
	}
}
