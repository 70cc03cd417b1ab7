//! Panel, relay-mirror and native agent sockets.

use anyhow::{Context, Result};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use selcap::protocol::AgentFrame;
use selcap::{Message, TabId};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use super::AppState;
use super::browser::AgentLink;

fn encode(message: &Message) -> Result<WsMessage> {
	let text = serde_json::to_string(message).context("encoding message")?;
	Ok(WsMessage::Text(text.into()))
}

/// One panel session per socket; the session ends with the socket.
pub(super) async fn handle_panel_socket(socket: WebSocket, app: AppState) {
	let mut lease = match app.coordinator.connect_session() {
		Ok(lease) => lease,
		Err(err) => {
			warn!(target = "selcap.relay", error = %err, "coordinator unavailable, closing panel socket");
			return;
		}
	};
	let session = lease.id();
	info!(target = "selcap.relay", %session, "panel connected");

	let (mut ws_tx, mut ws_rx) = socket.split();
	loop {
		tokio::select! {
			message = lease.recv() => {
				let Some(message) = message else { break };
				let Ok(frame) = encode(&message) else { continue };
				if ws_tx.send(frame).await.is_err() {
					break;
				}
			}
			frame = ws_rx.next() => match frame {
				Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
				Some(Ok(_)) => {}
			},
		}
	}

	info!(target = "selcap.relay", %session, "panel disconnected");
}

/// Streams the coordinator's secondary relay path without registering a session.
pub(super) async fn handle_relays_socket(socket: WebSocket, app: AppState) {
	let mut relays = app.coordinator.subscribe_relays();
	let (mut ws_tx, mut ws_rx) = socket.split();
	loop {
		tokio::select! {
			message = relays.recv() => match message {
				Ok(message) => {
					let Ok(frame) = encode(&message) else { continue };
					if ws_tx.send(frame).await.is_err() {
						break;
					}
				}
				Err(RecvError::Lagged(skipped)) => {
					warn!(target = "selcap.relay", skipped, "relay mirror lagged");
				}
				Err(RecvError::Closed) => break,
			},
			frame = ws_rx.next() => match frame {
				Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
				Some(Ok(_)) => {}
			},
		}
	}
}

pub(super) async fn handle_agent_socket(socket: WebSocket, app: AppState, tab_id: TabId) {
	info!(target = "selcap.relay", tab = tab_id, "native agent connected");

	let (tx, rx) = mpsc::unbounded_channel();
	{
		let mut st = app.browser.state.lock().await;
		if st.agents.insert(tab_id, AgentLink::new(tx.clone())).is_some() {
			warn!(target = "selcap.relay", tab = tab_id, "replaced existing agent connection");
		}
	}

	let mut rx_stream = UnboundedReceiverStream::new(rx);
	let (mut ws_tx, mut ws_rx) = socket.split();

	let send_task = tokio::spawn(async move {
		while let Some(msg) = rx_stream.next().await {
			if ws_tx.send(msg).await.is_err() {
				break;
			}
		}
	});

	while let Some(msg) = ws_rx.next().await {
		match msg {
			Ok(WsMessage::Text(text)) => {
				if let Err(err) = handle_agent_frame(&app, tab_id, &text).await {
					warn!(target = "selcap.relay", tab = tab_id, error = %err, "failed handling agent frame");
				}
			}
			Ok(WsMessage::Close(_)) => break,
			Ok(_) => {}
			Err(err) => {
				warn!(target = "selcap.relay", tab = tab_id, error = %err, "agent websocket error");
				break;
			}
		}
	}

	{
		let mut st = app.browser.state.lock().await;
		if st.agents.get(&tab_id).is_some_and(|link| link.tx.same_channel(&tx)) {
			st.agents.remove(&tab_id);
			if st.focused_agent == Some(tab_id) {
				st.focused_agent = None;
			}
		}
	}

	send_task.abort();
	info!(target = "selcap.relay", tab = tab_id, "native agent disconnected");
}

async fn handle_agent_frame(app: &AppState, tab_id: TabId, raw: &str) -> Result<()> {
	let frame: AgentFrame = serde_json::from_str(raw).context("parsing agent frame")?;

	match frame {
		AgentFrame::Reply { id, reply } => {
			let pending = {
				let mut st = app.browser.state.lock().await;
				st.agents.get_mut(&tab_id).and_then(|link| link.pending.remove(&id))
			};
			match pending {
				Some(sender) => {
					let _ = sender.send(reply);
				}
				None => warn!(target = "selcap.relay", tab = tab_id, id, "reply with unknown id from agent"),
			}
		}
		AgentFrame::Notify { message } => match message {
			Message::ReportSelection { text } => {
				debug!(target = "selcap.relay", tab = tab_id, "selection report");
				app.coordinator.agent_report(text);
			}
			Message::SetCapture { .. }
			| Message::RelaySelection { .. }
			| Message::GetPageContent
			| Message::GetSelectedText => {
				debug!(target = "selcap.relay", tab = tab_id, kind = message.kind(), "ignoring agent message");
			}
		},
		AgentFrame::Focus => {
			app.browser.state.lock().await.focused_agent = Some(tab_id);
			app.coordinator.tab_activated(tab_id);
		}
		AgentFrame::Request { id, .. } => {
			warn!(target = "selcap.relay", tab = tab_id, id, "agents do not issue requests");
		}
	}

	Ok(())
}
