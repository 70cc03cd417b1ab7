use anyhow::{Context, Result};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use selcap::Message;
use selcap::protocol::BridgeEvent;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use super::AppState;

pub(super) async fn handle_extension_socket(socket: WebSocket, app: AppState) {
	info!(target = "selcap.relay", "extension connected");

	let (tx, rx) = mpsc::unbounded_channel();
	{
		let mut st = app.browser.state.lock().await;
		if st.extension_tx.is_some() {
			warn!(target = "selcap.relay", "replacing existing extension connection");
			st.clear_extension();
		}
		st.extension_tx = Some(tx.clone());
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
				if let Err(err) = handle_extension_message(&app, &text).await {
					warn!(target = "selcap.relay", error = %err, "failed handling extension message");
				}
			}
			Ok(WsMessage::Close(_)) => break,
			Ok(_) => {}
			Err(err) => {
				warn!(target = "selcap.relay", error = %err, "extension websocket error");
				break;
			}
		}
	}

	{
		let mut st = app.browser.state.lock().await;
		// A newer connection may already have taken over.
		if st.extension_tx.as_ref().is_some_and(|current| current.same_channel(&tx)) {
			st.clear_extension();
		}
	}

	send_task.abort();
	info!(target = "selcap.relay", "extension disconnected");
}

async fn handle_extension_message(app: &AppState, raw: &str) -> Result<()> {
	let event: BridgeEvent = serde_json::from_str(raw).context("parsing extension message")?;
	let navigated = event.is_navigation_complete();

	match event {
		BridgeEvent::Response { id, result, error } => {
			let pending = app.browser.state.lock().await.pending.remove(&id);
			match pending {
				Some(sender) => {
					let outcome = match error {
						Some(error) => Err(error),
						None => Ok(result.unwrap_or_default()),
					};
					let _ = sender.send(outcome);
				}
				None => warn!(target = "selcap.relay", id, "response with unknown id from extension"),
			}
		}
		BridgeEvent::TabActivated { tab_id } => {
			app.browser.state.lock().await.focused_agent = None;
			app.coordinator.tab_activated(tab_id);
		}
		BridgeEvent::TabUpdated { tab_id, .. } if navigated => {
			app.coordinator.navigation_complete(tab_id);
		}
		BridgeEvent::TabUpdated { .. } => {}
		BridgeEvent::AgentMessage { tab_id, message } => match message {
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
		BridgeEvent::MenuInvoked { window_id, text } => {
			app.coordinator.menu_invoked(window_id, text);
		}
		BridgeEvent::Log { level, message } => {
			debug!(target = "selcap.relay", level = %level, text = %message, "extension log");
		}
	}

	Ok(())
}
