//! A capture agent that stands in for a browser tab, fed from a line-oriented input.
//!
//! Input lines:
//!
//! - `:focus` announces that the tab gained focus.
//! - `:page <text>` replaces the page text.
//! - anything else replaces the selection and fires a selection change.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use selcap::protocol::AgentFrame;
use selcap::{AgentCall, CaptureAgent, Page, PageEvent};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct Document {
	selection: String,
	text: String,
	listening: bool,
}

/// Page whose selection and text are set from the input lines.
#[derive(Debug, Clone, Default)]
pub struct LinePage(Arc<Mutex<Document>>);

impl LinePage {
	pub fn set_selection(&self, selection: &str) {
		self.0.lock().selection = selection.to_string();
	}

	pub fn set_text(&self, text: &str) {
		self.0.lock().text = text.to_string();
	}

	fn is_listening(&self) -> bool {
		self.0.lock().listening
	}
}

impl Page for LinePage {
	fn attach_listeners(&mut self) {
		self.0.lock().listening = true;
	}

	fn detach_listeners(&mut self) {
		self.0.lock().listening = false;
	}

	fn selection(&self) -> String {
		self.0.lock().selection.clone()
	}

	fn page_text(&self) -> String {
		self.0.lock().text.clone()
	}
}

/// One parsed input line.
#[derive(Debug, PartialEq, Eq)]
enum Line<'a> {
	Focus,
	Page(&'a str),
	Selection(&'a str),
}

fn parse_line(line: &str) -> Line<'_> {
	if line.trim() == ":focus" {
		Line::Focus
	} else if let Some(text) = line.strip_prefix(":page ") {
		Line::Page(text)
	} else {
		Line::Selection(line)
	}
}

fn encode(frame: &AgentFrame) -> Result<WsMessage> {
	Ok(WsMessage::Text(serde_json::to_string(frame).context("encoding agent frame")?))
}

/// Connects to `url` (the relay's `/agent/{tab_id}` socket) and runs the agent until the socket
/// closes. The input ending leaves the agent running with its last selection.
pub async fn run_agent<R>(url: &str, debounce_window: Duration, input: R) -> Result<()>
where
	R: AsyncBufRead + Unpin + Send + 'static,
{
	let (socket, _) = connect_async(url)
		.await
		.with_context(|| format!("connecting to {url}"))?;
	info!(target = "selcap.agent", url, "agent connected");
	let (mut ws_tx, mut ws_rx) = socket.split();

	let page = LinePage::default();
	let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<AgentFrame>();
	let (reports_tx, mut reports_rx) = mpsc::unbounded_channel();
	let (calls_tx, calls_rx) = mpsc::unbounded_channel::<AgentCall>();
	let (events_tx, events_rx) = mpsc::unbounded_channel();

	let agent = CaptureAgent::new(page.clone(), debounce_window, reports_tx);
	let agent_task = tokio::spawn(agent.run(calls_rx, events_rx));

	let input_task = {
		let frames = frames_tx.clone();
		tokio::spawn(async move {
			let mut lines = input.lines();
			loop {
				let line = match lines.next_line().await {
					Ok(Some(line)) => line,
					Ok(None) => break,
					Err(err) => {
						warn!(target = "selcap.agent", error = %err, "input error");
						break;
					}
				};
				match parse_line(&line) {
					Line::Focus => {
						let _ = frames.send(AgentFrame::Focus);
					}
					Line::Page(text) => page.set_text(text),
					Line::Selection(text) => {
						page.set_selection(text);
						// Like a document, events only reach attached listeners.
						if page.is_listening() {
							let _ = events_tx.send(PageEvent::SelectionChange);
						}
					}
				}
			}
			debug!(target = "selcap.agent", "input closed");
		})
	};

	let result = loop {
		tokio::select! {
			frame = frames_rx.recv() => {
				let Some(frame) = frame else { break Ok(()) };
				if let Err(err) = ws_tx.send(encode(&frame)?).await {
					break Err(err).context("sending agent frame");
				}
			}
			report = reports_rx.recv() => {
				let Some(message) = report else { break Ok(()) };
				if let Err(err) = ws_tx.send(encode(&AgentFrame::Notify { message })?).await {
					break Err(err).context("sending selection report");
				}
			}
			incoming = ws_rx.next() => match incoming {
				Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<AgentFrame>(&text) {
					Ok(AgentFrame::Request { id, message }) => {
						let (call, reply) = AgentCall::new(message);
						if calls_tx.send(call).is_err() {
							break Ok(());
						}
						let frames = frames_tx.clone();
						tokio::spawn(async move {
							// Kinds the agent never answers drop the reply sender.
							if let Ok(reply) = reply.await {
								let _ = frames.send(AgentFrame::Reply { id, reply });
							}
						});
					}
					Ok(other) => debug!(target = "selcap.agent", ?other, "ignoring frame"),
					Err(err) => warn!(target = "selcap.agent", error = %err, "malformed frame"),
				},
				Some(Ok(WsMessage::Close(_))) | None => break Ok(()),
				Some(Ok(_)) => {}
				Some(Err(err)) => break Err(err).context("agent socket error"),
			},
		}
	};

	input_task.abort();
	drop(calls_tx);
	let _ = agent_task.await;
	info!(target = "selcap.agent", "agent disconnected");
	result
}
