//! Panel Session: keeps a channel to the coordinator open and surfaces relayed selections.
//!
//! Relays arrive on two paths: the session's own channel and the coordinator's
//! session-independent broadcast. Both are at-most-once with no replay, and the same relay
//! may show up once per path; consumers that care must tolerate duplicates.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::coordinator::CoordinatorHandle;
use crate::error::Result;
use crate::Message;

/// Messages arriving on one open channel. The channel is closed when the stream ends.
pub type MessageStream = BoxStream<'static, Message>;

/// Opens channels to a coordinator.
#[async_trait]
pub trait Connector: Send + Sync {
	async fn connect(&self) -> Result<MessageStream>;
}

#[async_trait]
impl Connector for CoordinatorHandle {
	async fn connect(&self) -> Result<MessageStream> {
		Ok(self.connect_session()?.boxed())
	}
}

/// Which path a relay came in on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayPath {
	Channel,
	Broadcast,
}

/// A selection relayed to this panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relay {
	pub text: String,
	pub path: RelayPath,
}

pub struct PanelSession<C> {
	connector: C,
	mirror: Option<broadcast::Receiver<Message>>,
	reconnect_delay: Duration,
}

impl<C: Connector> PanelSession<C> {
	pub fn new(connector: C, reconnect_delay: Duration) -> Self {
		Self {
			connector,
			mirror: None,
			reconnect_delay,
		}
	}

	/// Also listens on the coordinator's broadcast path, connected or not.
	pub fn with_mirror(mut self, mirror: broadcast::Receiver<Message>) -> Self {
		self.mirror = Some(mirror);
		self
	}

	/// Runs until `out` is closed. Reconnects after every closure or failed attempt, waiting
	/// `reconnect_delay` in between.
	pub async fn run(mut self, out: mpsc::UnboundedSender<Relay>) {
		loop {
			match self.connector.connect().await {
				Ok(mut channel) => {
					info!(target = "selcap.panel", "panel channel open");
					loop {
						tokio::select! {
							message = channel.next() => match message {
								Some(message) => {
									if !forward(&out, message, RelayPath::Channel) {
										return;
									}
								}
								None => break,
							},
							message = next_mirrored(&mut self.mirror) => {
								if !forward(&out, message, RelayPath::Broadcast) {
									return;
								}
							}
							() = out.closed() => return,
						}
					}
					warn!(target = "selcap.panel", delay_ms = self.reconnect_delay.as_millis() as u64, "panel channel closed, reconnecting");
				}
				Err(err) => {
					warn!(target = "selcap.panel", error = %err, delay_ms = self.reconnect_delay.as_millis() as u64, "panel connect failed, retrying");
				}
			}

			let retry = tokio::time::sleep(self.reconnect_delay);
			tokio::pin!(retry);
			loop {
				tokio::select! {
					() = &mut retry => break,
					message = next_mirrored(&mut self.mirror) => {
						if !forward(&out, message, RelayPath::Broadcast) {
							return;
						}
					}
					() = out.closed() => return,
				}
			}
		}
	}
}

/// Passes relays on and ignores every other kind. Returns `false` once `out` is closed.
fn forward(out: &mpsc::UnboundedSender<Relay>, message: Message, path: RelayPath) -> bool {
	match message {
		Message::RelaySelection { text, .. } => out.send(Relay { text, path }).is_ok(),
		Message::ReportSelection { .. }
		| Message::SetCapture { .. }
		| Message::GetPageContent
		| Message::GetSelectedText => {
			debug!(target = "selcap.panel", kind = message.kind(), "ignoring non-relay message");
			true
		}
	}
}

/// Next message on the broadcast path; never resolves when there is none.
async fn next_mirrored(mirror: &mut Option<broadcast::Receiver<Message>>) -> Message {
	loop {
		let Some(rx) = mirror.as_mut() else {
			return std::future::pending().await;
		};
		match rx.recv().await {
			Ok(message) => return message,
			Err(RecvError::Lagged(skipped)) => {
				warn!(target = "selcap.panel", skipped, "broadcast path lagged, relays skipped");
			}
			Err(RecvError::Closed) => *mirror = None,
		}
	}
}
