//! WebSocket clients of the relay: panel sessions and the relay mirror.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use selcap::{Connector, Error, Message, MessageStream};
use tokio::sync::broadcast;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

/// Opens panel channels on the relay's `/panel` socket.
#[derive(Debug, Clone)]
pub struct WsConnector {
	url: String,
}

impl WsConnector {
	pub fn new(url: impl Into<String>) -> Self {
		Self { url: url.into() }
	}
}

#[async_trait]
impl Connector for WsConnector {
	async fn connect(&self) -> selcap::Result<MessageStream> {
		message_stream(&self.url)
			.await
			.map_err(|err| Error::Delivery {
				destination: self.url.clone(),
				reason: format!("{err:#}"),
			})
	}
}

/// Connects to `url` and yields every capture message received until the socket closes.
async fn message_stream(url: &str) -> anyhow::Result<MessageStream> {
	let (socket, _) = connect_async(url)
		.await
		.with_context(|| format!("connecting to {url}"))?;
	debug!(target = "selcap.panel", url, "socket open");

	let messages = stream::unfold(socket, |mut socket| async move {
		loop {
			match socket.next().await? {
				Ok(WsMessage::Text(text)) => match serde_json::from_str::<Message>(&text) {
					Ok(message) => return Some((message, socket)),
					Err(err) => warn!(target = "selcap.panel", error = %err, "dropping malformed message"),
				},
				Ok(WsMessage::Close(_)) => return None,
				Ok(_) => {}
				Err(err) => {
					warn!(target = "selcap.panel", error = %err, "socket error");
					return None;
				}
			}
		}
	});
	Ok(messages.boxed())
}

/// Follows the relay's `/relays` mirror, reconnecting after `reconnect_delay`, and republishes
/// it locally. Stops once every receiver is gone.
pub fn spawn_mirror(url: String, reconnect_delay: Duration) -> broadcast::Receiver<Message> {
	let (tx, rx) = broadcast::channel(64);
	tokio::spawn(async move {
		loop {
			match message_stream(&url).await {
				Ok(mut messages) => {
					while let Some(message) = messages.next().await {
						if tx.send(message).is_err() {
							return;
						}
					}
				}
				Err(err) => debug!(target = "selcap.panel", error = %err, "mirror connect failed"),
			}
			if tx.receiver_count() == 0 {
				return;
			}
			tokio::time::sleep(reconnect_delay).await;
		}
	});
	rx
}
