//! Directive delivery with one-shot agent injection.
//!
//! Directives are delivered by a single dispatcher task in the order they were issued, so a
//! disable for the previous target always reaches the browser before the enable for the next.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::browser::Browser;
use crate::error::{Error, Result};
use crate::{Message, Reply, TabId};

/// Enable or disable instruction for the capture agent of one tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Directive {
	pub tab_id: TabId,
	pub enabled: bool,
}

impl Directive {
	pub fn enable(tab_id: TabId) -> Self {
		Self {
			tab_id,
			enabled: true,
		}
	}

	pub fn disable(tab_id: TabId) -> Self {
		Self {
			tab_id,
			enabled: false,
		}
	}
}

/// Starts the dispatcher and returns its queue.
///
/// The task ends when every sender is dropped.
pub fn spawn_dispatcher<B: Browser>(browser: Arc<B>) -> mpsc::UnboundedSender<Directive> {
	let (tx, mut rx) = mpsc::unbounded_channel::<Directive>();
	tokio::spawn(async move {
		while let Some(directive) = rx.recv().await {
			match deliver(browser.as_ref(), directive).await {
				Ok(()) => {
					debug!(target = "selcap", tab = directive.tab_id, enabled = directive.enabled, "directive delivered");
				}
				Err(err) if directive.enabled => {
					warn!(target = "selcap", tab = directive.tab_id, error = %err, "enable directive dropped");
				}
				Err(err) => {
					debug!(target = "selcap", tab = directive.tab_id, error = %err, "disable directive dropped");
				}
			}
		}
	});
	tx
}

/// Delivers one directive.
///
/// A failed enable injects the agent program and retries exactly once. A failed disable is
/// returned as is: an agent that is gone has nothing left to stop.
pub async fn deliver<B: Browser + ?Sized>(browser: &B, directive: Directive) -> Result<()> {
	let first = send_directive(browser, directive).await;
	let err = match first {
		Ok(()) => return Ok(()),
		Err(err) => err,
	};
	if !directive.enabled {
		return Err(err);
	}

	debug!(target = "selcap", tab = directive.tab_id, error = %err, "agent unreachable, injecting");
	browser.inject_agent(directive.tab_id).await?;
	send_directive(browser, directive).await
}

async fn send_directive<B: Browser + ?Sized>(browser: &B, directive: Directive) -> Result<()> {
	let reply = browser
		.send_to_tab(
			directive.tab_id,
			Message::SetCapture {
				enabled: directive.enabled,
			},
		)
		.await?;

	match reply {
		Reply::Ack { success: true } => Ok(()),
		Reply::Ack { success: false } => Err(Error::tab_delivery(
			directive.tab_id,
			"agent refused directive",
		)),
		Reply::PageContent { .. } | Reply::SelectedText { .. } => Err(Error::tab_delivery(
			directive.tab_id,
			"unexpected reply to setCapture",
		)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{Call, FakeBrowser};

	#[tokio::test]
	async fn enable_succeeds_without_injection() {
		let browser = FakeBrowser::new();
		deliver(&browser, Directive::enable(3)).await.unwrap();
		assert_eq!(browser.calls(), vec![Call::Send(3, true)]);
	}

	#[tokio::test]
	async fn failed_enable_injects_and_retries_once() {
		let browser = FakeBrowser::new();
		browser.fail_sends_to(3, 1);

		deliver(&browser, Directive::enable(3)).await.unwrap();
		assert_eq!(
			browser.calls(),
			vec![Call::Send(3, true), Call::Inject(3), Call::Send(3, true)]
		);
	}

	#[tokio::test]
	async fn enable_is_dropped_after_failed_retry() {
		let browser = FakeBrowser::new();
		browser.fail_sends_to(3, 2);

		let err = deliver(&browser, Directive::enable(3)).await.unwrap_err();
		assert!(matches!(err, Error::Delivery { .. }), "got {err:?}");
		assert_eq!(browser.calls().len(), 3, "exactly one retry");
	}

	#[tokio::test]
	async fn enable_is_dropped_when_injection_fails() {
		let browser = FakeBrowser::new();
		browser.fail_sends_to(3, 1);
		browser.fail_injection(true);

		let err = deliver(&browser, Directive::enable(3)).await.unwrap_err();
		assert!(matches!(err, Error::Injection { tab_id: 3, .. }), "got {err:?}");
		assert_eq!(browser.calls(), vec![Call::Send(3, true), Call::Inject(3)]);
	}

	#[tokio::test]
	async fn failed_disable_never_injects() {
		let browser = FakeBrowser::new();
		browser.fail_sends_to(4, 1);

		assert!(deliver(&browser, Directive::disable(4)).await.is_err());
		assert_eq!(browser.calls(), vec![Call::Send(4, false)]);
	}

	#[tokio::test]
	async fn refused_ack_counts_as_failure() {
		let browser = FakeBrowser::new();
		browser.refuse_directives(true);

		let err = deliver(&browser, Directive::disable(5)).await.unwrap_err();
		assert!(err.to_string().contains("refused"), "got {err}");
	}
}
