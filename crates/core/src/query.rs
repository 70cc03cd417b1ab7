//! Pull-based content queries against the focused tab's capture agent.
//!
//! Independent of the push path: they neither read nor change capture state, and they are the
//! one place where failures reach the caller.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::browser::Browser;
use crate::error::{Error, Result};
use crate::{Message, Reply};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageContent {
	pub content: String,
	/// `true` when `content` is the selection rather than the whole page.
	pub is_selected: bool,
}

/// Returns the selection of the focused tab, or its page text when nothing is selected.
pub async fn page_content<B: Browser + ?Sized>(browser: &B, timeout: Duration) -> Result<PageContent> {
	match query(browser, Message::GetPageContent, timeout).await? {
		Reply::PageContent {
			content,
			is_selected,
		} => Ok(PageContent {
			content,
			is_selected,
		}),
		Reply::Ack { .. } | Reply::SelectedText { .. } => Err(unexpected("getPageContent")),
	}
}

/// Returns the selection of the focused tab, possibly empty.
pub async fn selected_text<B: Browser + ?Sized>(browser: &B, timeout: Duration) -> Result<String> {
	match query(browser, Message::GetSelectedText, timeout).await? {
		Reply::SelectedText { text } => Ok(text),
		Reply::Ack { .. } | Reply::PageContent { .. } => Err(unexpected("getSelectedText")),
	}
}

async fn query<B: Browser + ?Sized>(browser: &B, message: Message, timeout: Duration) -> Result<Reply> {
	let exchange = async {
		let tab_id = browser
			.active_tab()
			.await?
			.ok_or_else(|| Error::Resolution("no focused tab".into()))?;
		browser.send_to_tab(tab_id, message).await
	};

	tokio::time::timeout(timeout, exchange)
		.await
		.map_err(|_| Error::QueryTimeout {
			ms: timeout.as_millis() as u64,
		})?
}

fn unexpected(kind: &str) -> Error {
	Error::Delivery {
		destination: "focused tab".into(),
		reason: format!("unexpected reply to {kind}"),
	}
}
