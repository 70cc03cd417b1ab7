use async_trait::async_trait;

use crate::error::Result;
use crate::{Message, Reply, TabId, WindowId};

/// Browser capabilities the coordinator depends on.
///
/// Every call may fail at any time: tabs close, agents unload, the bridge disconnects.
/// Implementations report failures through the error taxonomy in [`crate::Error`]:
/// [`Delivery`](crate::Error::Delivery) for sends,
/// [`Resolution`](crate::Error::Resolution) for focus lookups and
/// [`Injection`](crate::Error::Injection) for agent installs.
#[async_trait]
pub trait Browser: Send + Sync + 'static {
	/// Returns the focused tab of the current window, if there is one.
	async fn active_tab(&self) -> Result<Option<TabId>>;

	/// Delivers `message` to the capture agent in `tab_id` and returns its reply.
	async fn send_to_tab(&self, tab_id: TabId, message: Message) -> Result<Reply>;

	/// Installs the capture agent program into `tab_id`.
	async fn inject_agent(&self, tab_id: TabId) -> Result<()>;

	/// Opens the panel UI in `window_id`.
	async fn open_panel(&self, window_id: WindowId) -> Result<()>;
}
