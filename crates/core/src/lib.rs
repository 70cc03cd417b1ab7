//! selcap: selection capture coordination.
//!
//! The pieces, from the page outward:
//!
//! - [`CaptureAgent`] runs per tab, observes the selection while enabled and reports it.
//! - [`Coordinator`] tracks open panel sessions, decides which tab captures, and relays
//!   reports to every session.
//! - [`PanelSession`] keeps a panel connected to the coordinator and surfaces relays.
//!
//! The coordinator talks to the browser only through the [`Browser`] trait, so the same
//! logic runs behind the extension bridge, native agents or a test double.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use selcap::{Config, Coordinator};
//!
//! let coordinator = Coordinator::spawn(Arc::new(browser), &Config::default());
//! let mut session = coordinator.connect_session()?;
//! coordinator.tab_activated(7);
//! while let Some(message) = session.recv().await {
//!     println!("{message:?}");
//! }
//! ```

pub mod agent;
pub mod browser;
pub mod completion;
pub mod config;
pub mod coordinator;
pub mod debounce;
pub mod delivery;
pub mod error;
pub mod panel;
pub mod query;
pub mod registry;
pub mod settings;

#[cfg(test)]
pub(crate) mod testing;

pub use agent::{AgentCall, CaptureAgent, CaptureState, Page, PageEvent};
pub use browser::Browser;
pub use completion::{CompletionClient, CompletionError};
pub use config::{CompletionConfig, Config, RelayConfig};
pub use coordinator::{Coordinator, CoordinatorHandle, SessionLease};
pub use delivery::Directive;
pub use error::{Error, Result};
pub use panel::{Connector, MessageStream, PanelSession, Relay, RelayPath};
pub use query::{PageContent, page_content, selected_text};
pub use registry::{RegistrySnapshot, SessionHandle, SessionId};
pub use selcap_protocol as protocol;
pub use selcap_protocol::{Message, Origin, Reply, TabId, WindowId};
pub use settings::{JsonFileStore, MemoryStore, Settings, SettingsMap, SettingsStore};
