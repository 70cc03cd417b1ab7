//! The relay server: hosts the coordinator and connects it to the outside.
//!
//! | route | peer |
//! |-------|------|
//! | `/extension` | the extension background bridge |
//! | `/panel` | a panel session |
//! | `/relays` | the secondary relay path, no session registered |
//! | `/agent/{tab_id}` | a native capture agent |
//! | `GET /content?mode=page\|selection` | content query against the focused tab |
//! | `GET /status` | registry snapshot and connected peers |

mod browser;
mod extension;
mod sockets;

#[cfg(test)]
mod tests;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use selcap::{Config, Coordinator, CoordinatorHandle, TabId};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};

use browser::{CALL_TIMEOUT, RelayBrowser};

#[derive(Clone)]
pub(crate) struct AppState {
	coordinator: CoordinatorHandle,
	browser: Arc<RelayBrowser>,
	query_timeout: Duration,
}

/// Builds the relay routes around a freshly spawned coordinator.
pub fn router(config: &Config) -> Router {
	let browser = Arc::new(RelayBrowser::new(CALL_TIMEOUT));
	let coordinator = Coordinator::spawn(Arc::clone(&browser), config);
	let app = AppState {
		coordinator,
		browser,
		query_timeout: config.query_timeout(),
	};

	Router::new()
		.route("/", get(|| async { "OK" }))
		.route(
			"/extension",
			get(|ws: WebSocketUpgrade, State(app): State<AppState>| async move {
				ws.on_upgrade(|socket| extension::handle_extension_socket(socket, app))
			}),
		)
		.route(
			"/panel",
			get(|ws: WebSocketUpgrade, State(app): State<AppState>| async move {
				ws.on_upgrade(|socket| sockets::handle_panel_socket(socket, app))
			}),
		)
		.route(
			"/relays",
			get(|ws: WebSocketUpgrade, State(app): State<AppState>| async move {
				ws.on_upgrade(|socket| sockets::handle_relays_socket(socket, app))
			}),
		)
		.route(
			"/agent/{tab_id}",
			get(
				|Path(tab_id): Path<TabId>, ws: WebSocketUpgrade, State(app): State<AppState>| async move {
					ws.on_upgrade(move |socket| sockets::handle_agent_socket(socket, app, tab_id))
				},
			),
		)
		.route("/content", get(content))
		.route("/status", get(status))
		.with_state(app)
}

pub async fn run_relay_server(config: &Config) -> Result<()> {
	let host = &config.relay.host;
	let port = config.relay.port;
	let addr: SocketAddr = format!("{host}:{port}")
		.parse()
		.with_context(|| format!("invalid host/port combination: {host}:{port}"))?;

	info!(target = "selcap.relay", %host, port, "starting relay server");

	let listener = TcpListener::bind(addr)
		.await
		.with_context(|| format!("failed to bind relay server to {addr}"))?;

	axum::serve(listener, router(config).into_make_service())
		.await
		.context("relay server error")
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ContentMode {
	#[default]
	Page,
	Selection,
}

#[derive(Debug, Deserialize)]
struct ContentParams {
	#[serde(default)]
	mode: ContentMode,
}

async fn content(State(app): State<AppState>, Query(params): Query<ContentParams>) -> Response {
	let outcome = match params.mode {
		ContentMode::Page => selcap::page_content(app.browser.as_ref(), app.query_timeout)
			.await
			.map(|content| json!(content)),
		ContentMode::Selection => selcap::selected_text(app.browser.as_ref(), app.query_timeout)
			.await
			.map(|text| json!({ "text": text })),
	};

	match outcome {
		Ok(body) => Json(body).into_response(),
		Err(err) => {
			let status = if err.is_timeout() {
				StatusCode::GATEWAY_TIMEOUT
			} else {
				StatusCode::BAD_GATEWAY
			};
			warn!(target = "selcap.relay", error = %err, "content query failed");
			(status, Json(json!({ "error": err.to_string() }))).into_response()
		}
	}
}

async fn status(State(app): State<AppState>) -> Response {
	let snapshot = match app.coordinator.snapshot().await {
		Ok(snapshot) => snapshot,
		Err(err) => {
			return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": err.to_string() }))).into_response();
		}
	};

	let st = app.browser.state.lock().await;
	let mut agents: Vec<TabId> = st.agents.keys().copied().collect();
	agents.sort_unstable();
	Json(json!({
		"sessions": snapshot.sessions,
		"targetTabId": snapshot.target_tab_id,
		"extension": st.extension_tx.is_some(),
		"agents": agents,
		"focusedAgent": st.focused_agent,
	}))
	.into_response()
}
