use std::time::Duration;

use futures::{SinkExt, StreamExt};
use selcap::protocol::{AgentFrame, BridgeCall, BridgeEvent, BridgeRequest};
use selcap::{Config, Message, PanelSession, Reply};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::router;
use crate::agent::run_agent;
use crate::client::{WsConnector, spawn_mirror};
use crate::commands::print_relays;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn fast_config() -> Config {
	Config {
		settle_delay_ms: 10,
		debounce_ms: 20,
		query_timeout_ms: 300,
		..Config::default()
	}
}

async fn start(config: Config) -> String {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	let app = router(&config);
	tokio::spawn(async move {
		axum::serve(listener, app).await.unwrap();
	});
	addr.to_string()
}

async fn ws(addr: &str, path: &str) -> Socket {
	connect_async(format!("ws://{addr}{path}")).await.unwrap().0
}

async fn recv_json<T: DeserializeOwned>(socket: &mut Socket) -> T {
	loop {
		let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
			.await
			.expect("timed out waiting for a frame")
			.expect("socket closed")
			.unwrap();
		if let WsMessage::Text(text) = frame {
			return serde_json::from_str(&text).unwrap();
		}
	}
}

async fn send_json<T: Serialize>(socket: &mut Socket, value: &T) {
	let text = serde_json::to_string(value).unwrap();
	socket.send(WsMessage::Text(text)).await.unwrap();
}

async fn status(addr: &str) -> Value {
	reqwest::get(format!("http://{addr}/status"))
		.await
		.unwrap()
		.json()
		.await
		.unwrap()
}

async fn wait_for(addr: &str, ready: impl Fn(&Value) -> bool) {
	for _ in 0..250 {
		if ready(&status(addr).await) {
			return;
		}
		tokio::time::sleep(Duration::from_millis(20)).await;
	}
	panic!("relay never reached the expected state: {}", status(addr).await);
}

async fn expect_request(agent: &mut Socket, expected: Message) -> u64 {
	match recv_json::<AgentFrame>(agent).await {
		AgentFrame::Request { id, message } => {
			assert_eq!(message, expected);
			id
		}
		other => panic!("expected a request, got {other:?}"),
	}
}

async fn ack(agent: &mut Socket, id: u64) {
	send_json(
		agent,
		&AgentFrame::Reply {
			id,
			reply: Reply::Ack { success: true },
		},
	)
	.await;
}

#[tokio::test]
async fn native_agent_captures_for_panel() {
	let addr = start(fast_config()).await;
	let mut agent = ws(&addr, "/agent/7").await;
	send_json(&mut agent, &AgentFrame::Focus).await;
	wait_for(&addr, |s| s["focusedAgent"] == 7).await;

	let mut panel = ws(&addr, "/panel").await;
	let mut mirror = ws(&addr, "/relays").await;
	let id = expect_request(&mut agent, Message::SetCapture { enabled: true }).await;
	ack(&mut agent, id).await;
	wait_for(&addr, |s| s["targetTabId"] == 7 && s["sessions"] == 1).await;

	send_json(
		&mut agent,
		&AgentFrame::Notify {
			message: Message::ReportSelection {
				text: "picked".into(),
			},
		},
	)
	.await;
	assert_eq!(recv_json::<Message>(&mut panel).await, Message::relay("picked"));
	assert_eq!(recv_json::<Message>(&mut mirror).await, Message::relay("picked"));

	panel.close(None).await.unwrap();
	let id = expect_request(&mut agent, Message::SetCapture { enabled: false }).await;
	ack(&mut agent, id).await;
	wait_for(&addr, |s| s["sessions"] == 0 && s["targetTabId"].is_null()).await;
}

#[tokio::test]
async fn panel_command_prints_each_selection_once() {
	let addr = start(fast_config()).await;
	let mut agent = ws(&addr, "/agent/7").await;
	send_json(&mut agent, &AgentFrame::Focus).await;
	wait_for(&addr, |s| s["focusedAgent"] == 7).await;

	let retry = Duration::from_millis(50);
	let mirror = spawn_mirror(format!("ws://{addr}/relays"), retry);
	let session = PanelSession::new(WsConnector::new(format!("ws://{addr}/panel")), retry).with_mirror(mirror);
	let (tx, rx) = mpsc::unbounded_channel();
	let session = tokio::spawn(session.run(tx));

	let id = expect_request(&mut agent, Message::SetCapture { enabled: true }).await;
	ack(&mut agent, id).await;
	wait_for(&addr, |s| s["targetTabId"] == 7 && s["sessions"] == 1).await;
	// The mirror subscription is not visible in the status report.
	tokio::time::sleep(Duration::from_millis(200)).await;

	let printer = tokio::spawn(async move {
		let mut out = Vec::new();
		let result = print_relays(rx, &mut out).await;
		result.map(|()| out)
	});
	for text in ["once", "next"] {
		send_json(
			&mut agent,
			&AgentFrame::Notify {
				message: Message::ReportSelection { text: text.into() },
			},
		)
		.await;
		tokio::time::sleep(Duration::from_millis(200)).await;
	}

	session.abort();
	let out = printer.await.unwrap().unwrap();
	assert_eq!(String::from_utf8(out).unwrap(), "once\nnext\n");
}

#[tokio::test]
async fn content_query_through_native_agent() {
	let addr = start(fast_config()).await;

	let response = reqwest::get(format!("http://{addr}/content")).await.unwrap();
	assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);

	let mut agent = ws(&addr, "/agent/4").await;
	send_json(&mut agent, &AgentFrame::Focus).await;
	wait_for(&addr, |s| s["focusedAgent"] == 4).await;

	let request = tokio::spawn(reqwest::get(format!("http://{addr}/content?mode=page")));
	let id = expect_request(&mut agent, Message::GetPageContent).await;
	send_json(
		&mut agent,
		&AgentFrame::Reply {
			id,
			reply: Reply::PageContent {
				content: "whole page".into(),
				is_selected: false,
			},
		},
	)
	.await;

	let response = request.await.unwrap().unwrap();
	assert!(response.status().is_success());
	let body: Value = response.json().await.unwrap();
	assert_eq!(body, json!({"content": "whole page", "isSelected": false}));
}

#[tokio::test]
async fn silent_agent_times_out_content_query() {
	let addr = start(fast_config()).await;
	let mut agent = ws(&addr, "/agent/4").await;
	send_json(&mut agent, &AgentFrame::Focus).await;
	wait_for(&addr, |s| s["focusedAgent"] == 4).await;

	let response = reqwest::get(format!("http://{addr}/content?mode=selection")).await.unwrap();
	assert_eq!(response.status(), reqwest::StatusCode::GATEWAY_TIMEOUT);
	let body: Value = response.json().await.unwrap();
	assert_eq!(body["error"], "content query timed out after 300ms");
}

async fn respond(extension: &mut Socket, id: u64, result: Value) {
	send_json(
		extension,
		&BridgeEvent::Response {
			id,
			result: Some(result),
			error: None,
		},
	)
	.await;
}

#[tokio::test]
async fn extension_bridge_drives_coordinator() {
	let addr = start(fast_config()).await;
	let mut extension = ws(&addr, "/extension").await;
	wait_for(&addr, |s| s["extension"] == true).await;

	let mut panel = ws(&addr, "/panel").await;
	let request: BridgeRequest = recv_json(&mut extension).await;
	assert_eq!(request.call, BridgeCall::ActiveTab);
	respond(&mut extension, request.id, json!(5)).await;

	let request: BridgeRequest = recv_json(&mut extension).await;
	assert_eq!(
		request.call,
		BridgeCall::SendToTab {
			tab_id: 5,
			message: Message::SetCapture { enabled: true }
		}
	);
	respond(&mut extension, request.id, json!({"success": true})).await;

	send_json(
		&mut extension,
		&BridgeEvent::AgentMessage {
			tab_id: 5,
			message: Message::ReportSelection {
				text: "from page".into(),
			},
		},
	)
	.await;
	assert_eq!(recv_json::<Message>(&mut panel).await, Message::relay("from page"));

	// Focus moves: disable the old tab, then enable the new one.
	send_json(&mut extension, &BridgeEvent::TabActivated { tab_id: 9 }).await;
	let request: BridgeRequest = recv_json(&mut extension).await;
	assert_eq!(
		request.call,
		BridgeCall::SendToTab {
			tab_id: 5,
			message: Message::SetCapture { enabled: false }
		}
	);
	respond(&mut extension, request.id, json!({"success": true})).await;
	let request: BridgeRequest = recv_json(&mut extension).await;
	assert_eq!(
		request.call,
		BridgeCall::SendToTab {
			tab_id: 9,
			message: Message::SetCapture { enabled: true }
		}
	);
	respond(&mut extension, request.id, json!({"success": true})).await;

	send_json(
		&mut extension,
		&BridgeEvent::MenuInvoked {
			window_id: 1,
			text: "menu text".into(),
		},
	)
	.await;
	let request: BridgeRequest = recv_json(&mut extension).await;
	assert_eq!(request.call, BridgeCall::OpenPanel { window_id: 1 });
	respond(&mut extension, request.id, Value::Null).await;
	assert_eq!(recv_json::<Message>(&mut panel).await, Message::relay("menu text"));
}

#[tokio::test]
async fn failed_enable_injects_agent_through_extension() {
	let addr = start(fast_config()).await;
	let mut extension = ws(&addr, "/extension").await;
	wait_for(&addr, |s| s["extension"] == true).await;

	let _panel = ws(&addr, "/panel").await;
	let request: BridgeRequest = recv_json(&mut extension).await;
	respond(&mut extension, request.id, json!(2)).await;

	let request: BridgeRequest = recv_json(&mut extension).await;
	send_json(
		&mut extension,
		&BridgeEvent::Response {
			id: request.id,
			result: None,
			error: Some("Could not establish connection. Receiving end does not exist.".into()),
		},
	)
	.await;

	let request: BridgeRequest = recv_json(&mut extension).await;
	assert_eq!(request.call, BridgeCall::InjectAgent { tab_id: 2 });
	respond(&mut extension, request.id, Value::Null).await;

	let request: BridgeRequest = recv_json(&mut extension).await;
	assert_eq!(
		request.call,
		BridgeCall::SendToTab {
			tab_id: 2,
			message: Message::SetCapture { enabled: true }
		}
	);
}

#[tokio::test]
async fn terminal_agent_reports_selection_made_before_enable() {
	let addr = start(fast_config()).await;
	let (mut input, reader) = tokio::io::duplex(1024);
	let url = format!("ws://{addr}/agent/3");
	let agent = tokio::spawn(async move { run_agent(&url, Duration::from_millis(20), BufReader::new(reader)).await });

	input.write_all(b":page Full text\nhello world\n:focus\n").await.unwrap();
	wait_for(&addr, |s| s["focusedAgent"] == 3).await;

	let mut panel = ws(&addr, "/panel").await;
	assert_eq!(recv_json::<Message>(&mut panel).await, Message::relay("hello world"));

	let body: Value = reqwest::get(format!("http://{addr}/content?mode=selection"))
		.await
		.unwrap()
		.json()
		.await
		.unwrap();
	assert_eq!(body, json!({"text": "hello world"}));

	input.write_all(b"second pick\n").await.unwrap();
	assert_eq!(recv_json::<Message>(&mut panel).await, Message::relay("second pick"));

	agent.abort();
}
