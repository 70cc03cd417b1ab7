use std::io::Write;

use anyhow::{Context, Result, anyhow, bail};
use selcap::{CompletionClient, Config, JsonFileStore, PanelSession, Relay, Settings, SettingsMap, SettingsStore};
use serde_json::Value;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::debug;

use crate::cli::{Cli, Commands, SettingsAction};
use crate::client::{WsConnector, spawn_mirror};
use crate::{agent, config, relay};

pub async fn dispatch(cli: Cli) -> Result<()> {
	let mut config = config::load_config(cli.config.as_deref())?;

	match cli.command {
		Commands::Serve { host, port } => {
			if let Some(host) = host {
				config.relay.host = host;
			}
			if let Some(port) = port {
				config.relay.port = port;
			}
			relay::run_relay_server(&config).await
		}
		Commands::Panel { url } => panel(&config, url).await,
		Commands::Agent { tab, url } => {
			let base = url.unwrap_or_else(|| config.relay.ws_url());
			let url = format!("{}/agent/{tab}", base.trim_end_matches('/'));
			let input = BufReader::new(tokio::io::stdin());
			agent::run_agent(&url, config.debounce_window(), input).await
		}
		Commands::Content { selection, url } => content(&config, selection, url).await,
		Commands::Complete { prompt } => complete(&config, &prompt).await,
		Commands::Settings { action } => {
			let store = config::settings_store()?;
			settings(action, &store).await
		}
	}
}

async fn panel(config: &Config, url: Option<String>) -> Result<()> {
	let base = url.unwrap_or_else(|| config.relay.ws_url());
	let base = base.trim_end_matches('/');
	let mirror = spawn_mirror(format!("{base}/relays"), config.reconnect_delay());
	let session = PanelSession::new(WsConnector::new(format!("{base}/panel")), config.reconnect_delay()).with_mirror(mirror);

	let (tx, rx) = mpsc::unbounded_channel();
	let task = tokio::spawn(session.run(tx));
	let result = print_relays(rx, &mut std::io::stdout()).await;
	task.abort();
	result
}

/// Prints relayed selections until `relays` closes. Like the side panel, the latest text
/// replaces what is shown, so a relay arriving on both paths is printed once.
pub(crate) async fn print_relays<W>(mut relays: mpsc::UnboundedReceiver<Relay>, out: &mut W) -> Result<()>
where
	W: Write + Send,
{
	let mut shown: Option<String> = None;
	while let Some(relay) = relays.recv().await {
		debug!(target = "selcap.panel", path = ?relay.path, "relay received");
		if shown.as_deref() == Some(relay.text.as_str()) {
			continue;
		}
		writeln!(out, "{}", relay.text).context("writing relay")?;
		out.flush().context("writing relay")?;
		shown = Some(relay.text);
	}
	Ok(())
}

async fn content(config: &Config, selection: bool, url: Option<String>) -> Result<()> {
	let base = url.unwrap_or_else(|| config.relay.http_url());
	let mode = if selection { "selection" } else { "page" };
	let url = format!("{}/content?mode={mode}", base.trim_end_matches('/'));

	let response = reqwest::get(&url)
		.await
		.with_context(|| format!("requesting {url}"))?;
	let status = response.status();
	let body: Value = response.json().await.context("decoding relay response")?;
	if !status.is_success() {
		let reason = body.get("error").and_then(Value::as_str).unwrap_or("unknown error");
		bail!("content query failed ({status}): {reason}");
	}

	let text = body
		.get(if selection { "text" } else { "content" })
		.and_then(Value::as_str)
		.ok_or_else(|| anyhow!("relay response missing content"))?;
	println!("{text}");
	Ok(())
}

async fn complete(config: &Config, prompt: &str) -> Result<()> {
	let store = config::settings_store()?;
	let settings = Settings::load(&store).await?;
	let client = CompletionClient::new(config.completion.clone(), settings.api_key);
	let text = client.complete(prompt).await?;
	println!("{text}");
	Ok(())
}

async fn settings(action: SettingsAction, store: &JsonFileStore) -> Result<()> {
	match action {
		SettingsAction::Get { keys } => {
			let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
			let mut values = store.get(&keys, &Settings::defaults_map()).await?;
			if !keys.is_empty() {
				values.retain(|key, _| keys.contains(&key.as_str()));
			}
			println!("{}", serde_json::to_string_pretty(&values)?);
		}
		SettingsAction::Set { pairs } => {
			let values = parse_pairs(&pairs)?;
			store.set(values).await?;
		}
	}
	Ok(())
}

/// Parses `KEY=VALUE` pairs. Values that are valid JSON are stored as such, anything else as
/// a string.
fn parse_pairs(pairs: &[String]) -> Result<SettingsMap> {
	let mut values = SettingsMap::new();
	for pair in pairs {
		let (key, raw) = pair
			.split_once('=')
			.ok_or_else(|| anyhow!("expected KEY=VALUE, got {pair:?}"))?;
		if key.is_empty() {
			bail!("empty key in {pair:?}");
		}
		let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
		values.insert(key.to_string(), value);
	}
	Ok(values)
}

#[cfg(test)]
mod tests {
	use selcap::RelayPath;
	use serde_json::json;

	use super::*;

	#[tokio::test]
	async fn relay_on_both_paths_prints_once() {
		let (tx, rx) = mpsc::unbounded_channel();
		for (text, path) in [
			("first", RelayPath::Broadcast),
			("first", RelayPath::Channel),
			("second", RelayPath::Channel),
			("first", RelayPath::Channel),
		] {
			tx.send(Relay { text: text.into(), path }).unwrap();
		}
		drop(tx);

		let mut out = Vec::new();
		print_relays(rx, &mut out).await.unwrap();
		assert_eq!(String::from_utf8(out).unwrap(), "first\nsecond\nfirst\n");
	}

	#[test]
	fn pairs_parse_json_or_string() {
		let values = parse_pairs(&["theme=dark".into(), "retries=3".into(), "apiKey=a=b".into()]).unwrap();
		assert_eq!(
			Value::Object(values),
			json!({"theme": "dark", "retries": 3, "apiKey": "a=b"})
		);
	}

	#[test]
	fn pairs_without_separator_are_rejected() {
		assert!(parse_pairs(&["theme".into()]).is_err());
		assert!(parse_pairs(&["=dark".into()]).is_err());
	}

	#[tokio::test]
	async fn settings_set_then_get_round_trips_through_file() {
		let dir = tempfile::tempdir().unwrap();
		let store = JsonFileStore::new(dir.path().join("settings.json"));

		settings(SettingsAction::Set { pairs: vec!["targetLanguage=en".into()] }, &store)
			.await
			.unwrap();
		let loaded = Settings::load(&store).await.unwrap();
		assert_eq!(loaded.target_language, "en");
		assert_eq!(loaded.theme, "light");
	}
}
