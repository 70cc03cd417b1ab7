//! User settings persistence.
//!
//! A key-value store with `get(keys, defaults)` / `set(values)` semantics, plus the typed
//! [`Settings`] view used by the completion commands.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

pub type SettingsMap = serde_json::Map<String, Value>;

#[async_trait]
pub trait SettingsStore: Send + Sync {
	/// Returns the stored value for every key in `keys` and in `defaults`, falling back to
	/// the default when nothing is stored. Keys with neither are omitted.
	async fn get(&self, keys: &[&str], defaults: &SettingsMap) -> Result<SettingsMap>;

	/// Stores every entry of `values`, leaving other keys untouched.
	async fn set(&self, values: SettingsMap) -> Result<()>;
}

fn select(stored: &SettingsMap, keys: &[&str], defaults: &SettingsMap) -> SettingsMap {
	let mut out = defaults.clone();
	for key in keys.iter().copied().chain(defaults.keys().map(String::as_str)) {
		if let Some(value) = stored.get(key) {
			out.insert(key.to_string(), value.clone());
		}
	}
	out
}

/// Settings held in memory only.
#[derive(Debug, Default)]
pub struct MemoryStore {
	values: Mutex<SettingsMap>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl SettingsStore for MemoryStore {
	async fn get(&self, keys: &[&str], defaults: &SettingsMap) -> Result<SettingsMap> {
		Ok(select(&self.values.lock(), keys, defaults))
	}

	async fn set(&self, values: SettingsMap) -> Result<()> {
		self.values.lock().extend(values);
		Ok(())
	}
}

/// Settings persisted as one JSON object in a file.
///
/// A missing file reads as empty. Writes replace the file through a temporary sibling.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
	path: PathBuf,
}

impl JsonFileStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	async fn read_all(&self) -> Result<SettingsMap> {
		match tokio::fs::read_to_string(&self.path).await {
			Ok(raw) if raw.trim().is_empty() => Ok(SettingsMap::new()),
			Ok(raw) => Ok(serde_json::from_str(&raw)?),
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(SettingsMap::new()),
			Err(err) => Err(err.into()),
		}
	}
}

#[async_trait]
impl SettingsStore for JsonFileStore {
	async fn get(&self, keys: &[&str], defaults: &SettingsMap) -> Result<SettingsMap> {
		let stored = self.read_all().await?;
		Ok(select(&stored, keys, defaults))
	}

	async fn set(&self, values: SettingsMap) -> Result<()> {
		let mut stored = self.read_all().await?;
		stored.extend(values);

		if let Some(parent) = self.path.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}
		let tmp = self.path.with_extension("json.tmp");
		tokio::fs::write(&tmp, serde_json::to_vec_pretty(&stored)?).await?;
		tokio::fs::rename(&tmp, &self.path).await?;
		Ok(())
	}
}

/// The settings the panel UI exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
	pub api_key: String,
	pub theme: String,
	pub default_tab: String,
	pub target_language: String,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			api_key: String::new(),
			theme: "light".to_string(),
			default_tab: "translate".to_string(),
			target_language: "zh".to_string(),
		}
	}
}

impl Settings {
	pub fn defaults_map() -> SettingsMap {
		match serde_json::to_value(Self::default()) {
			Ok(Value::Object(map)) => map,
			_ => SettingsMap::new(),
		}
	}

	pub async fn load(store: &dyn SettingsStore) -> Result<Self> {
		let map = store.get(&[], &Self::defaults_map()).await?;
		Ok(serde_json::from_value(Value::Object(map))?)
	}

	pub async fn save(&self, store: &dyn SettingsStore) -> Result<()> {
		match serde_json::to_value(self)? {
			Value::Object(map) => store.set(map).await,
			_ => Ok(()),
		}
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn map(value: Value) -> SettingsMap {
		match value {
			Value::Object(map) => map,
			other => panic!("not an object: {other}"),
		}
	}

	#[tokio::test]
	async fn get_falls_back_to_defaults() {
		let store = MemoryStore::new();
		store.set(map(json!({"theme": "dark"}))).await.unwrap();

		let got = store
			.get(&[], &map(json!({"theme": "light", "targetLanguage": "zh"})))
			.await
			.unwrap();
		assert_eq!(Value::Object(got), json!({"theme": "dark", "targetLanguage": "zh"}));
	}

	#[tokio::test]
	async fn get_returns_requested_keys_without_defaults() {
		let store = MemoryStore::new();
		store.set(map(json!({"apiKey": "k", "other": 1}))).await.unwrap();

		let got = store.get(&["apiKey", "missing"], &SettingsMap::new()).await.unwrap();
		assert_eq!(Value::Object(got), json!({"apiKey": "k"}));
	}

	#[tokio::test]
	async fn file_store_persists_across_instances() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("nested").join("settings.json");

		let settings = Settings {
			api_key: "secret".into(),
			..Settings::default()
		};
		settings.save(&JsonFileStore::new(&path)).await.unwrap();

		let reloaded = Settings::load(&JsonFileStore::new(&path)).await.unwrap();
		assert_eq!(reloaded, settings);
	}

	#[tokio::test]
	async fn missing_file_reads_as_defaults() {
		let dir = tempfile::tempdir().unwrap();
		let store = JsonFileStore::new(dir.path().join("absent.json"));
		assert_eq!(Settings::load(&store).await.unwrap(), Settings::default());
	}

	#[tokio::test]
	async fn set_merges_with_existing_values() {
		let dir = tempfile::tempdir().unwrap();
		let store = JsonFileStore::new(dir.path().join("settings.json"));
		store.set(map(json!({"theme": "dark"}))).await.unwrap();
		store.set(map(json!({"apiKey": "k"}))).await.unwrap();

		let got = store.get(&["theme", "apiKey"], &SettingsMap::new()).await.unwrap();
		assert_eq!(Value::Object(got), json!({"theme": "dark", "apiKey": "k"}));
	}
}
