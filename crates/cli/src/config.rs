//! Locating the configuration and settings files.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use selcap::{Config, JsonFileStore};
use tracing::debug;

const APP_DIR: &str = "selcap";

fn app_dir() -> Result<PathBuf> {
	dirs::config_dir()
		.map(|dir| dir.join(APP_DIR))
		.ok_or_else(|| anyhow!("no configuration directory for this platform"))
}

/// Loads `explicit` if given, else the default config file when it exists, else defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
	if let Some(path) = explicit {
		return Config::load(path).with_context(|| format!("loading config from {}", path.display()));
	}

	let Ok(dir) = app_dir() else {
		return Ok(Config::default());
	};
	let path = dir.join("config.json");
	if path.exists() {
		debug!(target = "selcap", path = %path.display(), "loading config");
		Config::load(&path).with_context(|| format!("loading config from {}", path.display()))
	} else {
		Ok(Config::default())
	}
}

/// The settings store shared by `complete` and `settings`.
pub fn settings_store() -> Result<JsonFileStore> {
	Ok(JsonFileStore::new(app_dir()?.join("settings.json")))
}
