use std::path::PathBuf;

use clap::builder::Styles;
use clap::builder::styling::AnsiColor;
use clap::{Parser, Subcommand};
use selcap::TabId;

fn cli_styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Green.on_default().bold())
		.usage(AnsiColor::Green.on_default().bold())
		.literal(AnsiColor::Cyan.on_default())
		.placeholder(AnsiColor::Cyan.on_default())
}

#[derive(Parser, Debug)]
#[command(name = "selcap")]
#[command(about = "Selection capture relay and terminal clients")]
#[command(version)]
#[command(styles = cli_styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Configuration file (defaults to <config dir>/selcap/config.json)
	#[arg(long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Run the relay: coordinator, extension bridge, panel and agent endpoints
	Serve {
		/// Interface to bind (overrides the config file)
		#[arg(long)]
		host: Option<String>,
		/// Port to bind (overrides the config file)
		#[arg(long)]
		port: Option<u16>,
	},

	/// Open a panel session and print every relayed selection
	Panel {
		/// Relay WebSocket base URL
		#[arg(long, value_name = "URL")]
		url: Option<String>,
	},

	/// Run a capture agent standing in for a tab, fed from stdin
	///
	/// Each input line replaces the selection. `:focus` announces that the tab gained focus,
	/// `:page <text>` replaces the page text.
	Agent {
		/// Tab id the agent answers for
		#[arg(long, value_name = "ID")]
		tab: TabId,
		/// Relay WebSocket base URL
		#[arg(long, value_name = "URL")]
		url: Option<String>,
	},

	/// Query the focused tab's content through the relay
	Content {
		/// Ask for the selection only instead of selection-or-page
		#[arg(long)]
		selection: bool,
		/// Relay HTTP base URL
		#[arg(long, value_name = "URL")]
		url: Option<String>,
	},

	/// Send a prompt to the completion service with the stored API key
	Complete {
		prompt: String,
	},

	/// Read or write stored settings
	Settings {
		#[command(subcommand)]
		action: SettingsAction,
	},
}

#[derive(Subcommand, Debug)]
pub enum SettingsAction {
	/// Print stored settings merged over the defaults
	Get {
		/// Keys to print (all when omitted)
		keys: Vec<String>,
	},
	/// Store KEY=VALUE pairs; values are parsed as JSON when possible
	Set {
		#[arg(required = true, value_name = "KEY=VALUE")]
		pairs: Vec<String>,
	},
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_agent_command() {
		let cli = Cli::try_parse_from(["selcap", "-vv", "agent", "--tab", "7"]).unwrap();
		assert_eq!(cli.verbose, 2);
		assert!(matches!(cli.command, Commands::Agent { tab: 7, url: None }));
	}

	#[test]
	fn settings_set_requires_pairs() {
		assert!(Cli::try_parse_from(["selcap", "settings", "set"]).is_err());
		let cli = Cli::try_parse_from(["selcap", "settings", "set", "theme=dark"]).unwrap();
		match cli.command {
			Commands::Settings {
				action: SettingsAction::Set { pairs },
			} => assert_eq!(pairs, vec!["theme=dark"]),
			other => panic!("unexpected command: {other:?}"),
		}
	}

	#[test]
	fn global_config_flag_after_subcommand() {
		let cli = Cli::try_parse_from(["selcap", "serve", "--port", "9000", "--config", "c.json"]).unwrap();
		assert_eq!(cli.config, Some(PathBuf::from("c.json")));
		assert!(matches!(cli.command, Commands::Serve { host: None, port: Some(9000) }));
	}
}
