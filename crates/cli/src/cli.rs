use std::path::PathBuf;

use clap::Parser;

/// Port used when neither `--port` nor a usable `SDR_PORT` is present.
pub const DEFAULT_PORT: u16 = 8573;

/// Environment variable consulted when `--port` is absent.
pub const PORT_ENV: &str = "SDR_PORT";

/// Relay between a local WebSocket client and one owned browser page.
#[derive(Parser, Debug)]
#[command(name = "sdr")]
#[command(about = "sd-webui session relay - forwards navigate/evaluate requests to one browser page")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v debug, -vv trace)
	#[arg(short, long, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Listening port (overrides SDR_PORT)
	#[arg(short, long, value_name = "PORT")]
	pub port: Option<u16>,

	/// Persistent browser profile directory
	#[arg(long, value_name = "DIR", default_value = "cache")]
	pub profile_dir: PathBuf,

	/// Browser executable (overrides SDR_BROWSER and discovery)
	#[arg(long, value_name = "PATH")]
	pub browser: Option<PathBuf>,

	/// URL the browser app window opens with
	#[arg(long, value_name = "URL", default_value = "http://127.0.0.1:7860/")]
	pub url: String,
}

impl Cli {
	/// Resolve the listening port: flag, then environment, then default.
	pub fn resolve_port(&self) -> u16 {
		match self.port {
			Some(port) => port,
			None => port_from_env(std::env::var(PORT_ENV).ok().as_deref()),
		}
	}
}

/// Parse a port from an environment value.
///
/// Unset, empty, or non-numeric values fall back to [`DEFAULT_PORT`]. A
/// literal `"0"` is a valid request for an ephemeral port, not a request for
/// the default.
pub fn port_from_env(value: Option<&str>) -> u16 {
	value
		.map(str::trim)
		.filter(|v| !v.is_empty())
		.and_then(|v| v.parse().ok())
		.unwrap_or(DEFAULT_PORT)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unset_port_falls_back_to_default() {
		assert_eq!(port_from_env(None), DEFAULT_PORT);
	}

	#[test]
	fn non_numeric_port_falls_back_to_default() {
		assert_eq!(port_from_env(Some("eight")), DEFAULT_PORT);
		assert_eq!(port_from_env(Some("")), DEFAULT_PORT);
		assert_eq!(port_from_env(Some("8573x")), DEFAULT_PORT);
		assert_eq!(port_from_env(Some("-1")), DEFAULT_PORT);
		assert_eq!(port_from_env(Some("70000")), DEFAULT_PORT);
	}

	#[test]
	fn numeric_port_is_used_exactly() {
		assert_eq!(port_from_env(Some("9000")), 9000);
		assert_eq!(port_from_env(Some(" 9000 ")), 9000);
	}

	#[test]
	fn zero_is_a_real_port_not_the_default() {
		assert_eq!(port_from_env(Some("0")), 0);
	}

	#[test]
	fn flag_takes_precedence_over_environment() {
		let cli = Cli::parse_from(["sdr", "--port", "1234"]);
		assert_eq!(cli.resolve_port(), 1234);
	}
}
