//! sd-webui session relay.
//!
//! Owns one visible browser window pointed at a locally running Stable
//! Diffusion web UI and relays navigate/evaluate requests to it over a
//! WebSocket protocol. When the page is closed by the user the relay has
//! nothing left to relay to and the process terminates.

use std::sync::Arc;

use anyhow::Context;
use sdr_runtime::{LaunchConfig, Session};
use tracing::info;

pub mod cli;
pub mod error;
pub mod logging;
pub mod server;

use cli::Cli;
use server::PageDriver;

/// Launch the browser session and serve until the server fails or the page
/// is closed.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
	let port = cli.resolve_port();

	let config = LaunchConfig {
		executable: cli.browser.clone(),
		profile_dir: cli.profile_dir.clone(),
		start_url: cli.url.clone(),
	};

	let session = Session::launch(&config)
		.await
		.context("launching browser session")?;

	let page = session.page().clone();
	let driver: Arc<dyn PageDriver> = Arc::new(page.clone());

	tokio::select! {
		result = server::run_relay_server(port, driver) => {
			let _ = session.shutdown().await;
			result.context("relay server")?;
		}
		() = page.closed() => {
			info!(target = "sdr", "page closed; shutting down");
			session
				.shutdown()
				.await
				.context("shutting down browser")?;
		}
	}

	Ok(())
}
