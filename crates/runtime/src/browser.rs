//! Browser process management
//!
//! Handles locating a Chromium-family executable, launching it with a
//! persistent profile and a visible app-styled window, and recovering the
//! DevTools WebSocket endpoint from its stderr.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Stderr line prefix that carries the DevTools endpoint.
const DEVTOOLS_PREFIX: &str = "DevTools listening on ";

/// How long to wait for the browser to announce its DevTools endpoint.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Well-known executable names, tried in order on PATH.
const BROWSER_CANDIDATES: &[&str] = &[
    "google-chrome-stable",
    "google-chrome",
    "chromium",
    "chromium-browser",
    "chrome",
    "brave",
    "msedge",
];

/// Launch options for the owned browser instance.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Explicit executable path; overrides discovery when set.
    pub executable: Option<PathBuf>,
    /// Persistent profile directory (`--user-data-dir`).
    pub profile_dir: PathBuf,
    /// URL the app window opens with.
    pub start_url: String,
}

/// A launched browser child process with its DevTools endpoint.
#[derive(Debug)]
pub struct BrowserProcess {
    process: Child,
    ws_url: String,
}

impl BrowserProcess {
    /// Launch the browser and wait for its DevTools endpoint.
    ///
    /// The window is visible and app-styled (`--app`), the profile persists
    /// across runs, and no viewport constraint is imposed. DevTools picks an
    /// ephemeral port; the actual `ws://` URL is scraped from stderr.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BrowserNotFound`] if no executable can be located and
    /// [`Error::LaunchFailed`] if the process exits early or never announces
    /// its endpoint within the startup timeout.
    pub async fn launch(config: &LaunchConfig) -> Result<Self> {
        let executable = locate_browser(config.executable.as_deref())?;
        debug!(target = "sdr", browser = %executable.display(), "launching browser");

        let mut cmd = Command::new(&executable);
        cmd.arg("--remote-debugging-port=0")
            .arg(format!("--user-data-dir={}", config.profile_dir.display()))
            .arg(format!("--app={}", config.start_url))
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::LaunchFailed(format!("Failed to spawn {}: {e}", executable.display())))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::LaunchFailed("Browser stderr not captured".to_string()))?;

        let mut lines = BufReader::new(stderr).lines();

        let ws_url = tokio::time::timeout(STARTUP_TIMEOUT, async {
            while let Some(line) = lines
                .next_line()
                .await
                .map_err(|e| Error::LaunchFailed(format!("Failed reading browser stderr: {e}")))?
            {
                if let Some(url) = line.strip_prefix(DEVTOOLS_PREFIX) {
                    return Ok(url.trim().to_string());
                }
                debug!(target = "sdr", line, "browser stderr");
            }
            Err(Error::LaunchFailed(
                "Browser exited before announcing its DevTools endpoint".to_string(),
            ))
        })
        .await
        .map_err(|_| {
            Error::LaunchFailed(format!(
                "Browser did not announce its DevTools endpoint within {}s",
                STARTUP_TIMEOUT.as_secs()
            ))
        })??;

        // Keep draining stderr so the child never blocks on a full pipe.
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target = "sdr", line, "browser stderr");
            }
        });

        match child.try_wait() {
            Ok(Some(status)) => {
                return Err(Error::LaunchFailed(format!(
                    "Browser process exited immediately with status: {status}"
                )));
            }
            Ok(None) => {}
            Err(e) => {
                return Err(Error::LaunchFailed(format!(
                    "Failed to check browser process status: {e}"
                )));
            }
        }

        Ok(Self {
            process: child,
            ws_url,
        })
    }

    /// The browser-level DevTools WebSocket URL.
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Terminate the browser process and reap it.
    pub async fn shutdown(mut self) -> Result<()> {
        self.process
            .kill()
            .await
            .map_err(|e| Error::LaunchFailed(format!("Failed to kill browser: {e}")))?;

        let _ = tokio::time::timeout(Duration::from_secs(5), self.process.wait()).await;
        Ok(())
    }
}

/// Locate a Chromium-family executable.
///
/// Search order:
/// 1. The explicit override (CLI flag), which must exist
/// 2. `SDR_BROWSER` environment variable
/// 3. Well-known binary names on PATH
/// 4. Common absolute install locations
pub fn locate_browser(override_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = override_path {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        warn!(
            target = "sdr",
            path = %path.display(),
            "configured browser path does not exist; falling back to discovery"
        );
    }

    if let Ok(env_path) = std::env::var("SDR_BROWSER") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        warn!(
            target = "sdr",
            path = %path.display(),
            "SDR_BROWSER is set but does not exist; falling back to discovery"
        );
    }

    for candidate in BROWSER_CANDIDATES {
        if let Ok(path) = which::which(candidate) {
            return Ok(path);
        }
    }

    #[cfg(not(windows))]
    let common_locations = [
        "/usr/bin/chromium",
        "/usr/bin/google-chrome",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];

    #[cfg(windows)]
    let common_locations = [
        "C:\\Program Files\\Google\\Chrome\\Application\\chrome.exe",
        "C:\\Program Files (x86)\\Google\\Chrome\\Application\\chrome.exe",
    ];

    for location in &common_locations {
        let path = PathBuf::from(location);
        if path.exists() {
            return Ok(path);
        }
    }

    Err(Error::BrowserNotFound)
}
