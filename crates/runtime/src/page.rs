//! The single owned page
//!
//! A [`Session`] owns one browser process, one CDP connection, and one
//! attached page. The page exposes exactly the surface the relay needs:
//! navigate, evaluate, and a close notification. There is deliberately no
//! multi-tab management; when the page goes away the session is over.

use crate::browser::{BrowserProcess, LaunchConfig};
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::transport;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// One browser, one connection, one page.
pub struct Session {
    browser: BrowserProcess,
    page: Page,
    run_handle: JoinHandle<()>,
}

/// Handle to the attached page.
#[derive(Clone)]
pub struct Page {
    connection: Arc<Connection>,
    target_id: String,
    session_id: String,
}

impl Session {
    /// Launch the browser, connect over CDP, and attach to its first page.
    ///
    /// The browser opens with exactly one app window; that window's target is
    /// adopted. A fresh `about:blank` target is created only if discovery
    /// finds no page at all (some Chromium builds report the app window late).
    pub async fn launch(config: &LaunchConfig) -> Result<Self> {
        let browser = BrowserProcess::launch(config).await?;

        let parts = transport::connect(browser.ws_url()).await?;
        let connection = Arc::new(Connection::new(parts));
        let run_handle = tokio::spawn(Arc::clone(&connection).run());

        connection
            .send_command("Target.setDiscoverTargets", None, json!({"discover": true}))
            .await?;

        let targets = connection
            .send_command("Target.getTargets", None, json!({}))
            .await?;

        let target_id = match first_page_target(&targets) {
            Some(id) => id,
            None => {
                debug!(target = "sdr", "no page target yet; creating one");
                let created = connection
                    .send_command("Target.createTarget", None, json!({"url": "about:blank"}))
                    .await?;
                created
                    .get("targetId")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
                    .ok_or_else(|| {
                        Error::ProtocolError("Target.createTarget returned no targetId".to_string())
                    })?
            }
        };

        let attached = connection
            .send_command(
                "Target.attachToTarget",
                None,
                json!({"targetId": target_id, "flatten": true}),
            )
            .await?;

        let session_id = attached
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| {
                Error::ProtocolError("Target.attachToTarget returned no sessionId".to_string())
            })?;

        info!(target = "sdr", %target_id, "attached to page");

        Ok(Self {
            browser,
            page: Page {
                connection,
                target_id,
                session_id,
            },
            run_handle,
        })
    }

    /// The attached page.
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Kill the browser and tear the connection down.
    pub async fn shutdown(self) -> Result<()> {
        let result = self.browser.shutdown().await;
        self.run_handle.abort();
        result
    }
}

impl Page {
    /// Navigate the page to `url` and wait for the navigation to be accepted.
    pub async fn goto(&self, url: &str) -> Result<()> {
        let reply = self
            .connection
            .send_command("Page.navigate", Some(&self.session_id), json!({"url": url}))
            .await?;

        // Page.navigate resolves with errorText when the load cannot start
        // (bad scheme, refused connection, DNS failure).
        if let Some(reason) = reply
            .get("errorText")
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
        {
            return Err(Error::Navigation {
                url: url.to_string(),
                reason: reason.to_string(),
            });
        }

        Ok(())
    }

    /// Evaluate a script in the page and return its JSON-coerced value.
    ///
    /// Promises are awaited; a thrown exception maps to [`Error::Js`]; an
    /// undefined result maps to `null`.
    pub async fn evaluate(&self, code: &str) -> Result<Value> {
        let reply = self
            .connection
            .send_command(
                "Runtime.evaluate",
                Some(&self.session_id),
                json!({
                    "expression": code,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(details) = reply.get("exceptionDetails") {
            return Err(Error::Js(exception_message(details)));
        }

        Ok(reply
            .get("result")
            .and_then(|result| result.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Resolve once the page is gone.
    ///
    /// Fires on `Target.targetDestroyed` for the owned target, on
    /// `Inspector.detached` for the owned session, or when the connection
    /// itself dies. There is no recovery from any of these.
    pub async fn closed(&self) {
        let mut events = self.connection.subscribe();
        loop {
            match events.recv().await {
                Ok(event) => {
                    if event.method == "Target.targetDestroyed"
                        && event.params.get("targetId").and_then(Value::as_str)
                            == Some(self.target_id.as_str())
                    {
                        return;
                    }
                    if event.method == "Inspector.detached"
                        && event.session_id.as_deref() == Some(self.session_id.as_str())
                    {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(target = "sdr", skipped, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}

/// Pick the first `page`-type target from a `Target.getTargets` reply.
fn first_page_target(targets: &Value) -> Option<String> {
    targets
        .get("targetInfos")?
        .as_array()?
        .iter()
        .find(|info| info.get("type").and_then(Value::as_str) == Some("page"))
        .and_then(|info| info.get("targetId"))
        .and_then(Value::as_str)
        .map(str::to_owned)
}

/// Extract a readable message from `exceptionDetails`.
///
/// Prefers the exception object's description (carries the stack for thrown
/// `Error`s), then its coerced value, then the bare `text` field.
fn exception_message(details: &Value) -> String {
    if let Some(description) = details
        .get("exception")
        .and_then(|e| e.get("description"))
        .and_then(Value::as_str)
    {
        return description.to_string();
    }

    if let Some(value) = details.get("exception").and_then(|e| e.get("value")) {
        return value.to_string();
    }

    details
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or("Uncaught exception")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Event, Message};
    use serde_json::json;
    use std::time::Duration;
    use tokio::task::yield_now;
    use tokio::time::timeout;

    fn detached_page(target_id: &str, session_id: &str) -> Page {
        Page {
            connection: Arc::new(Connection::detached()),
            target_id: target_id.to_string(),
            session_id: session_id.to_string(),
        }
    }

    /// Spawn `closed()` and wait until it has subscribed to events.
    async fn watch_closed(page: &Page) -> JoinHandle<()> {
        let watcher = {
            let page = page.clone();
            tokio::spawn(async move { page.closed().await })
        };
        while page.connection.subscriber_count() == 0 {
            yield_now().await;
        }
        watcher
    }

    async fn destroyed_event(page: &Page, target_id: &str) {
        page.connection
            .dispatch(Message::Event(Event {
                method: "Target.targetDestroyed".to_string(),
                session_id: None,
                params: json!({"targetId": target_id}),
            }))
            .await;
    }

    #[tokio::test]
    async fn closed_resolves_when_owned_target_is_destroyed() {
        let page = detached_page("T1", "S1");
        let watcher = watch_closed(&page).await;

        // Some other target going away must not end the session.
        destroyed_event(&page, "OTHER").await;
        yield_now().await;
        assert!(!watcher.is_finished());

        destroyed_event(&page, "T1").await;
        timeout(Duration::from_secs(1), watcher)
            .await
            .expect("closed() must resolve once the owned target is destroyed")
            .unwrap();
    }

    #[tokio::test]
    async fn closed_resolves_when_owned_session_detaches() {
        let page = detached_page("T1", "S1");
        let watcher = watch_closed(&page).await;

        page.connection
            .dispatch(Message::Event(Event {
                method: "Inspector.detached".to_string(),
                session_id: Some("S1".to_string()),
                params: json!({"reason": "target_closed"}),
            }))
            .await;

        timeout(Duration::from_secs(1), watcher)
            .await
            .expect("closed() must resolve once the owned session detaches")
            .unwrap();
    }

    #[tokio::test]
    async fn closed_resolves_when_connection_dies() {
        let page = detached_page("T1", "S1");
        let watcher = watch_closed(&page).await;

        page.connection.close().await;

        timeout(Duration::from_secs(1), watcher)
            .await
            .expect("closed() must resolve once the connection is gone")
            .unwrap();
    }

    #[test]
    fn first_page_target_skips_non_page_targets() {
        let targets = json!({
            "targetInfos": [
                {"targetId": "BG1", "type": "background_page"},
                {"targetId": "P1", "type": "page"},
                {"targetId": "P2", "type": "page"},
            ]
        });
        assert_eq!(first_page_target(&targets).as_deref(), Some("P1"));
    }

    #[test]
    fn first_page_target_handles_empty_list() {
        assert_eq!(first_page_target(&json!({"targetInfos": []})), None);
        assert_eq!(first_page_target(&json!({})), None);
    }

    #[test]
    fn exception_message_prefers_description() {
        let details = json!({
            "text": "Uncaught",
            "exception": {
                "description": "ReferenceError: foo is not defined\n    at <anonymous>:1:1"
            }
        });
        assert!(exception_message(&details).starts_with("ReferenceError: foo is not defined"));
    }

    #[test]
    fn exception_message_falls_back_to_thrown_value() {
        let details = json!({
            "text": "Uncaught",
            "exception": {"value": "plain string throw"}
        });
        assert_eq!(exception_message(&details), "\"plain string throw\"");
    }

    #[test]
    fn exception_message_falls_back_to_text() {
        let details = json!({"text": "Uncaught SyntaxError"});
        assert_eq!(exception_message(&details), "Uncaught SyntaxError");
    }
}
