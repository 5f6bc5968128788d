//! Headless-browser integration: launches Chromium with a throwaway profile
//! and drives pages over the DevTools protocol.

mod cdp;
mod tab;

pub use tab::Tab;

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use log::{info, warn};
use serde_json::json;
use tempfile::TempDir;
use tokio::process::{Child, Command};

use crate::config::Config;
use crate::engine::{DriverError, PageDriver, TabSource};
use crate::session::SessionCookie;
use cdp::CdpConnection;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36";
const ENDPOINT_POLL: Duration = Duration::from_millis(250);
const ENDPOINT_TRIES: u32 = 60;

/// A launched headless browser. The child process and its temp profile live
/// as long as this handle; `quit` tears both down.
pub struct Browser {
    conn: Arc<CdpConnection>,
    child: Child,
    // Held for its Drop: deletes the throwaway profile directory.
    _profile: TempDir,
}

impl Browser {
    pub async fn launch(cfg: &Config) -> Result<Self> {
        let profile = tempfile::tempdir().context("creating browser profile dir")?;

        let child = Command::new(&cfg.browser_binary)
            .arg("--headless=new")
            .arg("--no-sandbox")
            .arg("--incognito")
            .arg("--disable-gpu")
            .arg(format!("--remote-debugging-port={}", cfg.cdp_port))
            .arg(format!("--user-data-dir={}", profile.path().display()))
            .arg(format!("--user-agent={USER_AGENT}"))
            .arg("about:blank")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("launching {}", cfg.browser_binary))?;

        let ws_url = discover_ws_endpoint(cfg.cdp_port)
            .await
            .context("discovering devtools endpoint")?;
        info!("devtools endpoint up at {ws_url}");

        let conn = CdpConnection::connect(&ws_url)
            .await
            .context("connecting to devtools")?;

        Ok(Self {
            conn,
            child,
            _profile: profile,
        })
    }

    /// Injects session cookies browser-wide before the first navigation.
    pub async fn set_cookies(&self, cookies: &[SessionCookie]) -> Result<()> {
        if cookies.is_empty() {
            return Ok(());
        }
        let payload: Vec<_> = cookies
            .iter()
            .map(|cookie| {
                json!({
                    "name": cookie.name,
                    "value": cookie.value,
                    "domain": cookie.domain,
                    "path": "/",
                })
            })
            .collect();
        self.conn
            .call(None, "Storage.setCookies", json!({ "cookies": payload }))
            .await
            .context("setting session cookies")?;
        info!("synced {} session cookies into the browser", cookies.len());
        Ok(())
    }

    pub async fn quit(mut self) {
        if let Err(err) = self.conn.call(None, "Browser.close", json!({})).await {
            warn!("Browser.close failed ({err}), killing process");
        }
        let _ = self.child.kill().await;
    }
}

#[async_trait]
impl TabSource for Browser {
    async fn open_tab(&self) -> Result<Box<dyn PageDriver>, DriverError> {
        let tab = Tab::attach(Arc::clone(&self.conn)).await?;
        Ok(Box::new(tab))
    }
}

/// Polls the DevTools HTTP endpoint until the browser publishes its
/// websocket debugger URL.
async fn discover_ws_endpoint(port: u16) -> Result<String> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .context("building endpoint discovery client")?;
    let url = format!("http://127.0.0.1:{port}/json/version");

    for _ in 0..ENDPOINT_TRIES {
        if let Ok(resp) = http.get(&url).send().await {
            if let Ok(body) = resp.json::<serde_json::Value>().await {
                if let Some(ws) = body["webSocketDebuggerUrl"].as_str() {
                    return Ok(ws.to_string());
                }
            }
        }
        tokio::time::sleep(ENDPOINT_POLL).await;
    }
    bail!("devtools endpoint never came up on port {port}")
}
