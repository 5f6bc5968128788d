use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use serde_json::{json, Value};

use super::cdp::CdpConnection;
use crate::engine::{DriverError, PageDriver};

/// One attached browser tab, driven over a flat-mode CDP session.
pub struct Tab {
    conn: Arc<CdpConnection>,
    session_id: String,
    target_id: String,
}

impl Tab {
    pub(crate) async fn attach(conn: Arc<CdpConnection>) -> Result<Self, DriverError> {
        let created = conn
            .call(None, "Target.createTarget", json!({ "url": "about:blank" }))
            .await?;
        let target_id = created["targetId"]
            .as_str()
            .ok_or_else(|| DriverError::Protocol("createTarget returned no targetId".into()))?
            .to_string();

        let attached = conn
            .call(
                None,
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await?;
        let session_id = attached["sessionId"]
            .as_str()
            .ok_or_else(|| DriverError::Protocol("attachToTarget returned no sessionId".into()))?
            .to_string();

        let tab = Self {
            conn,
            session_id,
            target_id,
        };
        tab.call("Page.enable", json!({})).await?;
        tab.call("Runtime.enable", json!({})).await?;
        Ok(tab)
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, DriverError> {
        self.conn
            .call(Some(&self.session_id), method, params)
            .await
    }
}

#[async_trait]
impl PageDriver for Tab {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        let result = self.call("Page.navigate", json!({ "url": url })).await?;
        if let Some(error_text) = result["errorText"].as_str().filter(|t| !t.is_empty()) {
            return Err(DriverError::Protocol(format!("navigate: {error_text}")));
        }
        Ok(())
    }

    async fn eval(&self, expression: &str) -> Result<Value, DriverError> {
        let result = self
            .call(
                "Runtime.evaluate",
                json!({ "expression": expression, "returnByValue": true }),
            )
            .await?;
        if let Some(details) = result.get("exceptionDetails") {
            let text = details["exception"]["description"]
                .as_str()
                .or_else(|| details["text"].as_str())
                .unwrap_or("unknown exception");
            return Err(DriverError::Eval(text.to_string()));
        }
        Ok(result["result"]["value"].clone())
    }

    async fn scroll_by(&self, pixels: i64) -> Result<(), DriverError> {
        self.eval(&format!("window.scrollBy(0, {pixels});")).await?;
        Ok(())
    }

    async fn close(&self) {
        let result = self
            .conn
            .call(
                None,
                "Target.closeTarget",
                json!({ "targetId": self.target_id }),
            )
            .await;
        if let Err(err) = result {
            debug!("closing tab {} failed: {err}", self.target_id);
        }
    }
}
