//! Best-effort completion notifications. Every channel failure is logged and
//! swallowed: a lost notification never fails a run.

use chrono::Utc;
use log::{error, info};
use serde_json::json;
use std::time::Duration;

use crate::config::Config;
use crate::engine::CampaignReport;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds the plain status line for the push channels.
pub fn status_line(cfg: &Config, report: Option<&CampaignReport>) -> String {
    let mut status = format!(
        "[{}] Daily login OK: {}",
        Utc::now().format("%Y-%m-%d %H:%M UTC"),
        cfg.username
    );
    match report {
        Some(report) => {
            status.push_str(&format!(
                " | visited {} topics ({} completed, {} partial, {} failed; {}-{} pages each, grow={})",
                report.attempted,
                report.completed,
                report.partial,
                report.failed,
                cfg.min_pages,
                cfg.max_pages,
                cfg.grow_threshold,
            ));
        }
        None => status.push_str(" | browsing disabled"),
    }
    status
}

pub struct Notifier {
    http: reqwest::Client,
    gotify: Option<(String, String)>,
    webhook: Option<(String, String)>,
}

impl Notifier {
    pub fn new(cfg: &Config) -> Self {
        let http = reqwest::Client::builder()
            .timeout(NOTIFY_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            gotify: cfg
                .gotify_url
                .clone()
                .zip(cfg.gotify_token.clone()),
            webhook: cfg
                .webhook_url
                .clone()
                .zip(cfg.webhook_token.clone()),
        }
    }

    pub async fn send(&self, status: &str) {
        if self.gotify.is_none() && self.webhook.is_none() {
            info!("no notification channels configured, skipping push");
            return;
        }
        if let Some((url, token)) = &self.gotify {
            self.send_gotify(url, token, status).await;
        }
        if let Some((url, token)) = &self.webhook {
            self.send_webhook(url, token, status).await;
        }
    }

    async fn send_gotify(&self, url: &str, token: &str, status: &str) {
        let result = self
            .http
            .post(format!("{url}/message"))
            .query(&[("token", token)])
            .json(&json!({ "title": "wellread", "message": status, "priority": 1 }))
            .send()
            .await
            .and_then(|resp| resp.error_for_status());
        match result {
            Ok(_) => info!("pushed status to gotify"),
            Err(err) => error!("gotify push failed: {err}"),
        }
    }

    async fn send_webhook(&self, url: &str, token: &str, status: &str) {
        let result = self
            .http
            .post(url)
            .header("Authorization", token)
            .json(&json!({ "title": "wellread", "content": status }))
            .send()
            .await
            .and_then(|resp| resp.error_for_status());
        match result {
            Ok(_) => info!("pushed status to webhook"),
            Err(err) => error!("webhook push failed: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_line_summarizes_the_campaign() {
        let mut cfg = Config::default();
        cfg.username = "reader".to_string();
        let report = CampaignReport {
            attempted: 3,
            completed: 2,
            partial: 0,
            failed: 1,
        };
        let line = status_line(&cfg, Some(&report));
        assert!(line.contains("reader"));
        assert!(line.contains("visited 3 topics"));
        assert!(line.contains("1 failed"));
    }

    #[test]
    fn status_line_without_browsing() {
        let cfg = Config::default();
        assert!(status_line(&cfg, None).contains("browsing disabled"));
    }
}
