//! Credential-based session bootstrap against the forum's login API. This is
//! the only fault class that is fatal to a run: without a session nothing
//! downstream can work.

use anyhow::{bail, Context, Result};
use log::info;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, SET_COOKIE};
use reqwest::Response;
use serde_json::Value;
use std::time::Duration;

use crate::config::Config;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36";

/// A cookie captured during login, for hand-off to the browser.
#[derive(Debug, Clone)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
}

/// An authenticated HTTP session. The inner client keeps cookie continuity
/// for later API calls (timing reports reuse it); `cookies` holds the same
/// state in a form the browser can ingest.
pub struct ForumSession {
    http: reqwest::Client,
    cookies: Vec<SessionCookie>,
}

impl ForumSession {
    /// Runs the full bootstrap: seed cookies from the home page, fetch the
    /// login CSRF token, post credentials, and collect the session cookies.
    pub async fn login(cfg: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .timeout(Duration::from_secs(30))
            .build()
            .context("building http client")?;

        let domain = cookie_domain(&cfg.base_url);
        let mut cookies = Vec::new();

        info!("seeding session cookies from {}", cfg.base_url);
        let home = http
            .get(format!("{}/", cfg.base_url))
            .headers(html_headers(&cfg.base_url))
            .send()
            .await
            .context("fetching home page")?;
        record_cookies(&home, &domain, &mut cookies);

        info!("fetching login CSRF token");
        let resp = http
            .get(format!("{}/session/csrf", cfg.base_url))
            .headers(api_headers(&cfg.base_url))
            .send()
            .await
            .context("fetching csrf token")?;
        record_cookies(&resp, &domain, &mut cookies);

        let status = resp.status();
        let content_type = header_str(resp.headers(), CONTENT_TYPE);
        if !status.is_success() || !content_type.contains("application/json") {
            bail!("csrf endpoint returned status={status} content-type={content_type}");
        }
        let body: Value = resp.json().await.context("parsing csrf response")?;
        let csrf = body["csrf"]
            .as_str()
            .filter(|token| !token.is_empty())
            .context("csrf response missing token")?
            .to_string();

        info!("logging in as {}", cfg.username);
        let login = http
            .post(format!("{}/session", cfg.base_url))
            .headers(api_headers(&cfg.base_url))
            .header("X-CSRF-Token", &csrf)
            .form(&[
                ("login", cfg.username.as_str()),
                ("password", cfg.password.as_str()),
                ("timezone", cfg.timezone.as_str()),
            ])
            .send()
            .await
            .context("posting login form")?;
        record_cookies(&login, &domain, &mut cookies);

        let content_type = header_str(login.headers(), CONTENT_TYPE);
        if !content_type.contains("application/json") {
            bail!("login returned non-JSON response (content-type={content_type})");
        }
        let body: Value = login.json().await.context("parsing login response")?;
        if let Some(error) = body["error"].as_str() {
            bail!("login rejected: {error}");
        }

        info!("login succeeded, captured {} cookies", cookies.len());
        Ok(Self { http, cookies })
    }

    /// The authenticated client, shared by reference with the timing sink.
    pub fn client(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn cookies(&self) -> &[SessionCookie] {
        &self.cookies
    }
}

fn html_headers(base_url: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "Accept",
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
    );
    if let Ok(referer) = HeaderValue::from_str(&format!("{base_url}/")) {
        headers.insert("Referer", referer);
    }
    headers
}

fn api_headers(base_url: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "Accept",
        HeaderValue::from_static("application/json, text/javascript, */*; q=0.01"),
    );
    headers.insert(
        "X-Requested-With",
        HeaderValue::from_static("XMLHttpRequest"),
    );
    if let Ok(origin) = HeaderValue::from_str(base_url) {
        headers.insert("Origin", origin);
    }
    if let Ok(referer) = HeaderValue::from_str(&format!("{base_url}/login")) {
        headers.insert("Referer", referer);
    }
    headers
}

/// `.example.com` for `https://example.com`, so cookies cover subdomains.
fn cookie_domain(base_url: &str) -> String {
    let host = base_url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap_or("");
    format!(".{host}")
}

fn record_cookies(resp: &Response, domain: &str, cookies: &mut Vec<SessionCookie>) {
    for value in resp.headers().get_all(SET_COOKIE) {
        let Ok(raw) = value.to_str() else { continue };
        let pair = raw.split(';').next().unwrap_or("");
        let Some((name, value)) = pair.split_once('=') else {
            continue;
        };
        let name = name.trim().to_string();
        let value = value.trim().to_string();
        if name.is_empty() {
            continue;
        }
        cookies.retain(|c| c.name != name);
        cookies.push(SessionCookie {
            name,
            value,
            domain: domain.to_string(),
        });
    }
}

fn header_str(headers: &HeaderMap, key: reqwest::header::HeaderName) -> String {
    headers
        .get(key)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_domain_strips_scheme_and_path() {
        assert_eq!(cookie_domain("https://linux.do"), ".linux.do");
        assert_eq!(cookie_domain("http://forum.example.org/x"), ".forum.example.org");
    }
}
