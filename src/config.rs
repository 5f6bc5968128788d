use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Result};
use rand::Rng;

/// Inclusive range of seconds, sampled uniformly per use.
///
/// Pacing knobs (dwell windows, settle waits, retry backoff) are ranges rather
/// than constants so tests can pin `lo == hi` and get deterministic timing.
#[derive(Debug, Clone, Copy)]
pub struct SecondsRange {
    pub lo: f64,
    pub hi: f64,
}

impl SecondsRange {
    pub const fn new(lo: f64, hi: f64) -> Self {
        Self { lo, hi }
    }

    pub fn sample(&self) -> Duration {
        if self.hi <= self.lo {
            return Duration::from_secs_f64(self.lo);
        }
        Duration::from_secs_f64(rand::thread_rng().gen_range(self.lo..=self.hi))
    }
}

/// Inclusive pixel range for scroll distances.
#[derive(Debug, Clone, Copy)]
pub struct PixelRange {
    pub lo: i64,
    pub hi: i64,
}

impl PixelRange {
    pub const fn new(lo: i64, hi: i64) -> Self {
        Self { lo, hi }
    }

    pub fn sample(&self) -> i64 {
        if self.hi <= self.lo {
            return self.lo;
        }
        rand::thread_rng().gen_range(self.lo..=self.hi)
    }
}

/// Runtime configuration, sourced from the environment with the documented
/// defaults. Credentials are the only required values.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub timezone: String,

    /// When false the run authenticates and notifies but visits nothing.
    pub browse_enabled: bool,
    /// Upper bound on topics sampled from the listing per run.
    pub max_topics: usize,
    /// Per-topic page-unit target is drawn from `min_pages..=max_pages`.
    pub min_pages: u32,
    pub max_pages: u32,
    /// Max-post-number growth that counts as one page unit.
    pub grow_threshold: u32,
    /// Probability of clicking the reaction button once per visit.
    pub like_prob: f64,

    pub scroll: PixelRange,
    /// Loop budget per visit is `target_pages * loop_factor + 16`.
    pub loop_factor: f64,
    /// One attention window per cycle.
    pub dwell: SecondsRange,
    /// Interval between visibility samples inside a dwell window.
    pub sample_interval: SecondsRange,
    /// Ledger entries below this are dropped as noise before reporting.
    pub attention_floor_ms: u64,
    /// Cap on visible posts credited per sample tick.
    pub visible_limit: usize,
    /// Wait after a scroll before probing for growth.
    pub settle: SecondsRange,
    /// Extra wait on cycles that produced no page unit.
    pub idle_wait: SecondsRange,
    /// Consecutive no-progress cycles before the recovery jump.
    pub stall_limit: u32,

    pub render_timeout: Duration,
    pub listing_timeout: Duration,
    pub visit_attempts: u32,
    pub retry_backoff: SecondsRange,

    pub browser_binary: String,
    pub cdp_port: u16,

    pub gotify_url: Option<String>,
    pub gotify_token: Option<String>,
    pub webhook_url: Option<String>,
    pub webhook_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "https://linux.do".to_string(),
            username: String::new(),
            password: String::new(),
            timezone: "Asia/Shanghai".to_string(),
            browse_enabled: true,
            max_topics: 50,
            min_pages: 5,
            max_pages: 10,
            grow_threshold: 10,
            like_prob: 0.3,
            scroll: PixelRange::new(900, 1500),
            loop_factor: 8.0,
            dwell: SecondsRange::new(5.6, 7.2),
            sample_interval: SecondsRange::new(0.35, 0.55),
            attention_floor_ms: 200,
            visible_limit: 8,
            settle: SecondsRange::new(1.2, 2.2),
            idle_wait: SecondsRange::new(1.8, 4.5),
            stall_limit: 3,
            render_timeout: Duration::from_secs(70),
            listing_timeout: Duration::from_secs(35),
            visit_attempts: 3,
            retry_backoff: SecondsRange::new(5.0, 10.0),
            browser_binary: "chromium".to_string(),
            cdp_port: 9222,
            gotify_url: None,
            gotify_token: None,
            webhook_url: None,
            webhook_token: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mut cfg = Config::default();

        let username = env_string("WELLREAD_USERNAME").or_else(|| env_string("USERNAME"));
        let password = env_string("WELLREAD_PASSWORD").or_else(|| env_string("PASSWORD"));
        match (username, password) {
            (Some(u), Some(p)) => {
                cfg.username = u;
                cfg.password = p;
            }
            _ => bail!("WELLREAD_USERNAME/WELLREAD_PASSWORD (or USERNAME/PASSWORD) must be set"),
        }

        if let Some(base) = env_string("BASE_URL") {
            cfg.base_url = base.trim_end_matches('/').to_string();
        }
        cfg.browse_enabled = env_string("BROWSE_ENABLED")
            .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "false" | "0" | "off"))
            .unwrap_or(true);

        cfg.max_topics = env_parse("MAX_TOPICS", cfg.max_topics);
        cfg.min_pages = env_parse("MIN_COMMENT_PAGES", cfg.min_pages);
        cfg.max_pages = env_parse("MAX_COMMENT_PAGES", cfg.max_pages);
        if cfg.max_pages < cfg.min_pages {
            cfg.max_pages = cfg.min_pages;
        }
        cfg.grow_threshold = env_parse("PAGE_GROW", cfg.grow_threshold).max(1);
        cfg.like_prob = env_parse("LIKE_PROB", cfg.like_prob).clamp(0.0, 1.0);
        cfg.scroll = PixelRange::new(
            env_parse("SCROLL_MIN", cfg.scroll.lo),
            env_parse("SCROLL_MAX", cfg.scroll.hi),
        );
        cfg.loop_factor = env_parse("MAX_LOOP_FACTOR", cfg.loop_factor);
        cfg.dwell = SecondsRange::new(
            env_parse("DWELL_MIN", cfg.dwell.lo),
            env_parse("DWELL_MAX", cfg.dwell.hi),
        );
        cfg.visit_attempts = env_parse("VISIT_ATTEMPTS", cfg.visit_attempts).max(1);

        cfg.browser_binary = env_string("BROWSER_BINARY").unwrap_or(cfg.browser_binary);
        cfg.cdp_port = env_parse("CDP_PORT", cfg.cdp_port);

        cfg.gotify_url = env_string("GOTIFY_URL");
        cfg.gotify_token = env_string("GOTIFY_TOKEN");
        cfg.webhook_url = env_string("WXPUSH_URL");
        cfg.webhook_token = env_string("WXPUSH_TOKEN");

        Ok(cfg)
    }

    pub fn listing_url(&self) -> String {
        format!("{}/latest", self.base_url)
    }

    /// Resolves a listing href (absolute or site-relative) against the base.
    pub fn absolutize(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            href.to_string()
        } else if let Some(stripped) = href.strip_prefix('/') {
            format!("{}/{}", self.base_url, stripped)
        } else {
            format!("{}/{}", self.base_url, href)
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    env_string(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pinned_range_is_deterministic() {
        let range = SecondsRange::new(1.5, 1.5);
        assert_eq!(range.sample(), Duration::from_secs_f64(1.5));
        let px = PixelRange::new(400, 400);
        assert_eq!(px.sample(), 400);
    }

    #[test]
    fn absolutize_handles_relative_and_absolute() {
        let cfg = Config::default();
        assert_eq!(cfg.absolutize("/t/demo/42"), "https://linux.do/t/demo/42");
        assert_eq!(cfg.absolutize("https://other.example/x"), "https://other.example/x");
    }
}
