use log::debug;
use serde_json::Value;

use super::PageDriver;

// DOM contract for Discourse-style topic pages. Posts are `#post_<n>` where
// `n` is the 1-based stream position; the origin-owned read marker lives at
// `.topic-meta-data .read-state` and gains the `read` class once recorded.
const POST_CONTENT_CSS: &str = "div.post__regular.regular.post__contents.contents";

/// Point-in-time view of which posts have materialized.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentSnapshot {
    /// At least one post body has rendered non-empty text.
    pub ready: bool,
    pub min_post: u32,
    pub max_post: u32,
    pub count: usize,
}

/// Read-only queries against the live document. Every query tolerates the
/// document being mid-mutation: a failed evaluation yields the zero/empty
/// value so callers never have to handle probe faults.
pub struct ViewportProbe<'a> {
    page: &'a dyn PageDriver,
}

impl<'a> ViewportProbe<'a> {
    pub fn new(page: &'a dyn PageDriver) -> Self {
        Self { page }
    }

    /// Post numbers currently intersecting the viewport, ascending, capped.
    pub async fn visible_posts(&self, limit: usize) -> Vec<u32> {
        let js = r#"
            (() => {
              const out = [];
              document.querySelectorAll('[id^="post_"]').forEach(el => {
                const m = el.id.match(/^post_(\d+)$/);
                if (!m) return;
                const r = el.getBoundingClientRect();
                if (r.bottom <= 0 || r.top >= window.innerHeight) return;
                out.push(parseInt(m[1], 10));
              });
              out.sort((a, b) => a - b);
              return out;
            })()
        "#;
        let mut posts: Vec<u32> = match self.page.eval(js).await {
            Ok(value) => as_u32_list(&value),
            Err(err) => {
                debug!("visible_posts probe failed: {err}");
                Vec::new()
            }
        };
        posts.truncate(limit);
        posts
    }

    /// Visible posts whose read marker exists and is not yet `read`.
    /// Posts without a marker cannot be classified and are excluded.
    pub async fn unread_in_viewport(&self) -> usize {
        let js = r#"
            (() => {
              let unread = 0;
              document.querySelectorAll('[id^="post_"]').forEach(el => {
                if (!/^post_\d+$/.test(el.id)) return;
                const r = el.getBoundingClientRect();
                if (r.bottom <= 0 || r.top >= window.innerHeight) return;
                const rs = el.querySelector('.topic-meta-data .read-state');
                if (!rs) return;
                if (!rs.classList.contains('read')) unread += 1;
              });
              return unread;
            })()
        "#;
        match self.page.eval(js).await {
            Ok(value) => value.as_u64().unwrap_or(0) as usize,
            Err(err) => {
                debug!("unread_in_viewport probe failed: {err}");
                0
            }
        }
    }

    /// Highest materialized post number, 0 when none are loaded.
    pub async fn max_post_number(&self) -> u32 {
        let js = r#"
            (() => {
              let maxN = 0;
              document.querySelectorAll('[id^="post_"]').forEach(el => {
                const m = el.id.match(/^post_(\d+)$/);
                if (m) maxN = Math.max(maxN, parseInt(m[1], 10));
              });
              return maxN;
            })()
        "#;
        match self.page.eval(js).await {
            Ok(value) => value.as_u64().unwrap_or(0) as u32,
            Err(err) => {
                debug!("max_post_number probe failed: {err}");
                0
            }
        }
    }

    pub async fn post_count(&self) -> usize {
        let js = r#"document.querySelectorAll('[id^="post_"]').length"#;
        match self.page.eval(js).await {
            Ok(value) => value.as_u64().unwrap_or(0) as usize,
            Err(err) => {
                debug!("post_count probe failed: {err}");
                0
            }
        }
    }

    /// Render-readiness plus the materialized post range, for wait loops and
    /// landing-position logging. A topic can be entered mid-stream, so the
    /// range does not necessarily start at post 1.
    pub async fn content_snapshot(&self) -> ContentSnapshot {
        let js = format!(
            r#"
            (() => {{
              const posts = Array.from(document.querySelectorAll('[id^="post_"]'));
              if (!posts.length) return {{ ready: false, minN: 0, maxN: 0, count: 0 }};
              let minN = 1e9, maxN = 0, ready = false;
              for (const p of posts) {{
                const m = p.id.match(/^post_(\d+)$/);
                if (m) {{
                  const n = parseInt(m[1], 10);
                  if (n < minN) minN = n;
                  if (n > maxN) maxN = n;
                }}
                const c = p.querySelector('{POST_CONTENT_CSS}');
                if (!c) continue;
                const t = (c.innerText || c.textContent || '').trim();
                if (t.length > 0) ready = true;
              }}
              if (maxN === 0) minN = 0;
              return {{ ready, minN, maxN, count: posts.length }};
            }})()
            "#
        );
        match self.page.eval(&js).await {
            Ok(value) => ContentSnapshot {
                ready: value["ready"].as_bool().unwrap_or(false),
                min_post: value["minN"].as_u64().unwrap_or(0) as u32,
                max_post: value["maxN"].as_u64().unwrap_or(0) as u32,
                count: value["count"].as_u64().unwrap_or(0) as usize,
            },
            Err(err) => {
                debug!("content_snapshot probe failed: {err}");
                ContentSnapshot::default()
            }
        }
    }

    /// Whether the viewport has reached the bottom of the document.
    pub async fn at_bottom(&self) -> bool {
        let js = "(window.scrollY + window.innerHeight) >= (document.body.scrollHeight - 5)";
        match self.page.eval(js).await {
            Ok(value) => value.as_bool().unwrap_or(false),
            Err(err) => {
                debug!("at_bottom probe failed: {err}");
                false
            }
        }
    }

    /// Anti-forgery token from the rendered page, refreshed by re-probing.
    pub async fn csrf_token(&self) -> Option<String> {
        let js = r#"(document.querySelector('meta[name="csrf-token"]') || {}).content || ''"#;
        match self.page.eval(js).await {
            Ok(value) => value
                .as_str()
                .map(str::to_string)
                .filter(|token| !token.is_empty()),
            Err(err) => {
                debug!("csrf_token probe failed: {err}");
                None
            }
        }
    }

    /// Topic id from page metadata, falling back to the `/t/<slug>/<id>` path.
    pub async fn topic_id(&self) -> Option<u64> {
        let js = r#"
            (() => {
              const meta = document.querySelector('meta[name="discourse-topic-id"]');
              if (meta && meta.content) return parseInt(meta.content, 10);
              const m = location.pathname.match(/\/t\/[^/]+\/(\d+)/);
              return m ? parseInt(m[1], 10) : 0;
            })()
        "#;
        match self.page.eval(js).await {
            Ok(value) => value.as_u64().filter(|id| *id > 0),
            Err(err) => {
                debug!("topic_id probe failed: {err}");
                None
            }
        }
    }

    /// Topic links rendered on a listing page, in document order.
    pub async fn listing_links(&self) -> Vec<String> {
        let js = r#"
            Array.from(document.querySelectorAll('a.raw-topic-link'))
              .map(a => a.getAttribute('href') || '')
              .filter(h => h.length > 0)
        "#;
        match self.page.eval(js).await {
            Ok(value) => value
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| v.as_str())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            Err(err) => {
                debug!("listing_links probe failed: {err}");
                Vec::new()
            }
        }
    }

    /// Clicks the reaction button if an unreacted one is present.
    pub async fn click_reaction(&self) -> bool {
        let js = r#"
            (() => {
              const btn = document.querySelector('.discourse-reactions-reaction-button');
              if (!btn) return false;
              btn.click();
              return true;
            })()
        "#;
        match self.page.eval(js).await {
            Ok(value) => value.as_bool().unwrap_or(false),
            Err(err) => {
                debug!("click_reaction failed: {err}");
                false
            }
        }
    }
}

fn as_u32_list(value: &Value) -> Vec<u32> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_u64())
                .map(|n| n as u32)
                .collect()
        })
        .unwrap_or_default()
}
