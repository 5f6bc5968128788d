use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use rand::Rng;
use tokio::time::Instant;

use super::attention::AttentionAccumulator;
use super::pagination::PaginationTracker;
use super::probe::ViewportProbe;
use super::reporter::{TimingReporter, TimingSink};
use super::{PageDriver, TabSource};
use crate::config::{Config, SecondsRange};

const READY_POLL: Duration = Duration::from_millis(600);
const READY_LOG_EVERY: Duration = Duration::from_secs(5);

/// Verdict of one topic visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitOutcome {
    /// Page-unit target met, or the topic was too short to ever meet it.
    Completed { pages: u32 },
    /// Growth stalled out before the minimum page target.
    Partial { pages: u32 },
}

impl VisitOutcome {
    pub fn pages(&self) -> u32 {
        match self {
            VisitOutcome::Completed { pages } | VisitOutcome::Partial { pages } => *pages,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, VisitOutcome::Completed { .. })
    }
}

/// Drives one topic visit end to end, with a bounded retry around the whole
/// attempt. Each attempt runs in a fresh tab that is closed on every exit
/// path; a fault anywhere in an attempt aborts it and the next attempt
/// starts over from navigation.
pub async fn visit_topic<S: TimingSink>(
    tabs: &dyn TabSource,
    sink: &S,
    cfg: &Config,
    url: &str,
) -> Result<VisitOutcome> {
    let mut last_err = None;

    for attempt in 1..=cfg.visit_attempts {
        let result = match tabs.open_tab().await {
            Ok(tab) => {
                let result = visit_once(tab.as_ref(), sink, cfg, url).await;
                tab.close().await;
                result
            }
            Err(err) => Err(anyhow!(err).context("opening tab")),
        };

        match result {
            Ok(outcome) => return Ok(outcome),
            Err(err) => {
                warn!(
                    "visit attempt {attempt}/{} failed for {url}: {err:#}",
                    cfg.visit_attempts
                );
                last_err = Some(err);
                if attempt < cfg.visit_attempts {
                    let backoff = cfg.retry_backoff.sample();
                    info!("retrying in {:.1}s", backoff.as_secs_f64());
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("visit failed")))
}

async fn visit_once<S: TimingSink>(
    page: &dyn PageDriver,
    sink: &S,
    cfg: &Config,
    url: &str,
) -> Result<VisitOutcome> {
    page.navigate(url).await?;

    let probe = ViewportProbe::new(page);
    wait_content_ready(page, cfg.render_timeout).await;
    tokio::time::sleep(cfg.settle.sample()).await;

    if roll(cfg.like_prob) {
        if probe.click_reaction().await {
            info!("clicked reaction button");
            tokio::time::sleep(SecondsRange::new(1.0, 2.0).sample()).await;
        } else {
            info!("no unreacted reaction button found");
        }
    }

    // Without a topic id there is nothing to report against; the visit still
    // browses so the origin's own tracking sees the traffic.
    let topic_id = probe.topic_id().await;
    if topic_id.is_none() {
        warn!("topic id not found on page, timing reports disabled for this visit");
    }

    let target_pages = pick_target(cfg.min_pages, cfg.max_pages);
    let mut prev_max = probe.max_post_number().await;
    let mut prev_count = probe.post_count().await;
    let mut tracker = PaginationTracker::new(cfg.grow_threshold, prev_max);
    let accumulator =
        AttentionAccumulator::new(cfg.sample_interval, cfg.attention_floor_ms, cfg.visible_limit);
    let mut reporter = TimingReporter::new(sink, page);

    info!(
        "visit start: target={target_pages} pages (grow threshold {}), max_post={prev_max}, dom_posts={prev_count}",
        cfg.grow_threshold
    );

    let budget = (target_pages as f64 * cfg.loop_factor) as u32 + 16;
    let mut pages_done = 0u32;
    let mut stall = 0u32;
    let mut recovered = false;

    for cycle in 1..=budget {
        // A failed scroll means the page itself is gone: abort the attempt
        // and let the visit-level retry start over from navigation.
        page.scroll_by(cfg.scroll.sample())
            .await
            .with_context(|| format!("scroll failed on cycle {cycle}"))?;
        tokio::time::sleep(cfg.settle.sample()).await;

        let unread = probe.unread_in_viewport().await;
        let ledger = accumulator.accumulate(page, cfg.dwell.sample()).await;
        if let Some(id) = topic_id {
            if let Err(err) = reporter.submit(id, &ledger).await {
                // A dropped batch only loses this window's evidence.
                warn!("[cycle {cycle}] timing batch dropped: {err}");
            }
        }

        let cur_max = probe.max_post_number().await;
        let cur_count = probe.post_count().await;
        let advanced = tracker.record_growth(cur_max);

        if advanced > 0 {
            pages_done += advanced;
            info!(
                "[cycle {cycle}] page {pages_done}/{target_pages}: max_post {prev_max} -> {cur_max} (dom_posts={cur_count}, unread_in_view={unread})"
            );
        }

        if cur_max > prev_max || cur_count > prev_count {
            stall = 0;
        } else {
            stall += 1;
        }
        prev_max = cur_max;
        prev_count = cur_count;

        if pages_done >= target_pages {
            info!("page target reached, visit complete");
            return Ok(VisitOutcome::Completed { pages: pages_done });
        }

        if probe.at_bottom().await {
            info!("reached document bottom at max_post={cur_max}");
            // A topic shorter than the minimum target implies cannot fail
            // the visit for being short.
            if cur_max <= cfg.min_pages * cfg.grow_threshold + 5 {
                info!("short topic (max_post={cur_max}), minimum page target waived");
                return Ok(VisitOutcome::Completed { pages: pages_done });
            }
            return Ok(if pages_done >= cfg.min_pages {
                VisitOutcome::Completed { pages: pages_done }
            } else {
                VisitOutcome::Partial { pages: pages_done }
            });
        }

        if stall >= cfg.stall_limit && !recovered {
            warn!(
                "[cycle {cycle}] no growth for {stall} cycles, jumping near bottom to force loading"
            );
            let jump = "window.scrollTo(0, document.body.scrollHeight - window.innerHeight * 1.5)";
            page.eval(jump)
                .await
                .with_context(|| format!("recovery jump failed on cycle {cycle}"))?;
            tokio::time::sleep(cfg.idle_wait.sample()).await;
            stall = 0;
            recovered = true;
        } else if advanced == 0 {
            tokio::time::sleep(cfg.idle_wait.sample()).await;
        }
    }

    warn!("loop budget exhausted at {pages_done}/{target_pages} pages (slow loading or stalled)");
    Ok(if pages_done >= cfg.min_pages {
        VisitOutcome::Completed { pages: pages_done }
    } else {
        VisitOutcome::Partial { pages: pages_done }
    })
}

/// Bounded poll for the post stream to render. A topic can land mid-stream,
/// so readiness is "any post body has text", not "post 1 exists". On timeout
/// the caller proceeds best-effort rather than failing the visit.
async fn wait_content_ready(page: &dyn PageDriver, timeout: Duration) -> bool {
    let probe = ViewportProbe::new(page);
    let deadline = Instant::now() + timeout;
    let mut last_log: Option<Instant> = None;

    loop {
        let snap = probe.content_snapshot().await;
        if snap.ready {
            info!(
                "post stream rendered: dom_posts={} range=post_{}..post_{}",
                snap.count, snap.min_post, snap.max_post
            );
            tokio::time::sleep(SecondsRange::new(0.8, 1.6).sample()).await;
            return true;
        }

        if Instant::now() >= deadline {
            warn!("post stream never finished rendering, proceeding best-effort");
            return false;
        }

        if last_log.map_or(true, |at| at.elapsed() >= READY_LOG_EVERY) {
            last_log = Some(Instant::now());
            info!(
                "waiting for render: dom_posts={} range=post_{}..post_{}",
                snap.count, snap.min_post, snap.max_post
            );
        }

        tokio::time::sleep(READY_POLL).await;
    }
}

fn pick_target(min_pages: u32, max_pages: u32) -> u32 {
    let hi = max_pages.max(min_pages);
    if hi == min_pages {
        return min_pages;
    }
    rand::thread_rng().gen_range(min_pages..=hi)
}

fn roll(probability: f64) -> bool {
    probability > 0.0 && rand::thread_rng().gen::<f64>() < probability
}
