use anyhow::{bail, Result};
use log::{error, info, warn};
use rand::seq::SliceRandom;
use tokio::time::Instant;

use super::probe::ViewportProbe;
use super::reporter::TimingSink;
use super::visit::{visit_topic, VisitOutcome};
use super::TabSource;
use crate::config::Config;

use std::time::Duration;

const LISTING_POLL: Duration = Duration::from_millis(800);

/// Aggregate result of one campaign, for logging and notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CampaignReport {
    pub attempted: usize,
    pub completed: usize,
    pub partial: usize,
    pub failed: usize,
}

impl CampaignReport {
    pub fn all_completed(&self) -> bool {
        self.failed == 0 && self.partial == 0
    }
}

/// Visits a bounded random sample of topics from the listing, sequentially,
/// with per-topic failure isolation: a visit that exhausts its retries is
/// logged and the campaign moves on.
pub struct CampaignRunner<'a, S: TimingSink> {
    tabs: &'a dyn TabSource,
    sink: &'a S,
    cfg: &'a Config,
}

impl<'a, S: TimingSink> CampaignRunner<'a, S> {
    pub fn new(tabs: &'a dyn TabSource, sink: &'a S, cfg: &'a Config) -> Self {
        Self { tabs, sink, cfg }
    }

    pub async fn run(&self) -> Result<CampaignReport> {
        let listing_url = self.cfg.listing_url();
        let links = self.collect_topic_links(&listing_url).await?;
        if links.is_empty() {
            bail!("no topic links found on {listing_url}");
        }

        let sample = sample_topics(links, self.cfg.max_topics);
        info!("sampled {} topics to visit", sample.len());

        let mut report = CampaignReport::default();
        for url in &sample {
            report.attempted += 1;
            match visit_topic(self.tabs, self.sink, self.cfg, url).await {
                Ok(VisitOutcome::Completed { pages }) => {
                    report.completed += 1;
                    info!("topic done: {url} ({pages} pages)");
                }
                Ok(VisitOutcome::Partial { pages }) => {
                    report.partial += 1;
                    warn!("topic below page target: {url} ({pages} pages)");
                }
                Err(err) => {
                    report.failed += 1;
                    error!("topic visit failed after retries: {url}: {err:#}");
                }
            }
        }

        info!(
            "campaign finished: {} attempted, {} completed, {} partial, {} failed",
            report.attempted, report.completed, report.partial, report.failed
        );
        Ok(report)
    }

    /// Opens the listing, polls for topic links to render, and returns them
    /// absolutized. The listing tab is closed on every path.
    async fn collect_topic_links(&self, listing_url: &str) -> Result<Vec<String>> {
        let tab = self.tabs.open_tab().await?;
        let result: Result<Vec<String>> = async {
            tab.navigate(listing_url).await?;
            let probe = ViewportProbe::new(tab.as_ref());
            let deadline = Instant::now() + self.cfg.listing_timeout;
            loop {
                let links = probe.listing_links().await;
                if !links.is_empty() {
                    info!("listing rendered with {} topics", links.len());
                    return Ok(links
                        .iter()
                        .map(|href| self.cfg.absolutize(href))
                        .collect());
                }
                if Instant::now() >= deadline {
                    warn!("listing never rendered any topic links");
                    return Ok(Vec::new());
                }
                tokio::time::sleep(LISTING_POLL).await;
            }
        }
        .await;
        tab.close().await;
        result
    }
}

fn sample_topics(mut links: Vec<String>, max_topics: usize) -> Vec<String> {
    links.shuffle(&mut rand::thread_rng());
    links.truncate(max_topics.min(links.len()));
    links
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_is_bounded_by_available_count() {
        let links: Vec<String> = (0..3).map(|i| format!("/t/demo/{i}")).collect();
        let sample = sample_topics(links, 10);
        assert_eq!(sample.len(), 3);
    }

    #[test]
    fn sample_is_bounded_by_max_topics() {
        let links: Vec<String> = (0..50).map(|i| format!("/t/demo/{i}")).collect();
        let sample = sample_topics(links, 5);
        assert_eq!(sample.len(), 5);
    }
}
