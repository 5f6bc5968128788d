use std::collections::BTreeMap;
use std::time::Duration;

use log::debug;
use tokio::time::Instant;

use super::probe::ViewportProbe;
use super::PageDriver;
use crate::config::SecondsRange;

/// Per-post accumulated attention for one dwell window. Created empty at the
/// window start, frozen at the end, then handed to the reporter and dropped.
#[derive(Debug, Default, Clone)]
pub struct AttentionLedger {
    entries: BTreeMap<u32, u64>,
}

impl AttentionLedger {
    pub fn credit(&mut self, post: u32, ms: u64) {
        *self.entries.entry(post).or_insert(0) += ms;
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Longest single-post dwell in the window, 0 for an empty ledger.
    pub fn topic_time_ms(&self) -> u64 {
        self.entries.values().copied().max().unwrap_or(0)
    }

    /// Drops entries that accumulated less than `min_ms` (sampling noise from
    /// posts that only grazed the viewport).
    pub fn retain_floor(&mut self, min_ms: u64) {
        self.entries.retain(|_, ms| *ms >= min_ms);
    }

    pub fn entries(&self) -> impl Iterator<Item = (u32, u64)> + '_ {
        self.entries.iter().map(|(post, ms)| (*post, *ms))
    }

    pub fn get(&self, post: u32) -> Option<u64> {
        self.entries.get(&post).copied()
    }
}

/// Samples viewport visibility over a dwell window and accumulates elapsed
/// time per visible post. Approximates genuine reading dwell without per-post
/// event hooks: posts that stay in view across many ticks accrue
/// proportionally more.
#[derive(Debug, Clone, Copy)]
pub struct AttentionAccumulator {
    sample_interval: SecondsRange,
    floor_ms: u64,
    visible_limit: usize,
}

impl AttentionAccumulator {
    pub fn new(sample_interval: SecondsRange, floor_ms: u64, visible_limit: usize) -> Self {
        Self {
            sample_interval,
            floor_ms,
            visible_limit,
        }
    }

    /// Runs the sampling loop for exactly `window` wall-clock time. A failed
    /// probe tick credits nothing and is skipped; it never aborts the loop.
    pub async fn accumulate(&self, page: &dyn PageDriver, window: Duration) -> AttentionLedger {
        let probe = ViewportProbe::new(page);
        let started = Instant::now();
        let mut last_tick = started;
        let mut ledger = AttentionLedger::default();

        loop {
            let elapsed = started.elapsed();
            if elapsed >= window {
                break;
            }
            // Clamp the final nap so the window ends on time.
            let nap = self.sample_interval.sample().min(window - elapsed);
            tokio::time::sleep(nap).await;

            let now = Instant::now();
            let tick_ms = now.duration_since(last_tick).as_millis() as u64;
            last_tick = now;

            let visible = probe.visible_posts(self.visible_limit).await;
            for post in visible {
                ledger.credit(post, tick_ms);
            }
        }

        let raw_len = ledger.len();
        ledger.retain_floor(self.floor_ms);
        if ledger.len() < raw_len {
            debug!(
                "dropped {} sub-floor ledger entries (< {}ms)",
                raw_len - ledger.len(),
                self.floor_ms
            );
        }
        ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DriverError;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Page whose viewport permanently shows the given posts.
    struct StaticPage {
        visible: Vec<u32>,
        fail_probes: AtomicBool,
    }

    impl StaticPage {
        fn showing(visible: Vec<u32>) -> Self {
            Self {
                visible,
                fail_probes: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl PageDriver for StaticPage {
        async fn navigate(&self, _url: &str) -> Result<(), DriverError> {
            Ok(())
        }

        async fn eval(&self, _expression: &str) -> Result<Value, DriverError> {
            if self.fail_probes.load(Ordering::SeqCst) {
                return Err(DriverError::Closed);
            }
            Ok(json!(self.visible))
        }

        async fn scroll_by(&self, _pixels: i64) -> Result<(), DriverError> {
            Ok(())
        }

        async fn close(&self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn stable_visibility_accumulates_the_full_window() {
        let page = StaticPage::showing(vec![7]);
        let acc = AttentionAccumulator::new(SecondsRange::new(0.4, 0.4), 200, 8);
        let window = Duration::from_secs(6);

        let ledger = acc.accumulate(&page, window).await;

        assert_eq!(ledger.len(), 1);
        let total = ledger.get(7).expect("post 7 accumulated");
        // The last tick is clamped to the remaining budget, so under a paused
        // clock the single entry sums to the window exactly.
        assert_eq!(total, window.as_millis() as u64);
        assert_eq!(ledger.topic_time_ms(), total);
    }

    #[tokio::test(start_paused = true)]
    async fn split_visibility_accumulates_per_post() {
        let page = StaticPage::showing(vec![3, 4]);
        let acc = AttentionAccumulator::new(SecondsRange::new(0.5, 0.5), 200, 8);

        let ledger = acc.accumulate(&page, Duration::from_secs(2)).await;

        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.get(3), ledger.get(4));
        assert_eq!(ledger.get(3), Some(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_ticks_are_skipped_not_fatal() {
        let page = StaticPage::showing(vec![1]);
        page.fail_probes.store(true, Ordering::SeqCst);
        let acc = AttentionAccumulator::new(SecondsRange::new(0.4, 0.4), 200, 8);

        let ledger = acc.accumulate(&page, Duration::from_secs(3)).await;

        assert!(ledger.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn visible_limit_caps_credited_posts() {
        let page = StaticPage::showing(vec![1, 2, 3, 4, 5]);
        let acc = AttentionAccumulator::new(SecondsRange::new(0.4, 0.4), 0, 2);

        let ledger = acc.accumulate(&page, Duration::from_secs(1)).await;

        assert_eq!(ledger.len(), 2);
        assert!(ledger.get(1).is_some() && ledger.get(2).is_some());
    }

    #[test]
    fn retain_floor_drops_noise() {
        let mut ledger = AttentionLedger::default();
        ledger.credit(1, 150);
        ledger.credit(2, 450);
        ledger.retain_floor(200);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get(2), Some(450));
        assert_eq!(ledger.topic_time_ms(), 450);
    }
}
