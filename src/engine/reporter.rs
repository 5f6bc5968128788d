use async_trait::async_trait;
use log::{info, warn};
use reqwest::StatusCode;
use thiserror::Error;

use super::attention::AttentionLedger;
use super::probe::ViewportProbe;
use super::PageDriver;

/// Failure classes for a timing submission. Only `Unauthorized` is eligible
/// for the single refresh-and-retry cycle.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("authorization rejected")]
    Unauthorized,
    #[error("missing anti-forgery token")]
    MissingToken,
    #[error("submission failed: {0}")]
    Http(String),
}

/// One batched read-timing submission.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TimingBatch {
    pub topic_id: u64,
    /// Maximum per-post dwell in the batch, in milliseconds.
    pub topic_time_ms: u64,
    /// (post number, accumulated milliseconds), ascending by post.
    pub timings: Vec<(u32, u64)>,
}

impl TimingBatch {
    fn from_ledger(topic_id: u64, ledger: &AttentionLedger) -> Self {
        Self {
            topic_id,
            topic_time_ms: ledger.topic_time_ms(),
            timings: ledger.entries().collect(),
        }
    }
}

/// Transport for timing batches. Production posts to the origin's
/// read-tracking endpoint; tests substitute a recording mock.
#[async_trait]
pub trait TimingSink: Send + Sync {
    async fn post_timings(&self, batch: &TimingBatch, csrf: &str) -> Result<(), SinkError>;
}

/// Submits dwell ledgers to the origin. The anti-forgery token can expire
/// independently of the long-lived session, so an authorization rejection
/// triggers exactly one token-refresh-from-page plus resubmit before the
/// batch is given up. Resubmitting a ledger is safe: the origin treats
/// timing reports as additive evidence.
pub struct TimingReporter<'a, S: TimingSink> {
    sink: &'a S,
    page: &'a dyn PageDriver,
    csrf: Option<String>,
}

impl<'a, S: TimingSink> TimingReporter<'a, S> {
    pub fn new(sink: &'a S, page: &'a dyn PageDriver) -> Self {
        Self {
            sink,
            page,
            csrf: None,
        }
    }

    /// Reports one window's ledger. An empty ledger is a no-op success.
    pub async fn submit(&mut self, topic_id: u64, ledger: &AttentionLedger) -> Result<(), SinkError> {
        if ledger.is_empty() {
            return Ok(());
        }
        let batch = TimingBatch::from_ledger(topic_id, ledger);

        let token = match self.current_token().await {
            Some(token) => token,
            None => return Err(SinkError::MissingToken),
        };

        match self.sink.post_timings(&batch, &token).await {
            Ok(()) => {
                info!(
                    "reported timings: topic={} posts={} topic_time={}ms",
                    batch.topic_id,
                    batch.timings.len(),
                    batch.topic_time_ms
                );
                Ok(())
            }
            Err(SinkError::Unauthorized) => {
                warn!("timing submission rejected, refreshing token and retrying once");
                self.csrf = None;
                let token = self
                    .current_token()
                    .await
                    .ok_or(SinkError::MissingToken)?;
                self.sink.post_timings(&batch, &token).await
            }
            Err(other) => Err(other),
        }
    }

    async fn current_token(&mut self) -> Option<String> {
        if self.csrf.is_none() {
            self.csrf = ViewportProbe::new(self.page).csrf_token().await;
        }
        self.csrf.clone()
    }
}

/// Posts timing batches to the origin's `/topics/timings` endpoint, shaped
/// the way the Discourse frontend does: form-encoded `topic_id`,
/// `topic_time`, and one `timings[<post>]` field per post.
pub struct HttpTimingSink {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTimingSink {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl TimingSink for HttpTimingSink {
    async fn post_timings(&self, batch: &TimingBatch, csrf: &str) -> Result<(), SinkError> {
        let mut form: Vec<(String, String)> = Vec::with_capacity(batch.timings.len() + 2);
        form.push(("topic_id".to_string(), batch.topic_id.to_string()));
        form.push(("topic_time".to_string(), batch.topic_time_ms.to_string()));
        for (post, ms) in &batch.timings {
            form.push((format!("timings[{post}]"), ms.to_string()));
        }

        let resp = self
            .http
            .post(format!("{}/topics/timings", self.base_url))
            .header("X-CSRF-Token", csrf)
            .header("X-Requested-With", "XMLHttpRequest")
            .form(&form)
            .send()
            .await
            .map_err(|err| SinkError::Http(err.to_string()))?;

        match resp.status() {
            status if status.is_success() => Ok(()),
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => Err(SinkError::Unauthorized),
            status => Err(SinkError::Http(format!("status {status}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DriverError;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    struct TokenPage {
        tokens: Mutex<Vec<&'static str>>,
    }

    impl TokenPage {
        fn serving(tokens: Vec<&'static str>) -> Self {
            Self {
                tokens: Mutex::new(tokens),
            }
        }
    }

    #[async_trait]
    impl PageDriver for TokenPage {
        async fn navigate(&self, _url: &str) -> Result<(), DriverError> {
            Ok(())
        }

        async fn eval(&self, _expression: &str) -> Result<Value, DriverError> {
            let mut tokens = self.tokens.lock().unwrap();
            if tokens.is_empty() {
                Ok(json!(""))
            } else {
                Ok(json!(tokens.remove(0)))
            }
        }

        async fn scroll_by(&self, _pixels: i64) -> Result<(), DriverError> {
            Ok(())
        }

        async fn close(&self) {}
    }

    #[derive(Default)]
    struct MockSink {
        calls: Mutex<Vec<(TimingBatch, String)>>,
        failures: Mutex<Vec<SinkError>>,
    }

    impl MockSink {
        fn failing_with(failures: Vec<SinkError>) -> Self {
            Self {
                calls: Mutex::default(),
                failures: Mutex::new(failures),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TimingSink for MockSink {
        async fn post_timings(&self, batch: &TimingBatch, csrf: &str) -> Result<(), SinkError> {
            self.calls
                .lock()
                .unwrap()
                .push((batch.clone(), csrf.to_string()));
            let mut failures = self.failures.lock().unwrap();
            if failures.is_empty() {
                Ok(())
            } else {
                Err(failures.remove(0))
            }
        }
    }

    fn ledger_with(entries: &[(u32, u64)]) -> AttentionLedger {
        let mut ledger = AttentionLedger::default();
        for (post, ms) in entries {
            ledger.credit(*post, *ms);
        }
        ledger
    }

    #[tokio::test]
    async fn empty_ledger_is_a_silent_success() {
        let page = TokenPage::serving(vec!["tok-a"]);
        let sink = MockSink::default();
        let mut reporter = TimingReporter::new(&sink, &page);

        reporter
            .submit(42, &AttentionLedger::default())
            .await
            .unwrap();

        assert_eq!(sink.call_count(), 0);
    }

    #[tokio::test]
    async fn batch_carries_topic_time_and_per_post_fields() {
        let page = TokenPage::serving(vec!["tok-a"]);
        let sink = MockSink::default();
        let mut reporter = TimingReporter::new(&sink, &page);

        let ledger = ledger_with(&[(3, 1200), (4, 6400)]);
        reporter.submit(42, &ledger).await.unwrap();

        let calls = sink.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (batch, token) = &calls[0];
        assert_eq!(batch.topic_id, 42);
        assert_eq!(batch.topic_time_ms, 6400);
        assert_eq!(batch.timings, vec![(3, 1200), (4, 6400)]);
        assert_eq!(token, "tok-a");
    }

    #[tokio::test]
    async fn unauthorized_triggers_exactly_one_refresh_and_retry() {
        let page = TokenPage::serving(vec!["stale", "fresh"]);
        let sink = MockSink::failing_with(vec![SinkError::Unauthorized]);
        let mut reporter = TimingReporter::new(&sink, &page);

        let ledger = ledger_with(&[(1, 900)]);
        reporter.submit(7, &ledger).await.unwrap();

        let calls = sink.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1, "stale");
        assert_eq!(calls[1].1, "fresh");
    }

    #[tokio::test]
    async fn second_rejection_is_surfaced_without_a_third_attempt() {
        let page = TokenPage::serving(vec!["stale", "fresh"]);
        let sink =
            MockSink::failing_with(vec![SinkError::Unauthorized, SinkError::Unauthorized]);
        let mut reporter = TimingReporter::new(&sink, &page);

        let ledger = ledger_with(&[(1, 900)]);
        let err = reporter.submit(7, &ledger).await.unwrap_err();

        assert!(matches!(err, SinkError::Unauthorized));
        assert_eq!(sink.call_count(), 2);
    }

    #[tokio::test]
    async fn non_auth_failures_are_not_retried() {
        let page = TokenPage::serving(vec!["tok-a"]);
        let sink = MockSink::failing_with(vec![SinkError::Http("status 500".into())]);
        let mut reporter = TimingReporter::new(&sink, &page);

        let ledger = ledger_with(&[(1, 900)]);
        let err = reporter.submit(7, &ledger).await.unwrap_err();

        assert!(matches!(err, SinkError::Http(_)));
        assert_eq!(sink.call_count(), 1);
    }

    #[tokio::test]
    async fn token_is_cached_across_submissions() {
        let page = TokenPage::serving(vec!["tok-a"]);
        let sink = MockSink::default();
        let mut reporter = TimingReporter::new(&sink, &page);

        reporter.submit(7, &ledger_with(&[(1, 500)])).await.unwrap();
        reporter.submit(7, &ledger_with(&[(2, 700)])).await.unwrap();

        let calls = sink.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        // Second submission reuses the cached token; the page only ever
        // served one.
        assert_eq!(calls[1].1, "tok-a");
    }
}
