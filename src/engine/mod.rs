//! Engagement simulation engine: probes the live document, paces attention
//! across unread posts, and reports dwell timings back to the origin.

mod attention;
mod campaign;
mod pagination;
mod probe;
mod reporter;
mod visit;

pub use attention::{AttentionAccumulator, AttentionLedger};
pub use campaign::{CampaignReport, CampaignRunner};
pub use pagination::PaginationTracker;
pub use probe::{ContentSnapshot, ViewportProbe};
pub use reporter::{HttpTimingSink, SinkError, TimingBatch, TimingReporter, TimingSink};
pub use visit::{visit_topic, VisitOutcome};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Faults surfaced by the rendered-document driver.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("driver call timed out")]
    Timeout,
    #[error("browser connection closed")]
    Closed,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("script evaluation failed: {0}")]
    Eval(String),
}

/// Narrow seam over one rendered page. The production implementation speaks
/// CDP; tests substitute a scripted document.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;

    /// Evaluates a script expression and returns its JSON value.
    async fn eval(&self, expression: &str) -> Result<Value, DriverError>;

    async fn scroll_by(&self, pixels: i64) -> Result<(), DriverError>;

    /// Releases the page. Must be safe to call on every exit path.
    async fn close(&self);
}

/// Opens fresh pages for visits. One tab per visit, closed on completion.
#[async_trait]
pub trait TabSource: Send + Sync {
    async fn open_tab(&self) -> Result<Box<dyn PageDriver>, DriverError>;
}
