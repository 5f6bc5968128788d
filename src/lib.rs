mod browser;
mod config;
pub mod engine;
mod notify;
mod session;

pub use browser::Browser;
pub use config::{Config, PixelRange, SecondsRange};
pub use notify::Notifier;
pub use session::ForumSession;

use anyhow::{Context, Result};
use log::{info, warn};

use engine::{CampaignReport, CampaignRunner, HttpTimingSink};

/// One full run: authenticate, browse a sampled campaign, notify.
///
/// Authentication bootstrap failure is the only fatal fault; everything
/// after it degrades per-topic and still produces a status push.
pub async fn run(cfg: Config) -> Result<()> {
    let session = ForumSession::login(&cfg)
        .await
        .context("authentication bootstrap failed")?;

    let notifier = Notifier::new(&cfg);

    if !cfg.browse_enabled {
        info!("browsing disabled, sending login-only notification");
        notifier.send(&notify::status_line(&cfg, None)).await;
        return Ok(());
    }

    let browser = Browser::launch(&cfg).await.context("launching browser")?;
    let report = run_campaign(&browser, &session, &cfg).await;
    browser.quit().await;

    match report {
        Ok(report) => {
            notifier
                .send(&notify::status_line(&cfg, Some(&report)))
                .await;
            Ok(())
        }
        Err(err) => {
            warn!("campaign aborted: {err:#}");
            Err(err)
        }
    }
}

async fn run_campaign(
    browser: &Browser,
    session: &ForumSession,
    cfg: &Config,
) -> Result<CampaignReport> {
    browser.set_cookies(session.cookies()).await?;
    let sink = HttpTimingSink::new(session.client().clone(), cfg.base_url.clone());
    CampaignRunner::new(browser, &sink, cfg).run().await
}
