//! Daily word-cloud report.
//!
//! One cycle collects the trailing window of text, renders a word cloud per
//! corpus and mails each one. A corpus that fails to render or send is
//! logged and skipped; the rest of the cycle carries on.

pub mod mail;
pub mod render;

pub use mail::{ReportDispatcher, SmtpDispatcher};
pub use render::{Artifact, WordCloud};

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::aggregator::collect_window;
use crate::config::{DailyReportConfig, SmtpSettings};
use crate::storage::MessageStore;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("no recipient email configured")]
    MissingRecipient,

    #[error("failed to read font {path:?}: {source}")]
    Font {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("not a usable font file: {0:?}")]
    InvalidFont(PathBuf),

    #[error("failed to encode image: {0}")]
    Encode(#[from] image::ImageError),

    #[error("invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("invalid content type: {0}")]
    ContentType(#[from] lettre::message::header::ContentTypeErr),

    #[error("failed to build email: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("report task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Outcome of one report cycle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReportSummary {
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Run one report cycle and mail the results over SMTP
pub async fn run_report(
    store: &MessageStore,
    settings: &DailyReportConfig,
    smtp: &SmtpSettings,
    now: DateTime<Utc>,
) -> Result<ReportSummary, ReportError> {
    let recipient = settings
        .recipient_email
        .as_deref()
        .filter(|r| !r.trim().is_empty())
        .ok_or(ReportError::MissingRecipient)?;
    let dispatcher = SmtpDispatcher::new(smtp, recipient)?;

    run_report_with(store, settings, &dispatcher, now).await
}

/// Run one report cycle through any dispatcher
pub async fn run_report_with(
    store: &MessageStore,
    settings: &DailyReportConfig,
    dispatcher: &dyn ReportDispatcher,
    now: DateTime<Utc>,
) -> Result<ReportSummary, ReportError> {
    info!("Generating daily word cloud report...");

    let font_path = PathBuf::from(&settings.font_path);
    let cloud = tokio::task::spawn_blocking(move || {
        WordCloud::new(&font_path, render::DEFAULT_WIDTH, render::DEFAULT_HEIGHT)
    })
    .await??;
    let cloud = Arc::new(cloud);

    let window =
        TimeDelta::try_hours(i64::from(settings.window_hours)).unwrap_or(TimeDelta::MAX);
    let corpora = {
        let store = store.clone();
        let targets = settings.target_chat_ids.clone();
        tokio::task::spawn_blocking(move || collect_window(&store, &targets, window, now)).await?
    };

    let date = now.with_timezone(&report_tz(&settings.timezone)).date_naive();
    let mut summary = ReportSummary::default();

    for corpus in corpora {
        info!(
            "Rendering word cloud for {} ({} to {})",
            corpus.label, corpus.start, corpus.end
        );
        let label = corpus.label;
        let text = corpus.text;

        let cloud = Arc::clone(&cloud);
        let artifact = match tokio::task::spawn_blocking(move || cloud.render(&text)).await {
            Ok(Ok(Some(artifact))) => artifact,
            Ok(Ok(None)) => {
                info!("Not enough text to draw a word cloud for {}", label);
                summary.skipped += 1;
                continue;
            }
            Ok(Err(e)) => {
                error!("Failed to render word cloud for {}: {}", label, e);
                summary.failed += 1;
                continue;
            }
            Err(e) => {
                error!("Render task for {} failed: {}", label, e);
                summary.failed += 1;
                continue;
            }
        };

        info!("Drew {} words for {}", artifact.words, label);
        match dispatcher.dispatch(&label, date, &artifact).await {
            Ok(()) => summary.sent += 1,
            Err(e) => {
                error!("Failed to send report for {}: {}", label, e);
                summary.failed += 1;
            }
        }
    }

    info!(
        "Daily report finished: {} sent, {} skipped, {} failed",
        summary.sent, summary.skipped, summary.failed
    );
    Ok(summary)
}

fn report_tz(name: &str) -> Tz {
    name.parse().unwrap_or_else(|_| {
        warn!("Unknown report timezone {:?}, using UTC", name);
        Tz::UTC
    })
}
