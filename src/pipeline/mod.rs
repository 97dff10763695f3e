//! From raw events and citizen submissions to stored, forwarded reports.
//!
//! Both paths end the same way: commit to the local [`Database`], then hand the stored
//! report to a detached best-effort forward. A failed forward leaves `synced = false`.

use std::path::Path;

use anyhow::Result;
use log::{info, warn};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::{
    db::{Database, MediaType, Report},
    remote::{Forwarder, ReportUpload},
};

pub mod identity;
pub mod ingest;
pub mod manual;
pub mod severity;

pub use identity::{external_id, external_id_for};
pub use ingest::{IngestStats, SensorIngest};
pub use manual::{ManualReportPipeline, ManualSubmission, MediaInput};
pub use severity::classify_magnitude;

/// A committed report plus its in-flight forward, which resolves to whether it was accepted.
pub struct Admitted {
    pub report: Report,
    pub forward: JoinHandle<bool>,
}

/// Runs one upload attempt on its own task so the caller never waits on the network.
pub fn spawn_forward(
    db: Database,
    forwarder: Forwarder,
    report: Report,
    image_url: Option<String>,
) -> JoinHandle<bool> {
    tokio::spawn(async move {
        let Some(report_id) = report.id else {
            warn!("refusing to forward a report that was never stored");
            return false;
        };

        let upload = ReportUpload::from_report(&report, forwarder.user_id(), image_url);
        match forwarder.forward(&upload).await {
            Ok(_) => {
                if let Err(err) = db.mark_synced(report_id).await {
                    warn!("report {report_id} forwarded but not marked synced: {err:?}");
                }
                true
            }
            Err(err) => {
                warn!("report {report_id} kept locally only: {err}");
                false
            }
        }
    })
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResyncSummary {
    pub attempted: usize,
    pub forwarded: usize,
}

/// One more forward for every unsynced report, oldest first. Run on operator request only.
pub async fn resync(db: &Database, forwarder: &Forwarder) -> Result<ResyncSummary> {
    let pending = db.unsynced_reports().await?;
    let mut summary = ResyncSummary::default();

    for report in pending {
        summary.attempted += 1;
        let image_url = kept_image_url(&report).await;
        let accepted = spawn_forward(db.clone(), forwarder.clone(), report, image_url)
            .await
            .unwrap_or(false);
        if accepted {
            summary.forwarded += 1;
        }
    }

    info!(
        "resync forwarded {} of {} unsynced reports",
        summary.forwarded, summary.attempted
    );
    Ok(summary)
}

async fn kept_image_url(report: &Report) -> Option<String> {
    if report.media_type != Some(MediaType::Image) {
        return None;
    }
    let media_ref = report.media_ref.as_deref()?;
    match manual::MediaInput::from_path(Path::new(media_ref)).await {
        Ok(media) => manual::upload_image(&media).await,
        Err(err) => {
            warn!("kept media for report {:?} is gone: {err:?}", report.id);
            None
        }
    }
}
