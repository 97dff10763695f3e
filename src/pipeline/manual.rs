use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use image::{codecs::jpeg::JpegEncoder, DynamicImage};
use uuid::Uuid;

use crate::{
    db::{DamageType, Database, MediaType, Report, ReportSource, Severity},
    log_info, log_warn,
    remote::{DamageClassifier, Forwarder},
};

use super::{spawn_forward, Admitted};

const ENABLE_LOGS: bool = true;

const UPLOAD_JPEG_QUALITY: u8 = 70;
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v", "webm", "3gp", "mkv"];

/// Captured photo or clip, already in memory.
#[derive(Debug, Clone)]
pub struct MediaInput {
    pub bytes: Vec<u8>,
    pub media_type: MediaType,
    pub extension: String,
}

impl MediaInput {
    /// Reads a file and infers image vs video from its extension.
    pub async fn from_path(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read media {}", path.display()))?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_else(|| "jpg".to_string());
        let media_type = if VIDEO_EXTENSIONS.contains(&extension.as_str()) {
            MediaType::Video
        } else {
            MediaType::Image
        };

        Ok(Self {
            bytes,
            media_type,
            extension,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ManualSubmission {
    pub media: Option<MediaInput>,
    pub latitude: f64,
    pub longitude: f64,
}

struct Assessment {
    damage_type: DamageType,
    severity: Severity,
    description: String,
}

impl Assessment {
    fn fallback(description: impl Into<String>) -> Self {
        Self {
            damage_type: DamageType::Pothole,
            severity: Severity::Medium,
            description: description.into(),
        }
    }
}

/// Citizen path: classify, keep the media, commit, forward.
pub struct ManualReportPipeline<C> {
    db: Database,
    classifier: Arc<C>,
    forwarder: Forwarder,
    media_dir: PathBuf,
}

impl<C: DamageClassifier> ManualReportPipeline<C> {
    pub fn new(db: Database, classifier: C, forwarder: Forwarder, media_dir: PathBuf) -> Self {
        Self {
            db,
            classifier: Arc::new(classifier),
            forwarder,
            media_dir,
        }
    }

    /// Stores the report and starts its upload.
    ///
    /// Classifier trouble never blocks a submission; only a failed local commit is an error.
    pub async fn submit(&self, submission: ManualSubmission) -> Result<Admitted> {
        let assessment = self.assess(submission.media.as_ref()).await;

        let (media_ref, image_url) = match &submission.media {
            Some(media) => (self.keep_media(media).await, upload_image(media).await),
            None => (None, None),
        };

        let report = Report {
            id: None,
            source: ReportSource::Manual,
            severity: assessment.severity,
            damage_type: assessment.damage_type,
            latitude: submission.latitude,
            longitude: submission.longitude,
            location_resolved: submission.latitude != 0.0 || submission.longitude != 0.0,
            captured_at: Utc::now(),
            media_ref,
            media_type: submission.media.as_ref().map(|media| media.media_type),
            description: Some(assessment.description),
            external_id: None,
            synced: false,
        };

        let stored = self
            .db
            .insert_report(&report)
            .await
            .context("failed to store manual report")?;
        log_info!(
            "Stored manual {} report {:?} ({})",
            stored.severity.as_str(),
            stored.id,
            stored.damage_type.as_str()
        );

        let forward = spawn_forward(
            self.db.clone(),
            self.forwarder.clone(),
            stored.clone(),
            image_url,
        );
        Ok(Admitted {
            report: stored,
            forward,
        })
    }

    async fn assess(&self, media: Option<&MediaInput>) -> Assessment {
        let Some(media) = media else {
            return Assessment::fallback("Manual Report");
        };
        if media.media_type == MediaType::Video {
            return Assessment::fallback("Video Report");
        }

        match self.classifier.classify(&media.bytes).await {
            Ok(classification) => Assessment {
                damage_type: classification.damage_type,
                severity: classification.severity,
                description: classification.annotated_description(),
            },
            Err(err) => {
                log_warn!("Damage classification failed, using defaults: {}", err);
                Assessment::fallback(format!("analysis failed: {err}"))
            }
        }
    }

    /// Copies the media under a fresh name. A report without its media is still kept.
    async fn keep_media(&self, media: &MediaInput) -> Option<String> {
        let file_name = format!("{}.{}", Uuid::new_v4(), media.extension);
        let target = self.media_dir.join(&file_name);

        let written = async {
            tokio::fs::create_dir_all(&self.media_dir).await?;
            tokio::fs::write(&target, &media.bytes).await
        }
        .await;

        match written {
            Ok(()) => Some(target.to_string_lossy().into_owned()),
            Err(err) => {
                log_warn!("Failed to keep media at {}: {}", target.display(), err);
                None
            }
        }
    }
}

/// Data URL sent with the upload. Only images are attached.
pub(crate) async fn upload_image(media: &MediaInput) -> Option<String> {
    if media.media_type != MediaType::Image {
        return None;
    }

    let bytes = Arc::new(media.bytes.clone());
    let encoded = tokio::task::spawn_blocking({
        let bytes = Arc::clone(&bytes);
        move || reencode_jpeg(&bytes)
    })
    .await
    .map_err(|err| anyhow!("jpeg worker join failed: {err}"))
    .and_then(|res| res);

    match encoded {
        Ok(jpeg) => Some(data_url(&jpeg)),
        Err(err) => {
            log_warn!("Could not re-encode upload image, sending original: {}", err);
            Some(data_url(&bytes))
        }
    }
}

fn reencode_jpeg(bytes: &[u8]) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory(bytes)?;
    let rgb = DynamicImage::ImageRgb8(decoded.to_rgb8());

    let mut out = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, UPLOAD_JPEG_QUALITY))?;
    Ok(out)
}

fn data_url(jpeg: &[u8]) -> String {
    format!("data:image/jpeg;base64,{}", STANDARD.encode(jpeg))
}
