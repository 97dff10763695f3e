use serde::{Deserialize, Serialize};

use crate::db::{DamageType, Report, ReportSource, Severity};

/// Body of `POST /reports`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReportUpload {
    pub user_id: String,
    pub location: UploadLocation,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub damage_type: DamageType,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UploadLocation {
    pub lat: f64,
    pub lng: f64,
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadReceipt {
    pub message: String,
    #[serde(default)]
    pub id: Option<serde_json::Value>,
}

const UPLOAD_SOURCE: &str = "Mobile App";

impl ReportUpload {
    /// `image_url` is the inline upload form of the media, if any.
    pub fn from_report(report: &Report, user_id: &str, image_url: Option<String>) -> Self {
        let address = match report.source {
            ReportSource::Automatic => "Sensor Detected",
            ReportSource::Manual => "Unknown Address",
        };

        Self {
            user_id: user_id.to_string(),
            location: UploadLocation {
                lat: report.latitude,
                lng: report.longitude,
                address: address.to_string(),
            },
            severity: report.severity,
            image_url,
            description: report.description.clone(),
            damage_type: report.damage_type,
            source: UPLOAD_SOURCE.to_string(),
        }
    }
}
